//! Fixed-size batching with order- and cardinality-preserving reassembly.

use std::future::Future;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use crate::error::CodingError;
use crate::types::Stage;

/// Run `stage_fn` once per consecutive chunk of at most `batch_size` items
/// and concatenate the results in chunk order.
///
/// Up to `concurrency` chunks are in flight at once; completion order never
/// affects output order. Every chunk must return exactly as many results as
/// it was given, and the first failing chunk fails the whole call.
pub async fn process_in_batches<'a, T, R, F, Fut>(
    items: &'a [T],
    batch_size: usize,
    concurrency: usize,
    stage: Stage,
    stage_fn: F,
) -> Result<Vec<R>, CodingError>
where
    F: Fn(usize, &'a [T]) -> Fut,
    Fut: Future<Output = Result<Vec<R>, CodingError>>,
{
    if batch_size == 0 {
        return Err(CodingError::input("batch_size must be >= 1"));
    }
    if items.is_empty() {
        return Ok(Vec::new());
    }
    debug!(
        stage = %stage,
        items = items.len(),
        batches = batch_count(items.len(), batch_size),
        "processing in batches"
    );

    let tasks = items.chunks(batch_size).enumerate().map(|(index, chunk)| {
        let fut = stage_fn(index, chunk);
        async move {
            let out = fut.await?;
            if out.len() != chunk.len() {
                return Err(CodingError::CardinalityMismatch {
                    stage,
                    expected: chunk.len(),
                    actual: out.len(),
                });
            }
            Ok(out)
        }
    });

    let per_chunk: Vec<Vec<R>> = stream::iter(tasks)
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    let merged: Vec<R> = per_chunk.into_iter().flatten().collect();
    if merged.len() != items.len() {
        return Err(CodingError::CardinalityMismatch {
            stage,
            expected: items.len(),
            actual: merged.len(),
        });
    }
    Ok(merged)
}

/// Number of chunks `len` items produce at `batch_size`.
pub fn batch_count(len: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        len.div_ceil(batch_size)
    }
}
