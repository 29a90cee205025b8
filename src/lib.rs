#![forbid(unsafe_code)]

//! # thematic-coder
//!
//! Turns open-ended survey answers into an analyst-style thematic coding.
//!
//! Every question runs through the same staged pipeline: classify the question
//! (REFERENCE or OPINION), extract sentiment-tagged codes, normalize them,
//! group them into nets, then label every answer with the nets and codes it
//! covers. The language work is delegated to an external LLM (the "oracle");
//! this crate owns everything around it: prompts, schema validation and
//! retry, batching that never drops or reorders answers, and per-question
//! failure isolation with resumable checkpoints.

pub mod batching;
pub mod catalog;
pub mod config;
pub mod dedup;
pub mod error;
pub mod gateway;
pub mod language;
pub mod oracle;
pub mod pipeline;
pub mod prompts;
pub mod stages;
pub mod trace;
pub mod types;

pub use batching::process_in_batches;
pub use catalog::StudyType;
pub use config::PipelineConfig;
pub use error::CodingError;
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use language::{detect as detect_language, Language};
pub use oracle::{OracleCall, OracleClient};
pub use pipeline::{
    CodingPipeline, PipelineError, QuestionCheckpoint, QuestionOutcome, QuestionReport,
    QuestionState, SurveyReport,
};
pub use trace::{JsonlTraceSink, StageTrace, StageTraceSink, TraceError, TraceWorker};
pub use types::{
    Answer, ClassifiedAnswer, Code, CodeLabel, Net, NetAssignment, ProjectContext, QuestionInput,
    QuestionType, Sentiment, Stage,
};
