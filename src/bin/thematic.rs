#![forbid(unsafe_code)]

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use thematic_coder::gateway::{NoopUsageSink, ProviderError, ProviderGateway, StderrUsageSink};
use thematic_coder::language::{self, Language};
use thematic_coder::prompts::{self, PromptInstance};
use thematic_coder::{
    ChatGateway, Code, CodingPipeline, JsonlTraceSink, Net, OracleClient, PipelineConfig,
    ProjectContext, QuestionCheckpoint, QuestionInput, QuestionReport, Stage, SurveyReport,
    TraceWorker,
};

#[derive(Parser)]
#[command(name = "thematic", version, about = "Thematic coding of open-ended survey answers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Code every question of a survey (LLM calls)
    Run {
        /// Survey JSON: [{questionText, answers: [{respondentId, text}]}]
        #[arg(long)]
        survey: PathBuf,
        /// Project context JSON
        #[arg(long)]
        context: PathBuf,
        /// Pipeline config JSON (defaults apply to missing fields)
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
        /// Write one JSON line per oracle attempt
        #[arg(long)]
        trace: Option<PathBuf>,
        /// Print provider usage records to stderr
        #[arg(long)]
        usage: bool,
    },
    /// Resume one failed or cancelled question from its checkpoint (LLM calls)
    Resume {
        /// Checkpoint JSON, as found in a failed question's report entry
        #[arg(long)]
        checkpoint: PathBuf,
        #[arg(long)]
        context: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        trace: Option<PathBuf>,
        #[arg(long)]
        usage: bool,
    },
    /// Print the detected language code of a text sample
    DetectLanguage {
        #[arg(long, group = "sample")]
        text: Option<String>,
        /// File with one answer per line
        #[arg(long, group = "sample")]
        file: Option<PathBuf>,
    },
    /// Render a stage prompt without calling the oracle
    Prompt {
        /// classify-question, extract-codes, normalize-codes, generate-nets,
        /// classify-answers, summarize or net-options
        #[arg(long)]
        stage: String,
        #[arg(long)]
        question: String,
        #[arg(long)]
        context: Option<PathBuf>,
        /// Stage input JSON: answers (string array), codes, or {answers, nets}
        #[arg(long)]
        input: Option<PathBuf>,
        /// Output language code (default: es)
        #[arg(long, default_value = "es")]
        language: String,
        #[arg(long, default_value_t = 30)]
        max_codes: usize,
    },
    /// Propose three alternative net groupings for a set of codes (LLM calls)
    NetOptions {
        /// Codes JSON: [{name, sentiment}]
        #[arg(long)]
        codes: PathBuf,
        #[arg(long)]
        question: String,
        #[arg(long)]
        context: PathBuf,
        #[arg(long, default_value = "es")]
        language: String,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        usage: bool,
    },
}

#[derive(serde::Deserialize)]
struct ClassifyAnswersInput {
    answers: Vec<String>,
    nets: Vec<Net>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            survey,
            context,
            config,
            out,
            trace,
            usage,
        } => {
            let questions: Vec<QuestionInput> = read_json(&survey)?;
            let ctx: ProjectContext = read_json(&context)?;
            let config = load_config(config.as_ref())?;
            let (trace_sink, trace_worker) = open_trace(trace)?;
            let cancel = cancel_on_ctrl_c();

            let report: SurveyReport = {
                let pipeline = build_pipeline(config, usage, trace_sink)?;
                pipeline
                    .run_survey(questions, &ctx, Some(cancel.as_ref()))
                    .await
            };
            write_json(&out, &report)?;
            finish_trace(trace_worker)?;

            for entry in &report.questions {
                match entry {
                    QuestionReport::Completed { .. } => {}
                    QuestionReport::Failed {
                        question, stage, error, ..
                    } => warn!(question = %question, stage = %stage, error = %error, "question failed"),
                    QuestionReport::Cancelled { question, stage, .. } => {
                        warn!(question = %question, stage = %stage, "question cancelled")
                    }
                }
            }
            info!(
                completed = report.completed(),
                total = report.questions.len(),
                out = %out.display(),
                "report written"
            );
        }
        Commands::Resume {
            checkpoint,
            context,
            config,
            out,
            trace,
            usage,
        } => {
            let checkpoint: QuestionCheckpoint = read_json(&checkpoint)?;
            let ctx: ProjectContext = read_json(&context)?;
            let config = load_config(config.as_ref())?;
            let (trace_sink, trace_worker) = open_trace(trace)?;
            let cancel = cancel_on_ctrl_c();

            let result = {
                let pipeline = build_pipeline(config, usage, trace_sink)?;
                pipeline
                    .resume(checkpoint, &ctx, Some(cancel.as_ref()))
                    .await
            };
            finish_trace(trace_worker)?;
            match result {
                Ok(outcome) => write_json(&out, &outcome)?,
                Err(err) => {
                    let stage = err.stage();
                    let message = err.to_string();
                    write_json(&out, &err.into_checkpoint())?;
                    return Err(format!(
                        "{message}; checkpoint before {stage} written to {}",
                        out.display()
                    )
                    .into());
                }
            }
        }
        Commands::DetectLanguage { text, file } => {
            let sample = match (text, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(path)?
                    .lines()
                    .collect::<Vec<_>>()
                    .join(" "),
                (None, None) => return Err("detect-language requires --text or --file".into()),
            };
            println!("{}", language::detect(&sample));
        }
        Commands::Prompt {
            stage,
            question,
            context,
            input,
            language,
            max_codes,
        } => {
            let stage = Stage::parse(&stage).ok_or_else(|| format!("unknown stage '{stage}'"))?;
            let lang = parse_language(&language)?;
            let ctx: ProjectContext = match context {
                Some(path) => read_json(&path)?,
                None => ProjectContext::default(),
            };
            let prompt = render_prompt(stage, &question, &ctx, input.as_ref(), lang, max_codes)?;
            println!("=== {} / system ===\n{}\n", prompt.template_slug, prompt.system);
            println!("=== {} / user ===\n{}", prompt.template_slug, prompt.user);
        }
        Commands::NetOptions {
            codes,
            question,
            context,
            language,
            config,
            out,
            usage,
        } => {
            let codes: Vec<Code> = read_json(&codes)?;
            let ctx: ProjectContext = read_json(&context)?;
            let lang = parse_language(&language)?;
            let config = load_config(config.as_ref())?;
            let pipeline = build_pipeline(config, usage, None)?;
            let options = pipeline.net_options(&question, &codes, lang, &ctx).await?;
            write_json(&out, &serde_json::json!({ "options": options }))?;
        }
    }

    Ok(())
}

fn build_gateway(usage: bool) -> Result<Arc<dyn ChatGateway>, ProviderError> {
    Ok(if usage {
        Arc::new(ProviderGateway::from_env(Arc::new(StderrUsageSink))?)
    } else {
        Arc::new(ProviderGateway::from_env(Arc::new(NoopUsageSink))?)
    })
}

fn build_pipeline(
    config: PipelineConfig,
    usage: bool,
    trace: Option<JsonlTraceSink>,
) -> Result<CodingPipeline, Box<dyn std::error::Error>> {
    let run_id = Uuid::new_v4();
    let mut oracle = OracleClient::new(build_gateway(usage)?, &config).with_run(run_id);
    if let Some(sink) = trace {
        oracle = oracle.with_trace(Arc::new(sink));
    }
    info!(run_id = %run_id, model = %config.model, "pipeline ready");
    Ok(CodingPipeline::new(oracle, config))
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    })
}

fn open_trace(
    path: Option<PathBuf>,
) -> Result<(Option<JsonlTraceSink>, Option<TraceWorker>), Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => {
            let (sink, worker) = JsonlTraceSink::new(path)?;
            (Some(sink), Some(worker))
        }
        None => (None, None),
    })
}

/// Join the trace writer. Every sink clone must already be dropped.
fn finish_trace(worker: Option<TraceWorker>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(worker) = worker {
        worker.join()?;
    }
    Ok(())
}

/// Stop between stages on Ctrl-C; failed questions keep their checkpoint.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handle = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight stages");
            handle.store(true, Ordering::Relaxed);
        }
    });
    flag
}

fn parse_language(code: &str) -> Result<Language, Box<dyn std::error::Error>> {
    Language::from_code(code).ok_or_else(|| {
        format!("unsupported language '{code}'; expected one of es, en, fr, pt, it, de").into()
    })
}

fn render_prompt(
    stage: Stage,
    question: &str,
    ctx: &ProjectContext,
    input: Option<&PathBuf>,
    lang: Language,
    max_codes: usize,
) -> Result<PromptInstance, Box<dyn std::error::Error>> {
    let prompt = match stage {
        Stage::ClassifyQuestion => prompts::classify_question(question, ctx),
        Stage::ExtractCodes => {
            let answers: Vec<String> = read_optional(input)?;
            prompts::extract_codes(question, &answers, lang, ctx, max_codes)
        }
        Stage::NormalizeCodes => {
            let codes: Vec<Code> = read_optional(input)?;
            prompts::normalize_codes(question, &codes, max_codes)
        }
        Stage::GenerateNets => {
            let codes: Vec<Code> = read_optional(input)?;
            prompts::generate_nets(question, &codes, lang, ctx)
        }
        Stage::ClassifyAnswers => {
            let path = input.ok_or("classify-answers requires --input {answers, nets}")?;
            let parsed: ClassifyAnswersInput = read_json(path)?;
            prompts::classify_answers(question, &parsed.answers, &parsed.nets)
        }
        Stage::Summarize => {
            let answers: Vec<String> = read_optional(input)?;
            prompts::summarize(question, &answers, lang)
        }
        Stage::NetOptions => {
            let codes: Vec<Code> = read_optional(input)?;
            prompts::net_options(question, &codes, lang, ctx)
        }
    };
    Ok(prompt)
}

fn read_optional<T: serde::de::DeserializeOwned + Default>(
    path: Option<&PathBuf>,
) -> Result<T, Box<dyn std::error::Error>> {
    match path {
        Some(path) => read_json(path),
        None => Ok(T::default()),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &PathBuf,
) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json<T: serde::Serialize>(path: &PathBuf, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}
