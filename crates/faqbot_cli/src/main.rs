use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use faqbot_core::{
    evaluate, load_cases_json, ContentExtractor, CorpusBuilder, EngineConfig, EntityId,
    HttpFetcher, ModelFiles, RetrievalEngine,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Entity id used for the single in-process corpus the CLI trains.
const CLI_ENTITY: EntityId = 1;

#[derive(Debug, Parser)]
#[command(name = "faqbot")]
#[command(version, about = "Train a FAQ answerer from a web page and query it")]
struct Cli {
    /// JSON engine configuration; flags below override its values.
    #[arg(long, global = true, env = "FAQBOT_CONFIG")]
    config: Option<PathBuf>,

    /// all-MiniLM-L6-v2 .safetensors weights. Requires --tokenizer-path.
    #[arg(long, global = true, env = "FAQBOT_MODEL_PATH")]
    model_path: Option<PathBuf>,

    /// tokenizer.json matching --model-path.
    #[arg(long, global = true, env = "FAQBOT_TOKENIZER_PATH")]
    tokenizer_path: Option<PathBuf>,

    #[arg(long, global = true, env = "FAQBOT_THRESHOLD")]
    threshold: Option<f32>,

    #[arg(long, global = true, env = "FAQBOT_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct Source {
    /// Page to fetch and learn from.
    #[arg(long)]
    url: Option<String>,

    /// Local HTML or text file to learn from instead of fetching.
    #[arg(long)]
    text_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the generated question/answer pairs as JSON lines.
    Extract {
        #[command(flatten)]
        source: Source,
    },
    /// Train, then answer each --question.
    Ask {
        #[command(flatten)]
        source: Source,
        #[arg(long, required = true)]
        question: Vec<String>,
    },
    /// Train, then answer questions read from stdin, one per line.
    Chat {
        #[command(flatten)]
        source: Source,
    },
    /// Train, then replay labelled cases and report the pass rate.
    Eval {
        #[command(flatten)]
        source: Source,
        #[arg(long)]
        cases: PathBuf,
        #[arg(long, default_value_t = 0.85)]
        min_pass_rate: f32,
    },
}

impl Cli {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_json_file(path)?,
            None => EngineConfig::default(),
        };
        if let Some(threshold) = self.threshold {
            config.similarity_threshold = threshold;
        }
        if let Some(secs) = self.timeout_secs {
            config.fetch_timeout_secs = secs;
        }
        match (&self.model_path, &self.tokenizer_path) {
            (Some(model), Some(tokenizer)) => {
                config.model = Some(ModelFiles {
                    model_path: model.clone(),
                    tokenizer_path: tokenizer.clone(),
                });
            }
            (None, None) => {}
            _ => anyhow::bail!("--model-path and --tokenizer-path must both be provided"),
        }
        config.validate()?;
        Ok(config)
    }
}

fn read_source_text(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(faqbot_core::html_to_text(&raw))
}

async fn train(engine: &RetrievalEngine, source: &Source) -> Result<usize> {
    let report = match (&source.url, &source.text_file) {
        (Some(url), _) => engine.train(CLI_ENTITY, url).await,
        (None, Some(path)) => engine.train_text(CLI_ENTITY, &read_source_text(path)?).await,
        (None, None) => anyhow::bail!("one of --url or --text-file is required"),
    };
    if !report.success {
        anyhow::bail!("{}", report.message);
    }
    info!(pair_count = report.pair_count, "{}", report.message);
    Ok(report.pair_count)
}

async fn ready_engine(config: EngineConfig) -> Result<RetrievalEngine> {
    let engine = RetrievalEngine::new(config)?;
    let mode = engine.initialize().await?;
    info!(?mode, "Embedding provider ready");
    Ok(engine)
}

async fn run() -> Result<bool> {
    let cli = Cli::parse();
    let config = cli.engine_config()?;

    match &cli.command {
        Commands::Extract { source } => {
            let text = match (&source.url, &source.text_file) {
                (Some(url), _) => {
                    let fetcher = Arc::new(HttpFetcher::new(&config.user_agent)?);
                    ContentExtractor::new(fetcher, config.fetch_timeout())
                        .fetch_text(url)
                        .await?
                }
                (None, Some(path)) => read_source_text(path)?,
                (None, None) => anyhow::bail!("one of --url or --text-file is required"),
            };
            for pair in CorpusBuilder::from_config(&config).build(&text) {
                println!("{}", serde_json::to_string(&pair)?);
            }
        }
        Commands::Ask { source, question } => {
            let engine = ready_engine(config).await?;
            train(&engine, source).await?;
            for q in question {
                let report = engine.query(CLI_ENTITY, q).await;
                println!("{}", serde_json::to_string(&report)?);
            }
        }
        Commands::Chat { source } => {
            let engine = ready_engine(config).await?;
            train(&engine, source).await?;
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await.context("read stdin")? {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let report = engine.query(CLI_ENTITY, line).await;
                println!("{}", serde_json::to_string(&report)?);
            }
        }
        Commands::Eval {
            source,
            cases,
            min_pass_rate,
        } => {
            let engine = ready_engine(config).await?;
            train(&engine, source).await?;
            let cases = load_cases_json(cases)?;
            let summary = evaluate(&engine, CLI_ENTITY, &cases).await?;

            for o in &summary.outcomes {
                println!(
                    "case={} passed={} decision={:?} confidence={:.4} latency={:.1}ms",
                    o.case_id, o.passed, o.actual_decision, o.confidence, o.latency_ms
                );
            }
            let meets = summary.meets(*min_pass_rate);
            println!(
                "total={} passed={} failed={} pass_rate={:.4} required={:.4} meets_threshold={}",
                summary.total,
                summary.passed,
                summary.failed,
                summary.pass_rate,
                min_pass_rate,
                meets
            );
            return Ok(meets);
        }
    }

    Ok(true)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}
