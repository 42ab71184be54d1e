use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use copylint_engine::{EngineConfig, EngineError, HttpInference, Orchestrator};
use copylint_protocol::{AnalyzeRequest, ErrorEnvelope};
use copylint_rules::{extract_rules, guidelines_version, GuidelineRecord};
use copylint_store::{CacheLayer, MemoryStore};

#[derive(Parser)]
#[command(name = "copylint")]
#[command(about = "Guideline-driven text analysis with cached AI inference", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a batch of text items against a guidelines file
    Analyze {
        /// Guidelines file (JSON array of guideline records)
        #[arg(long)]
        guidelines: PathBuf,

        /// Request file (JSON, `{"items": [{"id", "text"}]}`); stdin when omitted
        #[arg(long)]
        request: Option<PathBuf>,

        /// Inference service endpoint (or COPYLINT_INFERENCE_URL)
        #[arg(long)]
        endpoint: Option<String>,

        /// Wall-clock budget for the whole request, in milliseconds
        #[arg(long, default_value_t = 25_000)]
        budget_ms: u64,

        /// Items per inference batch
        #[arg(long, default_value_t = 12)]
        batch_size: usize,

        /// Per-request item ceiling (0 disables the check)
        #[arg(long, default_value_t = 0)]
        max_items: usize,
    },

    /// Print the flat rule set extracted from a guidelines file
    Rules {
        #[arg(long)]
        guidelines: PathBuf,
    },

    /// Print the synthesized inference instructions
    Prompt {
        #[arg(long)]
        guidelines: PathBuf,

        /// Positive/negative examples rendered per guideline
        #[arg(long, default_value_t = 3)]
        max_examples: usize,
    },

    /// Print the guideline version digest
    Version {
        #[arg(long)]
        guidelines: PathBuf,
    },
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_filter = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .init();
}

fn load_guidelines(path: &PathBuf) -> Result<Vec<GuidelineRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read guidelines file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid guidelines JSON in {}", path.display()))
}

fn load_request(path: Option<&PathBuf>) -> Result<AnalyzeRequest> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read request file {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("cannot read request from stdin")?;
            buffer
        }
    };
    serde_json::from_str(&raw).context("invalid request JSON")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Analyze {
            guidelines,
            request,
            endpoint,
            budget_ms,
            batch_size,
            max_items,
        } => {
            let endpoint = endpoint
                .or_else(|| std::env::var("COPYLINT_INFERENCE_URL").ok())
                .context(
                    "no inference endpoint configured (use --endpoint or COPYLINT_INFERENCE_URL)",
                )?;
            let guidelines = load_guidelines(&guidelines)?;
            let request = load_request(request.as_ref())?;

            let store = Arc::new(MemoryStore::with_guidelines(guidelines));
            let config = EngineConfig {
                total_budget: Duration::from_millis(budget_ms),
                max_batch_size: batch_size.max(1),
                max_items,
                ..EngineConfig::default()
            };
            let engine = Orchestrator::new(
                config,
                CacheLayer::new(store.clone(), store.clone()),
                store,
                Arc::new(HttpInference::new(endpoint)),
            );

            match engine.analyze(request).await {
                Ok(response) => {
                    log::info!(
                        "analyzed {} items in {}ms ({} cached, {} fallback)",
                        response.telemetry.total_items,
                        response.telemetry.elapsed_ms,
                        response.telemetry.cache_hits + response.telemetry.relationship_hits,
                        response.telemetry.fallbacks
                    );
                    println!("{}", serde_json::to_string_pretty(&response)?);
                    Ok(())
                }
                Err(err) => {
                    let envelope = error_envelope(err);
                    println!("{}", serde_json::to_string_pretty(&envelope)?);
                    std::process::exit(2);
                }
            }
        }
        Commands::Rules { guidelines } => {
            let guidelines = load_guidelines(&guidelines)?;
            let rules = extract_rules(&guidelines);
            println!("{}", serde_json::to_string_pretty(&rules)?);
            Ok(())
        }
        Commands::Prompt {
            guidelines,
            max_examples,
        } => {
            let guidelines = load_guidelines(&guidelines)?;
            let version = guidelines_version(&guidelines);
            let rules = extract_rules(&guidelines);
            let prompt =
                copylint_engine::build_prompt(&guidelines, &rules, &version, max_examples);
            println!("{prompt}");
            Ok(())
        }
        Commands::Version { guidelines } => {
            let guidelines = load_guidelines(&guidelines)?;
            println!("{}", guidelines_version(&guidelines));
            Ok(())
        }
    }
}

fn error_envelope(err: EngineError) -> ErrorEnvelope {
    match err {
        EngineError::Request(envelope) => envelope,
        EngineError::GuidelinesUnavailable(message) => ErrorEnvelope {
            code: "guidelines_unavailable".to_string(),
            message,
            details: None,
            hint: Some("guidelines are required; no partial analysis is attempted".to_string()),
        },
    }
}
