//! grounder CLI: ingest configured corpora and query the hybrid index.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use grounder_core::bootstrap::{Engine, resolve_config_path};
use grounder_core::config::Config;
use grounder_retrieval::{Intent, QueryFilters, QueryRequest};

#[derive(Parser)]
#[command(name = "grounder")]
#[command(about = "Hybrid dense and lexical retrieval over documentation and source code")]
#[command(version)]
struct Cli {
    /// Config file; defaults to `GROUNDER_CONFIG` or `config/grounder.toml`.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every configured corpus and write a run manifest
    Ingest,
    /// Retrieve an evidence pack for a query
    Query {
        query: String,
        /// Skip classification and use this intent
        #[arg(short, long, value_parser = parse_intent)]
        intent: Option<Intent>,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Restrict to these repositories (owner/name)
        #[arg(long = "repo")]
        repos: Vec<String>,
        /// Restrict to these corpus names
        #[arg(long = "source")]
        sources: Vec<String>,
        /// Print the full pack as JSON instead of context blocks
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration with secrets redacted
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_subscriber();

    let config_path = cli.config.unwrap_or_else(resolve_config_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    config.validate()?;

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        }
        Command::Ingest => {
            let engine = Engine::from_config(config)?;
            let (manifest, path) = engine.ingest().await?;
            tracing::info!(
                run_id = %manifest.run_id,
                chunks = manifest.total_chunks,
                warnings = manifest.warnings.len(),
                manifest = %path.display(),
                "ingestion complete"
            );
            println!("{}", path.display());
        }
        Command::Query {
            query,
            intent,
            top_k,
            repos,
            sources,
            json,
        } => {
            let engine = Engine::from_config(config)?;
            let request = QueryRequest {
                query,
                intent,
                filters: QueryFilters {
                    sources,
                    repos,
                    ..QueryFilters::default()
                },
                top_k,
            };
            let pack = engine.query(request).await?;
            for warning in &pack.warnings {
                tracing::warn!(code = warning.code(), "{warning}");
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&pack)?);
            } else {
                print!("{}", pack.format_as_context());
            }
        }
    }
    Ok(())
}

fn parse_intent(s: &str) -> Result<Intent, String> {
    s.parse().map_err(|e: grounder_retrieval::RetrievalError| e.to_string())
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
