//! Chronix query command-line harness
//!
//! Loads documents from a JSON-lines file into the in-memory search engine
//! and serves one request through the dispatcher, printing the response as
//! JSON.
//!
//! # CLI Commands
//!
//! - `query` - Run a request (default)
//! - `check-config` - Validate configuration file
//! - `analyses` - List registered analysis functions
//!
//! # Example
//!
//! ```text
//! chronix-query --docs points.jsonl query -q 'metric:cpu AND start:NOW-1DAY' --fq 'ag=max'
//! ```

use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use chronix_query::{
    analysis::AnalysisRegistry,
    config::Config,
    date::ChronixDateParser,
    engine::InMemorySearchEngine,
    params::{RequestParams, FQ, Q, ROWS, SORT},
    query::QueryDispatcher,
    telemetry,
    types::Document,
};

// =============================================================================
// CLI Definition
// =============================================================================

/// Chronix query - grouped time-series analysis over a search index
#[derive(Parser)]
#[command(name = "chronix-query")]
#[command(version)]
#[command(about = "Time-series aware query dispatcher", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (overrides CHRONIX_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// JSON-lines file of documents to index
    #[arg(short, long, global = true)]
    docs: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a request against the indexed documents (default)
    Query {
        /// Query text
        #[arg(short, long, default_value = "*:*")]
        q: String,

        /// Filter queries, e.g. `ag=max` or `join=metric,host`
        #[arg(long)]
        fq: Vec<String>,

        /// Rows requested; 0 with an analysis filter counts groups only
        #[arg(short, long)]
        rows: Option<i64>,

        /// Sort criterion, e.g. `start desc`
        #[arg(short, long)]
        sort: Option<String>,
    },

    /// Validate configuration file
    CheckConfig,

    /// List registered analysis functions
    Analyses,
}

// =============================================================================
// Helpers
// =============================================================================

fn load_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var("CHRONIX_CONFIG").ok().map(PathBuf::from));

    let config = match path {
        Some(path) => Config::from_file_with_env(path)?,
        None => Config::from_env(),
    };
    config.validate()?;
    Ok(config)
}

fn load_documents(path: &Path) -> Result<Vec<Document>, Box<dyn std::error::Error>> {
    let reader = BufReader::new(File::open(path)?);
    let mut documents = Vec::new();

    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: Document = serde_json::from_str(&line)
            .map_err(|e| format!("{}:{}: {}", path.display(), n + 1, e))?;
        documents.push(doc);
    }

    Ok(documents)
}

// =============================================================================
// Command Handlers
// =============================================================================

fn cmd_check_config(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Configuration is valid!");
    println!();
    println!("Retrieval:");
    println!("  Page size: {}", config.retrieval.page_size);
    println!("  Fetch timeout: {} ms", config.retrieval.fetch_timeout_ms);
    println!();
    println!("Aggregation:");
    println!("  Workers: {}", config.aggregation.workers);
    println!("  Group timeout: {} ms", config.aggregation.group_timeout_ms);
    println!();
    println!("Schema:");
    println!("  Timestamp field: {}", config.schema.timestamp_field);
    println!("  Value field: {}", config.schema.value_field);
    println!("  Default join: {}", config.schema.default_join_fields.join(","));
    println!("  Default sort: {}", config.schema.default_sort);
    Ok(())
}

async fn cmd_query(
    cli: &Cli,
    config: Config,
    registry: Arc<AnalysisRegistry>,
    params: RequestParams,
) -> Result<(), Box<dyn std::error::Error>> {
    let documents = match &cli.docs {
        Some(path) => load_documents(path)?,
        None => Vec::new(),
    };
    info!(documents = documents.len(), "Indexed documents");

    let engine = Arc::new(InMemorySearchEngine::with_documents(documents));
    let date_parser = Arc::new(ChronixDateParser::new(config.schema.timestamp_field.clone()));
    let dispatcher = QueryDispatcher::new(engine, date_parser, registry, config);

    let response = dispatcher.handle(params).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    telemetry::init_tracing(&config.logging);

    debug!(
        page_size = config.retrieval.page_size,
        workers = config.aggregation.workers,
        "Configuration loaded"
    );

    let registry = Arc::new(AnalysisRegistry::with_builtins(
        config.schema.value_field.clone(),
    ));

    match &cli.command {
        Some(Commands::CheckConfig) => cmd_check_config(&config),
        Some(Commands::Analyses) => {
            for name in registry.names() {
                println!("{}", name);
            }
            Ok(())
        }
        Some(Commands::Query { q, fq, rows, sort }) => {
            let mut params = RequestParams::new().with(Q, q.as_str());
            for filter in fq {
                params.add(FQ, filter.as_str());
            }
            if let Some(rows) = rows {
                params.set(ROWS, rows.to_string());
            }
            if let Some(sort) = sort {
                params.set(SORT, sort.as_str());
            }
            cmd_query(&cli, config, registry, params).await
        }
        None => cmd_query(&cli, config, registry, RequestParams::new()).await,
    }
}
