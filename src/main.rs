//! Chronicle Engine CLI
//!
//! Command-line interface for running statements against line-protocol data:
//! - Load data files into an in-memory store
//! - Execute JSON statements
//! - Print results as a table, JSON or CSV
//! - Generate a default config file

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{SecondsFormat, TimeZone, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chronicle_engine::query::result::to_csv;
use chronicle_engine::{
    generate_default_config, Config, LoggingConfig, MemoryStore, QueryEngine, Response,
    SelectStatement, Series, Value,
};

#[derive(Parser)]
#[command(name = "chronicle-engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Time-series query engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute statements against line-protocol data
    Query {
        /// Line-protocol files to load
        #[arg(short, long, required = true)]
        data: Vec<PathBuf>,
        /// JSON file holding one statement or an array of statements
        #[arg(short, long)]
        statement: PathBuf,
        /// Database the data is loaded into and statements default to
        #[arg(long, default_value = "db")]
        database: String,
        /// Output format (table, json, csv)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Statements {
    One(SelectStatement),
    Many(Vec<SelectStatement>),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_tracing(&config.logging);

    match cli.command {
        Commands::Query {
            data,
            statement,
            database,
            format,
        } => {
            let store = Arc::new(MemoryStore::new());
            store.create_database(&database);
            let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
            for path in &data {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading data file {:?}", path))?;
                let written = store
                    .write_lines(&database, None, &text, now)
                    .with_context(|| format!("loading data file {:?}", path))?;
                tracing::info!(points = written, file = ?path, "loaded data");
            }

            let text = std::fs::read_to_string(&statement)
                .with_context(|| format!("reading statement file {:?}", statement))?;
            let statements = match serde_json::from_str(&text)
                .with_context(|| format!("parsing statement file {:?}", statement))?
            {
                Statements::One(stmt) => vec![stmt],
                Statements::Many(stmts) => stmts,
            };

            let engine = QueryEngine::new(store, config.query);
            let response = Response {
                results: engine.execute_batch(&database, &statements).await,
            };

            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&response)?),
                "csv" => print!("{}", to_csv(&response.results)?),
                _ => print_table(&response),
            }
        }

        Commands::Config { output } => {
            let config = generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("chronicle_engine={}", logging.level)));
    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn print_table(response: &Response) {
    for result in &response.results {
        if let Some(error) = &result.error {
            println!("statement {}: error: {}", result.statement_id, error);
            continue;
        }
        if result.series.is_empty() {
            println!("statement {}: no results", result.statement_id);
            continue;
        }
        for series in &result.series {
            print_series(series);
        }
    }
}

fn print_series(series: &Series) {
    let tags = series
        .tags
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ");
    if tags.is_empty() {
        println!("name: {}", series.name);
    } else {
        println!("name: {}  tags: {}", series.name, tags);
    }

    let cells: Vec<Vec<String>> = series
        .values
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(i, v)| match v {
                    Value::Integer(ts) if i == 0 => Utc
                        .timestamp_nanos(*ts)
                        .to_rfc3339_opts(SecondsFormat::AutoSi, true),
                    Value::Null => "-".to_string(),
                    other => other.to_string(),
                })
                .collect()
        })
        .collect();

    let widths: Vec<usize> = series
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            cells
                .iter()
                .filter_map(|row| row.get(i).map(String::len))
                .max()
                .unwrap_or(0)
                .max(c.len())
        })
        .collect();

    let line = |values: Vec<&str>| {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = w))
            .collect::<Vec<_>>()
            .join(" | ")
    };
    println!("{}", line(series.columns.iter().map(String::as_str).collect()));
    println!("{}", "-".repeat(widths.iter().sum::<usize>() + 3 * widths.len().saturating_sub(1)));
    for row in &cells {
        println!("{}", line(row.iter().map(String::as_str).collect()));
    }
    if series.partial {
        println!("(partial)");
    }
    println!();
}
