//! CLI for the vintage bitemporal market-data repository.
//!
//! Every subcommand here is always backed by [`vintage::MemoryDocStore`]:
//! there is no persistent document-store client in this workspace (it is
//! an external collaborator per the storage engine's own design), so the
//! connection flags below are accepted and resolved for parity with the
//! documented external interface, but a fresh in-memory store is created
//! per invocation. Each run therefore only sees the instruments it
//! upserts within that same run — consult `--help` before scripting
//! around cross-process persistence.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use vintage::docstore::ConnectionConfig;
use vintage::{MemoryDocStore, MergeMode, Store};

/// vintage — bitemporal market-data repository CLI.
#[derive(Parser)]
#[command(name = "vintage", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Document-store host (env: mongodb_host).
    #[arg(long, global = true)]
    host: Option<String>,

    /// Document-store port (env: mongodb_port).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Document-store user (env: mongodb_user).
    #[arg(long, global = true)]
    user: Option<String>,

    /// Document-store password (env: mongodb_pwd).
    #[arg(long, global = true)]
    pwd: Option<String>,

    /// Target collection/database (env: signaldb_collection).
    #[arg(long, global = true)]
    col: Option<String>,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Upsert one or more JSON instrument batches into the store.
    Upsert {
        /// Paths to files, each containing a JSON array of instrument documents.
        files: Vec<PathBuf>,

        /// How incoming properties combine with what is already stored.
        #[arg(long, default_value = "append")]
        props_merge_mode: String,

        /// How incoming series combine with what is already stored.
        #[arg(long, default_value = "append")]
        series_merge_mode: String,

        /// Deduplicate the batch by primary alias before writing.
        #[arg(long, default_value_t = true)]
        consolidate: bool,
    },

    /// Consolidate input files by primary alias and write the result to `output`. Write-only; touches no store.
    Consolidate {
        /// Input files, each a JSON array of instrument documents.
        inputs: Vec<PathBuf>,

        /// Output file for the consolidated JSON array.
        output: PathBuf,

        /// How incoming properties combine across duplicate primary aliases.
        #[arg(long, default_value = "append")]
        props_merge_mode: String,
    },

    /// Read a single instrument by alias.
    Get {
        /// Data source, e.g. "ISIN".
        source: String,
        /// Ticker under that source.
        ticker: String,
    },

    /// Find instruments whose properties match a JSON object filter.
    Find {
        /// JSON object of `{property: value}` equality filters.
        filter: String,
    },

    /// List currently valid `(source, ticker)` aliases.
    List {
        /// Restrict to one source.
        source: Option<String>,
    },

    /// Report the size of each collection.
    Info,

    /// Roll the store back to the state it had at the given RFC3339 instant.
    Rollback {
        /// Instant to roll back to, `YYYY-MM-DDTHH:MM:SSZ`.
        time: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let _connection = ConnectionConfig::resolve(cli.host, cli.port, cli.user, cli.pwd, cli.col);

    let result = run(cli.command).await;
    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Upsert {
            files,
            props_merge_mode,
            series_merge_mode,
            consolidate,
        } => cmd_upsert(&files, &props_merge_mode, &series_merge_mode, consolidate).await,
        Commands::Consolidate {
            inputs,
            output,
            props_merge_mode,
        } => cmd_consolidate(&inputs, &output, &props_merge_mode),
        Commands::Get { source, ticker } => cmd_get(&source, &ticker).await,
        Commands::Find { filter } => cmd_find(&filter).await,
        Commands::List { source } => cmd_list(source.as_deref()).await,
        Commands::Info => cmd_info().await,
        Commands::Rollback { time } => cmd_rollback(&time).await,
    }
}

fn read_batch(files: &[PathBuf]) -> Result<Vec<serde_json::Value>, Box<dyn std::error::Error>> {
    let mut batch = Vec::new();
    for file in files {
        let data = std::fs::read_to_string(file)?;
        match serde_json::from_str::<serde_json::Value>(&data) {
            Ok(serde_json::Value::Array(items)) => batch.extend(items),
            Ok(other) => batch.push(other),
            Err(err) => {
                tracing::warn!(file = %file.display(), %err, "skipping unparsable file");
            }
        }
    }
    Ok(batch)
}

async fn cmd_upsert(
    files: &[PathBuf],
    props_merge_mode: &str,
    series_merge_mode: &str,
    consolidate: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let props_mode = MergeMode::parse(props_merge_mode)?;
    let series_mode = MergeMode::parse(series_merge_mode)?;
    let batch = read_batch(files)?;

    let store = Store::connect(std::sync::Arc::new(MemoryDocStore::new())).await?;
    let report = store.upsert(batch, props_mode, series_mode, consolidate).await?;
    println!(
        "inserted={} updated={} skipped_invalid={}",
        report.inserted, report.updated, report.skipped_invalid
    );
    Ok(())
}

fn cmd_consolidate(
    inputs: &[PathBuf],
    output: &PathBuf,
    props_merge_mode: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let props_mode = MergeMode::parse(props_merge_mode)?;
    let batch = read_batch(inputs)?;

    let instruments: Vec<_> = batch
        .into_iter()
        .filter_map(|doc| vintage::validate::extract_instrument(doc).ok())
        .collect();
    let consolidated = vintage::consolidate::consolidate(instruments, props_mode);

    let docs: Vec<serde_json::Value> = consolidated
        .iter()
        .map(|instrument| {
            serde_json::json!({
                "tickers": instrument.aliases,
                "properties": instrument.properties,
                "series": instrument.series.iter().map(|(name, samples)| {
                    (name.clone(), samples.iter().map(|s| (s.t.to_rfc3339(), s.v.clone())).collect::<Vec<_>>())
                }).collect::<std::collections::BTreeMap<_, _>>(),
            })
        })
        .collect();

    std::fs::write(output, serde_json::to_string_pretty(&docs)?)?;
    Ok(())
}

async fn cmd_get(source: &str, ticker: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::connect(std::sync::Arc::new(MemoryDocStore::new())).await?;
    match store.get(source, ticker, None, None, None).await? {
        Some(instrument) => println!("{}", serde_json::to_string_pretty(&to_json(&instrument))?),
        None => println!("not found"),
    }
    Ok(())
}

async fn cmd_find(filter: &str) -> Result<(), Box<dyn std::error::Error>> {
    let filter: serde_json::Map<String, serde_json::Value> = serde_json::from_str(filter)?;
    let store = Store::connect(std::sync::Arc::new(MemoryDocStore::new())).await?;
    let instruments = store.find_instruments(&filter, None).await?;
    let docs: Vec<_> = instruments.iter().map(to_json).collect();
    println!("{}", serde_json::to_string_pretty(&docs)?);
    Ok(())
}

async fn cmd_list(source: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::connect(std::sync::Arc::new(MemoryDocStore::new())).await?;
    for (source, ticker) in store.list_tickers(source, None).await? {
        println!("{source}\t{ticker}");
    }
    Ok(())
}

async fn cmd_info() -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::connect(std::sync::Arc::new(MemoryDocStore::new())).await?;
    let counts = store.count_items().await?;
    println!(
        "refs={} paths={} sheets={} spaces={}",
        counts.refs, counts.paths, counts.sheets, counts.spaces
    );
    Ok(())
}

async fn cmd_rollback(time: &str) -> Result<(), Box<dyn std::error::Error>> {
    let t = vintage::Timestamp::parse_exact(time)?;
    let store = Store::connect(std::sync::Arc::new(MemoryDocStore::new())).await?;
    store.rollback(t).await?;
    Ok(())
}

fn to_json(instrument: &vintage::ResolvedInstrument) -> serde_json::Value {
    serde_json::json!({
        "tickers": instrument.aliases,
        "properties": instrument.properties,
        "series": instrument.series.iter().map(|(name, samples)| {
            (name.clone(), samples.iter().map(|s| (s.t.to_rfc3339(), s.v.clone())).collect::<Vec<_>>())
        }).collect::<std::collections::BTreeMap<_, _>>(),
    })
}
