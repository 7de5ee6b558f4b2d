// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Command-line front end for the collection replicator.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser};
use collection_replicator::{
    connect_endpoints, CollectionResult, EndpointConfig, IncrementalConfig, JobConfig, JobMode,
    MissingTimestampPolicy, ReplicationEngine, RetryConfig, RunSummary, TerminalProgress,
};
use dialoguer::Confirm;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Replicate collections between MongoDB databases.
#[derive(Parser, Debug)]
#[command(name = "collection-replicator")]
#[command(version, about = "Replicate collections between MongoDB databases")]
struct Args {
    /// TOML job file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Source connection string
    #[arg(long, env = "SOURCE_URI", hide_env_values = true)]
    source_uri: Option<String>,

    /// Target connection string
    #[arg(long, env = "TARGET_URI", hide_env_values = true)]
    target_uri: Option<String>,

    /// Database name on both endpoints
    #[arg(long)]
    database: Option<String>,

    /// Source database (overrides --database)
    #[arg(long)]
    source_db: Option<String>,

    /// Target database (overrides --database)
    #[arg(long)]
    target_db: Option<String>,

    /// Collection to replicate (repeatable). Default: all.
    #[arg(short = 'c', long = "collection")]
    collections: Vec<String>,

    /// Documents per write batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Count documents without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Write snapshots to DIR instead of a target database
    #[arg(long, value_name = "DIR", conflicts_with = "import")]
    export: Option<PathBuf>,

    /// Load snapshots from DIR instead of a source database
    #[arg(long, value_name = "DIR")]
    import: Option<PathBuf>,

    /// Upsert documents changed since --since instead of overwriting
    #[arg(long)]
    incremental: bool,

    /// Timestamp field for incremental sync
    #[arg(long, requires = "incremental")]
    timestamp_field: Option<String>,

    /// Inclusive lower bound for incremental sync (RFC 3339)
    #[arg(long, requires = "incremental", value_parser = parse_since)]
    since: Option<DateTime<Utc>>,

    /// Also copy documents that lack the timestamp field
    #[arg(long, requires = "incremental")]
    include_missing_timestamp: bool,

    /// Replicate secondary indexes
    #[arg(long)]
    copy_indexes: bool,

    /// Probe the target with a test write before each collection
    #[arg(long)]
    validate_schema: bool,

    /// Disable progress bars
    #[arg(long)]
    no_progress: bool,

    /// Skip the overwrite confirmation
    #[arg(short = 'y', long)]
    yes: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short = 'v', long, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short = 'q', long)]
    quiet: bool,
}

fn parse_since(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(args: &Args) {
    let level = match (args.quiet, args.verbose) {
        (true, _) => Some("warn"),
        (false, 0) => None,
        (false, 1) => Some("debug"),
        (false, _) => Some("trace"),
    };
    let filter = match level {
        Some(level) => EnvFilter::new(format!("collection_replicator={level}")),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("collection_replicator=info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = build_config(&args)?;

    if config.is_destructive() && !args.yes && !confirm_overwrite(&config)? {
        eprintln!("Aborted, nothing was written.");
        return Ok(ExitCode::SUCCESS);
    }

    let endpoints = connect_endpoints(&config, &RetryConfig::startup())
        .await
        .context("failed to connect endpoints")?;

    let show_progress = config.show_progress;
    let engine = match ReplicationEngine::new(config, endpoints.clone()) {
        Ok(engine) => engine,
        Err(e) => {
            endpoints.close().await;
            return Err(e).context("invalid job");
        }
    };
    let engine = if show_progress {
        engine.with_progress(Arc::new(TerminalProgress::new()))
    } else {
        engine
    };

    let results = engine.run().await.context("replication run aborted")?;
    print_results(&results, args.json)?;

    if results.has_failures() {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Merge the job file (if any) with command-line overrides.
fn build_config(args: &Args) -> anyhow::Result<JobConfig> {
    let mut config = match &args.config {
        Some(path) => JobConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => JobConfig::default(),
    };

    if let Some(dir) = &args.export {
        config.mode = JobMode::Export;
        config.artifact_dir = Some(dir.clone());
    }
    if let Some(dir) = &args.import {
        config.mode = JobMode::Import;
        config.artifact_dir = Some(dir.clone());
    }

    let source_db = args.source_db.as_ref().or(args.database.as_ref());
    let target_db = args.target_db.as_ref().or(args.database.as_ref());
    config.source = merge_endpoint(config.source.take(), args.source_uri.as_ref(), source_db, "source")?;
    config.target = merge_endpoint(config.target.take(), args.target_uri.as_ref(), target_db, "target")?;

    if !args.collections.is_empty() {
        config.collections = args.collections.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }

    if args.incremental {
        let existing = config.incremental.take();
        let timestamp_field = match (&args.timestamp_field, &existing) {
            (Some(field), _) => field.clone(),
            (None, Some(existing)) => existing.timestamp_field.clone(),
            (None, None) => bail!("--incremental requires --timestamp-field"),
        };
        let since = args.since.or(existing.as_ref().and_then(|e| e.since));
        let mut incremental = IncrementalConfig::new(timestamp_field, since);
        incremental.missing_field = match (args.include_missing_timestamp, &existing) {
            (true, _) => MissingTimestampPolicy::Include,
            (false, Some(existing)) => existing.missing_field,
            (false, None) => MissingTimestampPolicy::Exclude,
        };
        config.incremental = Some(incremental);
    }

    config.dry_run |= args.dry_run;
    config.copy_indexes |= args.copy_indexes;
    config.validate_schema |= args.validate_schema;
    config.show_progress &= !args.no_progress;

    config.validate()?;
    config.validate_endpoints()?;
    Ok(config)
}

fn merge_endpoint(
    existing: Option<EndpointConfig>,
    uri: Option<&String>,
    database: Option<&String>,
    label: &str,
) -> anyhow::Result<Option<EndpointConfig>> {
    match (existing, uri) {
        (Some(mut endpoint), uri) => {
            if let Some(uri) = uri {
                endpoint.uri = uri.clone();
            }
            if let Some(database) = database {
                endpoint.database = database.clone();
            }
            Ok(Some(endpoint))
        }
        (None, Some(uri)) => match database {
            Some(database) => Ok(Some(EndpointConfig::new(uri.clone(), database.clone()))),
            None => bail!("--{label}-uri requires --database or --{label}-db"),
        },
        (None, None) => Ok(None),
    }
}

fn confirm_overwrite(config: &JobConfig) -> anyhow::Result<bool> {
    let database = config
        .target
        .as_ref()
        .map(|t| t.database.as_str())
        .unwrap_or("the target");
    let scope = if config.collections.is_empty() {
        "every source collection".to_string()
    } else {
        config.collections.join(", ")
    };

    Confirm::new()
        .with_prompt(format!("Delete and replace {scope} in {database}?"))
        .default(false)
        .interact()
        .context("confirmation prompt failed (pass --yes to skip it)")
}

fn print_results(results: &[CollectionResult], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }

    for result in results {
        match &result.error {
            Some(error) => println!(
                "{}: {} ({}/{}): {}",
                result.name, result.status, result.copied, result.total, error
            ),
            None => println!("{}: {} ({}/{})", result.name, result.status, result.copied, result.total),
        }
    }
    Ok(())
}
