use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use pulse_core::HeartbeatCoalescer;
use pulse_db::SqliteDatastore;
use pulse_query::QueryEngine;
use tracing_subscriber::EnvFilter;

use pulse_cli::commands::{buckets, events, heartbeat, insert, query, util};
use pulse_cli::{BucketsAction, Cli, Commands, Config};

/// Load config and open the datastore, ensuring the parent directory exists.
fn open_store(config_path: Option<&Path>) -> Result<(Arc<SqliteDatastore>, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let store = SqliteDatastore::open(&config.database_path).with_context(|| {
        format!("failed to open database {}", config.database_path.display())
    })?;
    Ok((Arc::new(store), config))
}

fn read_script(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut script = String::new();
        io::stdin()
            .read_to_string(&mut script)
            .context("failed to read script from stdin")?;
        return Ok(script);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // try_init: tests may have installed a subscriber already
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let (store, config) = open_store(cli.config.as_deref())?;
    let mut stdout = io::stdout().lock();

    match command {
        Commands::Buckets(BucketsAction::List { json }) => {
            buckets::list(&mut stdout, store.as_ref(), *json)?;
        }
        Commands::Buckets(BucketsAction::Create {
            id,
            kind,
            client,
            hostname,
            name,
        }) => {
            let new = buckets::NewBucket {
                id,
                kind,
                client,
                hostname: hostname.as_deref(),
                name: name.as_deref(),
            };
            buckets::create(&mut stdout, store.as_ref(), &new)?;
        }
        Commands::Buckets(BucketsAction::Delete { id }) => {
            buckets::delete(&mut stdout, store.as_ref(), id)?;
        }
        Commands::Events {
            bucket,
            start,
            end,
            limit,
        } => {
            let now = Utc::now();
            let start = util::parse_optional_time(start.as_deref(), now)?;
            let end = util::parse_optional_time(end.as_deref(), now)?;
            events::run(&mut stdout, store.as_ref(), bucket, start, end, *limit)?;
        }
        Commands::Insert { bucket } => {
            insert::run(&mut io::stdin().lock(), &mut stdout, store.as_ref(), bucket)?;
        }
        Commands::Heartbeat {
            bucket,
            data,
            timestamp,
            duration,
            pulsetime,
        } => {
            let beat = heartbeat::Heartbeat {
                timestamp: util::parse_optional_time(timestamp.as_deref(), Utc::now())?
                    .unwrap_or_else(Utc::now),
                duration_secs: *duration,
                data: util::parse_data(data)?,
            };
            let pulsetime =
                pulse_core::secs_to_delta(pulsetime.unwrap_or(config.heartbeat.pulsetime_secs))
                    .context("invalid pulsetime")?;
            let coalescer = HeartbeatCoalescer::new(store, config.coalescer_config());
            heartbeat::run(&mut stdout, &coalescer, bucket, beat, pulsetime)?;
        }
        Commands::Query {
            script,
            periods,
            buckets,
        } => {
            let source = read_script(script)?;
            let engine = QueryEngine::new(store, config.query_config());
            let inputs = query::inputs(periods, buckets);
            query::run(&mut stdout, &engine, &source, &inputs)?;
        }
    }

    Ok(())
}
