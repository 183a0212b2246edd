//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pulse_core::Period;

/// Activity event store and query runner.
///
/// Stores timestamped events in buckets, folds watcher heartbeats into
/// them, and evaluates analysis scripts over time periods.
#[derive(Debug, Parser)]
#[command(name = "pulse", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage buckets.
    #[command(subcommand)]
    Buckets(BucketsAction),

    /// Print a bucket's events as JSONL, newest first.
    Events {
        bucket: String,

        /// Only events ending after this time (RFC3339 or e.g. "2 hours ago").
        #[arg(long)]
        start: Option<String>,

        /// Only events starting before this time.
        #[arg(long)]
        end: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Insert events read from stdin (a JSON array or one event per line).
    Insert { bucket: String },

    /// Send one heartbeat, merging it into the bucket's last event if possible.
    Heartbeat {
        bucket: String,

        /// Event data as a JSON object.
        #[arg(long)]
        data: String,

        /// Heartbeat time; defaults to now.
        #[arg(long)]
        timestamp: Option<String>,

        /// Heartbeat duration in seconds.
        #[arg(long, default_value_t = 0.0)]
        duration: f64,

        /// Merge window in seconds; defaults to `heartbeat.pulsetime_secs`.
        #[arg(long)]
        pulsetime: Option<f64>,
    },

    /// Run a query script once per period and print the results as JSON.
    Query {
        /// Script file, or `-` for stdin.
        script: PathBuf,

        /// Period to evaluate, as `<start>/<end>`. Repeat for a batch.
        #[arg(long = "period", required = true)]
        periods: Vec<Period>,

        /// Bucket alias visible to `query_bucket`, as `alias=bucket_id`.
        #[arg(long = "bucket", value_parser = parse_alias)]
        buckets: Vec<(String, String)>,
    },
}

#[derive(Debug, Subcommand)]
pub enum BucketsAction {
    /// List all buckets.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Create a bucket.
    Create {
        id: String,

        #[arg(long = "type")]
        kind: String,

        #[arg(long, default_value = "pulse-cli")]
        client: String,

        /// Defaults to this machine's hostname.
        #[arg(long)]
        hostname: Option<String>,

        #[arg(long)]
        name: Option<String>,
    },

    /// Delete a bucket and all of its events.
    Delete { id: String },
}

fn parse_alias(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((alias, id)) if !alias.is_empty() && !id.is_empty() => {
            Ok((alias.to_string(), id.to_string()))
        }
        _ => Err(format!("expected alias=bucket_id, got {s:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_batch() {
        let cli = Cli::try_parse_from([
            "pulse",
            "query",
            "report.pulse",
            "--period",
            "2025-01-01T00:00:00Z/2025-01-02T00:00:00Z",
            "--period",
            "2025-01-02T00:00:00Z/2025-01-03T00:00:00Z",
            "--bucket",
            "window=aw-watcher-window_laptop",
        ])
        .unwrap();

        let Some(Commands::Query {
            periods, buckets, ..
        }) = cli.command
        else {
            panic!("expected query command");
        };
        assert_eq!(periods.len(), 2);
        assert_eq!(
            buckets,
            [("window".to_string(), "aw-watcher-window_laptop".to_string())]
        );
    }

    #[test]
    fn rejects_inverted_period() {
        let result = Cli::try_parse_from([
            "pulse",
            "query",
            "report.pulse",
            "--period",
            "2025-01-02T00:00:00Z/2025-01-01T00:00:00Z",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn alias_requires_both_sides() {
        assert!(parse_alias("window=").is_err());
        assert!(parse_alias("=b1").is_err());
        assert!(parse_alias("b1").is_err());
        assert_eq!(
            parse_alias("w=a=b").unwrap(),
            ("w".to_string(), "a=b".to_string())
        );
    }
}
