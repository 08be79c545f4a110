//! Timbre CLI - Headless Similarity Search
//!
//! Features:
//! - Plain similarity search over a frame file
//! - Label-guided refinement (prototype / logistic)
//! - Single-window fingerprints

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

/// Timbre CLI - Find every moment that sounds like a selection
#[derive(Parser, Debug)]
#[command(name = "timbre-cli")]
#[command(version)]
#[command(about = "Audio similarity search over precomputed frames", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search the track for windows similar to a query
    Search {
        /// Frame file (JSON: times, mel, onset, mfcc)
        frames: PathBuf,

        /// Query start in seconds
        #[arg(short, long)]
        start: f64,

        /// Query end in seconds
        #[arg(short, long)]
        end: f64,

        /// Search options file (JSON)
        #[arg(short, long)]
        options: Option<PathBuf>,

        /// Candidate threshold override
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Scan hop override in seconds
        #[arg(long)]
        hop: Option<f64>,

        /// Do not report the query itself as a candidate
        #[arg(long)]
        skip_query: bool,
    },

    /// Search with accept/reject labels
    Refine {
        /// Frame file (JSON: times, mel, onset, mfcc)
        frames: PathBuf,

        /// Query start in seconds
        #[arg(short, long)]
        start: f64,

        /// Query end in seconds
        #[arg(short, long)]
        end: f64,

        /// Labels file (JSON array of {start, end, status, source})
        #[arg(short, long)]
        labels: PathBuf,

        /// Search options file (JSON)
        #[arg(short, long)]
        options: Option<PathBuf>,

        /// Candidate threshold override
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Scan hop override in seconds
        #[arg(long)]
        hop: Option<f64>,

        /// Do not report the query itself as a candidate
        #[arg(long)]
        skip_query: bool,
    },

    /// Fingerprint one window
    Fingerprint {
        /// Frame file (JSON: times, mel, onset, mfcc)
        frames: PathBuf,

        /// Window start in seconds
        #[arg(short, long)]
        start: f64,

        /// Window end in seconds
        #[arg(short, long)]
        end: f64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Search { frames, start, end, options, threshold, hop, skip_query } => {
            let overrides = commands::Overrides { threshold, hop, skip_query };
            commands::search(&frames, start, end, options, overrides, &cli.format)?;
        }
        Commands::Refine { frames, start, end, labels, options, threshold, hop, skip_query } => {
            let overrides = commands::Overrides { threshold, hop, skip_query };
            commands::refine(&frames, start, end, &labels, options, overrides, &cli.format)?;
        }
        Commands::Fingerprint { frames, start, end } => {
            commands::fingerprint(&frames, start, end, &cli.format)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search() {
        let cli = Cli::try_parse_from([
            "timbre-cli", "-f", "json", "search", "track.json", "--start", "10", "--end", "10.5",
            "--threshold", "0.6", "--skip-query",
        ])
        .unwrap();

        assert_eq!(cli.format, "json");
        match cli.command {
            Commands::Search { start, end, threshold, skip_query, hop, .. } => {
                assert_eq!(start, 10.0);
                assert_eq!(end, 10.5);
                assert_eq!(threshold, Some(0.6));
                assert!(skip_query);
                assert!(hop.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_refine_requires_labels() {
        let err = Cli::try_parse_from(["timbre-cli", "refine", "track.json", "-s", "1", "-e", "2"]);
        assert!(err.is_err());

        let cli = Cli::try_parse_from([
            "timbre-cli", "-v", "refine", "track.json", "-s", "1", "-e", "2", "-l", "labels.json",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Refine { .. }));
    }

    #[test]
    fn test_parse_fingerprint() {
        let cli = Cli::try_parse_from([
            "timbre-cli", "fingerprint", "track.json", "-s", "0", "-e", "0.5",
        ])
        .unwrap();
        assert_eq!(cli.format, "text");
        assert!(matches!(cli.command, Commands::Fingerprint { .. }));
    }
}
