//! CLI argument definitions using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// News Curator: keeps the news source catalog in step with editor feedback
#[derive(Parser)]
#[command(name = "news-curator")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "curator.toml")]
    pub config: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one reconciliation cycle and print its summary
    Reconcile {
        /// Additional feedback file (bare array or object with `responses`)
        #[arg(long, value_name = "FILE")]
        extra_feedback: Option<PathBuf>,

        /// Override the configured minimum score for candidates
        #[arg(long)]
        min_score: Option<f64>,
    },

    /// Load a catalog snapshot into the store
    Seed {
        /// Snapshot to load (default: the configured snapshot path)
        #[arg(long, value_name = "FILE")]
        catalog: Option<PathBuf>,
    },

    /// Export the store as a catalog snapshot
    Dump {
        /// Output path (default: the configured snapshot path)
        #[arg(long, value_name = "FILE")]
        catalog: Option<PathBuf>,
    },

    /// Append feedback entries to the pending queue
    Enqueue {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Show catalog size by status and the pending queue length
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_reconcile_flags() {
        let cli = Cli::parse_from([
            "news-curator",
            "reconcile",
            "--extra-feedback",
            "extra.json",
            "--min-score",
            "0.5",
        ]);
        assert_eq!(cli.config, PathBuf::from("curator.toml"));
        match cli.command {
            Commands::Reconcile {
                extra_feedback,
                min_score,
            } => {
                assert_eq!(extra_feedback, Some(PathBuf::from("extra.json")));
                assert_eq!(min_score, Some(0.5));
            }
            _ => panic!("expected reconcile"),
        }
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["news-curator", "status", "--config", "other.toml"]);
        assert_eq!(cli.config, PathBuf::from("other.toml"));
        assert!(matches!(cli.command, Commands::Status));
    }
}
