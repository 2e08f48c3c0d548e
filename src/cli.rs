//! Command-line interface definitions for finscrap.
//!
//! Global options override the YAML config file; most can also be set
//! through environment variables.
//!
//! ```sh
//! # One scrape of every source into ./data
//! finscrap --data-dir ./data scrape
//!
//! # Daily at 07:00 local time, storing in S3
//! finscrap --storage s3 schedule --hour 7
//!
//! # Verify credentials and the fallback directory before scheduling
//! finscrap --storage rclone check
//!
//! # January's LiveMint articles mentioning "rupee"
//! finscrap export --source livemint --search rupee --from 2024-01-01 --to 2024-01-31 -o jan.csv
//! ```

use crate::config::BackendKind;
use crate::models::Source;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to config.yaml file
    #[arg(short, long, env = "FINSCRAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Storage backend, overriding the config file
    #[arg(long, env = "FINSCRAP_STORAGE", value_enum)]
    pub storage: Option<BackendKind>,

    /// Directory for the local backend
    #[arg(long, env = "FINSCRAP_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch, merge and store every configured source once
    Scrape {
        /// Listing pages to walk per category
        #[arg(long)]
        max_pages: Option<u32>,

        /// Restrict to these sources (repeatable)
        #[arg(long = "source")]
        sources: Vec<Source>,
    },
    /// Scrape now, then every day at the given local hour
    Schedule {
        #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u32).range(0..24))]
        hour: u32,

        #[arg(long)]
        max_pages: Option<u32>,
    },
    /// Export stored articles as CSV
    Export {
        #[arg(long)]
        source: Option<Source>,

        /// Case-insensitive text to look for in title or content
        #[arg(long)]
        search: Option<String>,

        /// Earliest published date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Latest published date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Output file, or `-` for stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Limit Content to this many characters
        #[arg(long)]
        truncate: Option<usize>,
    },
    /// Print record counts and stored bytes for the active backend
    Info,
    /// Check the storage credentials and the fallback directory without scraping
    Check,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_scrape_parsing() {
        let cli = Cli::parse_from([
            "finscrap",
            "--storage",
            "rclone",
            "scrape",
            "--max-pages",
            "2",
            "--source",
            "livemint",
            "--source",
            "MoneyControl",
        ]);

        assert_eq!(cli.storage, Some(BackendKind::Rclone));
        match cli.command {
            Command::Scrape { max_pages, sources } => {
                assert_eq!(max_pages, Some(2));
                assert_eq!(sources, vec![Source::LiveMint, Source::MoneyControl]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_export_flags() {
        let cli = Cli::parse_from([
            "finscrap",
            "--data-dir",
            "/tmp/data",
            "export",
            "--from",
            "2024-01-01",
            "--to",
            "2024-01-31",
            "-o",
            "-",
            "--truncate",
            "200",
        ]);

        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/data")));
        match cli.command {
            Command::Export {
                from, to, output, truncate, ..
            } => {
                assert_eq!(from, NaiveDate::from_ymd_opt(2024, 1, 1));
                assert_eq!(to, NaiveDate::from_ymd_opt(2024, 1, 31));
                assert_eq!(output, Some(PathBuf::from("-")));
                assert_eq!(truncate, Some(200));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_schedule_hour_default_and_range() {
        let cli = Cli::parse_from(["finscrap", "schedule"]);
        assert!(matches!(cli.command, Command::Schedule { hour: 7, .. }));
        assert!(Cli::try_parse_from(["finscrap", "schedule", "--hour", "24"]).is_err());
    }

    #[test]
    fn test_cli_check_parsing() {
        let cli = Cli::parse_from(["finscrap", "--storage", "s3", "check"]);
        assert_eq!(cli.storage, Some(BackendKind::S3));
        assert!(matches!(cli.command, Command::Check));
    }

    #[test]
    fn test_unknown_source_rejected() {
        assert!(Cli::try_parse_from(["finscrap", "scrape", "--source", "reuters"]).is_err());
    }
}
