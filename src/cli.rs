//! Command-line interface for reelbatch
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Batch scheduler for video localization
#[derive(Parser, Debug)]
#[command(
    name = "reelbatch",
    version,
    about = "Batch scheduler for video localization"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only print warnings and the final summary
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run URLs through the pipeline with dry-run stages
    Run {
        /// URLs to process; free text containing URLs is accepted too
        urls: Vec<String>,

        /// Read URLs from a file ("-" for stdin)
        #[arg(long, short = 'f', value_name = "PATH")]
        file: Option<PathBuf>,

        /// Print events as JSON lines on stdout
        #[arg(long)]
        json: bool,

        /// Override the dry-run stage delay. Examples: 0, 500ms, 2s
        #[arg(long, value_name = "DURATION", value_parser = parse_delay)]
        delay: Option<Duration>,
    },

    /// List configured API keys with masked secrets
    Keys,

    /// List pipeline stages in execution order
    Stages,

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective configuration (secrets masked)
    Show,
    /// Print the configuration file path
    Path,
}

/// Parse a delay string: bare numbers are seconds, otherwise humantime.
fn parse_delay(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}
