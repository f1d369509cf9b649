//! CLI struct definitions for the Warden operator command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use crate::core::trace::TraceOutcome;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "warden",
    version = env!("CARGO_PKG_VERSION"),
    about = "Operator tooling for Warden ownership rules and delegation audits."
)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Validate a rules file: unknown owners, malformed patterns, ambiguous rules.
    Validate {
        /// Path to the warden TOML configuration.
        #[clap(long)]
        config: PathBuf,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Resolve the owner of one or more paths.
    Owner {
        #[clap(long)]
        config: PathBuf,
        /// Repository-relative paths to resolve.
        #[clap(required = true)]
        paths: Vec<String>,
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// List the patterns owned by an actor.
    Allowed {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        actor: String,
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Query persisted delegation traces.
    Traces {
        #[clap(flatten)]
        source: SourceArgs,
        /// Only traces requested by this actor.
        #[clap(long)]
        actor: Option<String>,
        /// Only traces whose owner is this actor.
        #[clap(long)]
        owner: Option<String>,
        /// Only traces with this outcome.
        #[clap(long, value_enum)]
        outcome: Option<OutcomeArg>,
        /// Only paths under this prefix.
        #[clap(long)]
        prefix: Option<String>,
        /// Show at most N of the most recent matches.
        #[clap(long)]
        limit: Option<usize>,
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Aggregate delegation statistics.
    Stats {
        #[clap(flatten)]
        source: SourceArgs,
        #[clap(long, default_value = "text")]
        format: String,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct SourceArgs {
    /// Audit store: a SQLite database (or a directory holding `audit.db`), or a `.jsonl` trace file.
    #[clap(long)]
    pub source: PathBuf,
    /// Only consider traces from the last N seconds.
    #[clap(long)]
    pub since_secs: Option<u64>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
#[value(rename_all = "snake_case")]
pub(crate) enum OutcomeArg {
    Direct,
    Delegated,
    PolicyGap,
}

impl From<OutcomeArg> for TraceOutcome {
    fn from(value: OutcomeArg) -> Self {
        match value {
            OutcomeArg::Direct => TraceOutcome::Direct,
            OutcomeArg::Delegated => TraceOutcome::Delegated,
            OutcomeArg::PolicyGap => TraceOutcome::PolicyGap,
        }
    }
}
