use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[clap(name = "waybill", version, about = "Waybill pool and carrier submission tool")]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

/// Sub-pool selection; defaults come from `WAYBILL_VENDOR` / `WAYBILL_SERIES`.
#[derive(Debug, Args)]
pub struct PoolArgs {
    #[clap(long)]
    pub vendor: Option<String>,

    #[clap(long)]
    pub series: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create tables and indexes
    Migrate,

    /// Add waybill numbers to a sub-pool; existing codes are skipped
    Provision {
        #[clap(flatten)]
        pool: PoolArgs,

        /// File with one waybill number per line
        #[clap(long)]
        from_file: Option<PathBuf>,

        /// Store as test records (never allocated)
        #[clap(long)]
        test: bool,

        codes: Vec<String>,
    },

    /// Take the next free waybill
    Allocate {
        #[clap(flatten)]
        pool: PoolArgs,
    },

    /// Return a waybill to the pool
    Release {
        code: String,

        #[clap(long)]
        vendor: Option<String>,
    },

    /// Record that the carrier already holds a waybill
    MarkConsumed {
        code: String,

        #[clap(long)]
        vendor: Option<String>,
    },

    /// Show whether a waybill exists and is free
    Check {
        code: String,

        #[clap(long)]
        vendor: Option<String>,
    },

    /// Pool counters for a sub-pool
    Stats {
        #[clap(flatten)]
        pool: PoolArgs,
    },

    /// Submit a manifest to the carrier
    Submit {
        /// JSON file: {"reference": "...", "shipment": {...}}
        #[clap(long)]
        manifest: PathBuf,

        /// Use this waybill instead of allocating one
        #[clap(long)]
        waybill: Option<String>,
    },
}

/// Splits a provisioning file into codes, ignoring blank lines and `#` comments.
pub(crate) fn parse_code_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}
