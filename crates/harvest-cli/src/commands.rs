use clap::{Args, Subcommand, ValueEnum};
use harvest_core::models::HarvestStatus;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    #[arg(long, global = true, help = "Directory holding the state and queue databases")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, global = true, help = "Load KEY=VALUE settings from this file")]
    pub env_file: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "Log filter, e.g. \"debug\" or \"harvest_sync=trace\" (overrides RUST_LOG)"
    )]
    pub log_level: Option<String>,

    #[arg(
        long,
        global = true,
        help = "Deadline for each store and broker call in milliseconds, 0 disables it"
    )]
    pub timeout_ms: Option<u64>,

    #[arg(long, global = true, help = "Attempts per command before giving up")]
    pub retries: Option<usize>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the last persisted checkpoint
    Status {
        #[arg(long, help = "Print the checkpoint as JSON")]
        json: bool,
    },
    /// Persist a new checkpoint, staging and requeuing the given records
    Commit {
        #[arg(long, help = "Harvest status to record")]
        status: HarvestStatus,

        #[arg(
            long = "field",
            value_name = "KEY=VALUE",
            value_parser = parse_field,
            help = "Extra checkpoint field; VALUE is read as JSON, or as a string if it is not JSON"
        )]
        fields: Vec<(String, Value)>,

        #[arg(long, help = "File with one JSON record per line")]
        records: Option<PathBuf>,

        #[arg(long, help = "Print the commit report as JSON")]
        json: bool,
    },
    /// Drain the staging queue against the last checkpoint
    Recover {
        #[arg(long, help = "Print the drain report as JSON")]
        json: bool,
    },
    /// Show staging and main queue depths
    Depth {
        #[arg(long, help = "Print the depths as JSON")]
        json: bool,
    },
    /// List messages at the head of a queue without consuming them
    Peek {
        #[arg(long, value_enum)]
        queue: QueueSide,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueSide {
    Staging,
    Main,
}

pub fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
