//! Command-line options for `ferryd` and `ferry`

use clap::{ArgAction, Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum JournalFormat {
    #[default]
    Text,
    Jsonl,
}

/// Server daemon options. Unset flags fall back to the config file, then
/// to built-in defaults.
#[derive(Clone, Debug, Default, Parser)]
#[command(name = "ferryd", version, about = "ferry file server")]
pub struct DaemonOpts {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Bind address (host:port)
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory to serve; created if missing
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Bytes per bulk read/write
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Append a record of every transfer to this file
    #[arg(long)]
    pub journal: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub journal_format: Option<JournalFormat>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Interactive client options
#[derive(Clone, Debug, Default, Parser)]
#[command(name = "ferry", version, about = "ferry file client")]
pub struct ClientOpts {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Server to use (ferry://host:port or host:port)
    #[arg(long)]
    pub remote: Option<String>,

    /// Where downloads are written
    #[arg(long)]
    pub download_dir: Option<PathBuf>,

    /// Bytes per bulk read/write
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Answer yes to every removal prompt
    #[arg(short, long, action = ArgAction::SetTrue)]
    pub yes: bool,

    /// Connect before the first prompt
    #[arg(long, action = ArgAction::SetTrue)]
    pub connect: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins
    #[arg(long)]
    pub log_level: Option<String>,
}
