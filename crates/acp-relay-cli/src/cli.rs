//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "acp-relay")]
#[command(about = "Drive ACP sessions from the terminal", long_about = None)]
pub struct Cli {
    /// Gateway config file (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Session key to bind
    #[arg(short, long, default_value = "cli:main")]
    pub session_key: String,

    /// Agent id (defaults to acp.defaultAgent)
    #[arg(short, long)]
    pub agent: Option<String>,

    /// Backend id (defaults to acp.backend)
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Channel name used for stream settings
    #[arg(long)]
    pub channel: Option<String>,

    /// Absolute working directory for the session
    #[arg(long)]
    pub cwd: Option<String>,

    /// Log filter, e.g. `debug` or `acp_relay_core=trace`
    #[arg(long)]
    pub log_level: Option<String>,
}
