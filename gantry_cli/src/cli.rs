//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "gantry", version, about = "Gantry sensor acquisition CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/gantry.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides [logging].level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Acquire one record per tick until the duration elapses or a signal arrives
    Run {
        /// Override run.duration_s (0 runs until interrupted)
        #[arg(long, value_name = "SECS")]
        duration_s: Option<u64>,
        /// Override run.period_ms
        #[arg(long, value_name = "MS")]
        period_ms: Option<u64>,
        /// Stop after this many persisted ticks
        #[arg(long, value_name = "N")]
        max_ticks: Option<u64>,
        /// Override output.sensor_log
        #[arg(long, value_name = "FILE")]
        sensor_log: Option<PathBuf>,
        /// Override output.image_log
        #[arg(long, value_name = "FILE")]
        image_log: Option<PathBuf>,
        /// Read sensors on worker threads instead of one after another
        #[arg(long, action = ArgAction::SetTrue)]
        concurrent: bool,
        /// Print tick latency stats with the summary
        #[arg(long, action = ArgAction::SetTrue)]
        stats: bool,
    },
    /// Open every configured sensor and take one reading from each
    SelfCheck,
}
