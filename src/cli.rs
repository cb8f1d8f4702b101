//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Generate dynamic help text for the flasher argument
fn flasher_help() -> String {
    format!(
        "Flash with this backend instead of picking one by platform [available: {}]",
        boardflash_flash::backend_names_short()
    )
}

#[derive(Parser)]
#[command(name = "boardflash")]
#[command(author, version, about = "Flash firmware to attached development boards", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (TOML format)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options of the flash command
#[derive(clap::Args, Debug, Clone)]
pub struct FlashArgs {
    /// Firmware image to flash
    #[arg(short, long)]
    pub input: PathBuf,

    /// Platform of the boards to flash, e.g. K64F
    #[arg(short = 't', long = "platform")]
    pub platform: Option<String>,

    /// Target id, target id prefix, or "all" (repeat for an explicit list)
    #[arg(long = "tid", alias = "target-id")]
    pub target_ids: Vec<String>,

    /// Flashing method
    #[arg(short, long, default_value = "simple")]
    pub method: String,

    /// Do not reset the board after flashing
    #[arg(long)]
    pub no_reset: bool,

    /// Backend to use
    #[arg(long, help = flasher_help())]
    pub flasher: Option<String>,

    /// Flash several boards at the same time
    #[arg(long)]
    pub parallel: bool,

    /// Give up on a board after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Flash a firmware image to one or more boards
    Flash(FlashArgs),

    /// List attached boards
    ListDevices {
        /// Print the inventory as JSON
        #[arg(long)]
        json: bool,
    },

    /// List available backends
    ListBackends,

    /// List platforms the backends can flash
    ListPlatforms,
}
