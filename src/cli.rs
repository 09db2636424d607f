use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "avdsup")]
#[command(about = "Boot an Android emulator and wait until its device is ready")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Boot an AVD and print the ready device serial
    Start {
        /// Name of the AVD to boot (must already exist)
        #[arg(long)]
        avd: String,

        /// Overall deadline in seconds; elapsing it is a hard failure
        #[arg(long, default_value = "600")]
        timeout: u64,

        /// Also write the ready serial to this file
        #[arg(long, value_name = "PATH")]
        serial_file: Option<PathBuf>,

        /// API level of the image (recorded for diagnostics only)
        #[arg(long)]
        api_level: Option<String>,

        /// OS tag of the image, e.g. google_apis (recorded for diagnostics only)
        #[arg(long)]
        tag: Option<String>,

        /// ABI of the image, e.g. x86_64 (recorded for diagnostics only)
        #[arg(long)]
        abi: Option<String>,

        /// Extra flags passed through to the emulator binary (after --)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        extra_args: Vec<String>,
    },
    /// List devices currently known to the registry
    Devices {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Best-effort kill of one device
    Kill {
        /// Device serial
        serial: String,
    },
    /// Check that the SDK and the device registry are usable
    Doctor,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_name = "SHELL")]
        shell: clap_complete::Shell,
    },
}
