pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "syncable")]
#[command(about = "Encrypted, access controlled object stores that sync")]
pub struct Args {
    /// Path to the state directory (defaults to ~/.syncable)
    #[arg(long, global = true)]
    pub state_path: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: crate::Command,
}
