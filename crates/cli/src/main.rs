mod cli;
mod state;

use clap::{Parser, Subcommand};
use cli::{args::Args, op::Op, Cat, Grant, Hash, Init, Key, Ls, Mkdir, Put, Rm, SyncOp};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

command_enum! {
    (Init, Init),
    (Key, Key),
    (Mkdir, Mkdir),
    (Put, Put),
    (Cat, Cat),
    (Ls, Ls),
    (Rm, Rm),
    (Grant, Grant),
    (Hash, Hash),
    (Sync, SyncOp),
}

/// Logs go to stderr so command output stays pipeable
fn init_logging(log_level: &str) {
    let level = log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::WARN);
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    tracing_subscriber::registry().with(stderr_layer).init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.log_level);

    let ctx = cli::op::OpContext::new(args.state_path);

    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
