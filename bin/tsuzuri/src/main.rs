use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

mod commands;

#[derive(Parser, Clone, Debug)]
#[clap(name = "tsuzuri", version, about)]
struct TsuzuriArgs {
    /// Debug output
    #[clap(long, global = true, alias = "debug")]
    verbose: bool,

    /// TOML file with download settings. Command line options take precedence.
    #[clap(short, long, global = true, env = "TSUZURI_CONFIG")]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: commands::TsuzuriCommand,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = TsuzuriArgs::parse();

    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = commands::load_config(args.config.as_deref())?;
    args.command.run(config).await
}
