//! famwatch CLI - watch a directory tree for changes

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

mod cmd;

/// famwatch - recursive file change monitor
#[derive(Parser)]
#[command(name = "famwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a directory and print every change
    Watch {
        /// Directory to watch
        path: PathBuf,
        /// Monitor name used for thread names and logs
        #[arg(long, default_value = "fam")]
        name: String,
        /// Config file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Show the effective configuration
    Config {
        /// Config file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print the default configuration as TOML instead
        #[arg(long)]
        example: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Watch {
            path,
            name,
            config,
            duration,
            json,
        } => {
            cmd::watch::run(cmd::watch::WatchArgs {
                path,
                name,
                config,
                duration,
                json,
            })
            .await
        }
        Commands::Config { config, example } => {
            if example {
                cmd::config::run_example().await
            } else {
                cmd::config::run_show(config.as_deref()).await
            }
        }
    }
}
