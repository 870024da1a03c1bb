//! Tabwise CLI: the main entry point.
//!
//! Commands:
//! - `chat`       Interactive or single-message chat, optionally about a page
//! - `summarize`  TL;DR of a text file
//! - `status`     Show configuration and host status
//! - `doctor`     Diagnose whether this machine can run the assistant

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "tabwise",
    about = "Tabwise: an on-device page assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.tabwise/config.toml
    #[arg(long, global = true, env = "TABWISE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Treat this text file as the page being viewed
        #[arg(long)]
        page: Option<PathBuf>,

        /// Wait for the whole response instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },

    /// Summarize a text file as a TL;DR
    Summarize {
        /// File holding the page text
        file: PathBuf,

        /// Page title (defaults to the file name)
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Show configuration and host status
    Status,

    /// Diagnose system health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Chat {
            message,
            page,
            no_stream,
        } => commands::chat::run(config, message, page, !no_stream).await?,
        Commands::Summarize { file, title } => {
            commands::summarize::run(config, file, title).await?
        }
        Commands::Status => commands::status::run(config).await?,
        Commands::Doctor => commands::doctor::run(config).await?,
    }

    Ok(())
}
