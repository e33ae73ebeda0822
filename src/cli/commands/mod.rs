//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod analyze;
mod check;
mod config_cmd;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "docsift")]
#[command(about = "Asynchronous document analysis service")]
#[command(version)]
pub struct Cli {
    /// Data directory for uploads and analyzer output (overrides config file)
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service
    Serve {
        /// Address to bind to: PORT, HOST, or HOST:PORT (default: from config, 127.0.0.1:8000)
        #[arg(long, short)]
        bind: Option<String>,
    },

    /// Analyze one local file through the worker pool and print or save the artifacts
    Analyze {
        /// Document to analyze
        file: PathBuf,
        /// Let the analyzer pick a text-layer strategy instead of forcing OCR
        #[arg(long)]
        no_ocr: bool,
        /// Directory to write artifacts into (default: print markdown to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check analyzer and GPU availability
    Check,

    /// Print the effective configuration as TOML
    Config,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
        data: cli.data,
    };
    let (settings, config) = load_settings_with_options(options).await?;

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.bind.clone());
            serve::cmd_serve(&settings, &bind).await
        }
        Commands::Analyze {
            file,
            no_ocr,
            output,
        } => analyze::cmd_analyze(&settings, &file, !no_ocr, output.as_deref()).await,
        Commands::Check => check::cmd_check(&settings).await,
        Commands::Config => config_cmd::cmd_config_show(&settings, &config),
    }
}
