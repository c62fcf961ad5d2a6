//! Story process - one JSON request on stdin, one JSON line on stdout
//!
//! Usage:
//!   process-story [ingest] < request.json
//!   process-story similar < query.json
//!
//! Diagnostics go to stderr so stdout carries only the result line.
//!
//! Author: hephaex@gmail.com

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use story_core::{AppConfig, LoggingConfig, StoryError};
use story_ingest::{build_pipeline, handle_ingest_with, handle_similar_with};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Parser)]
#[command(name = "process-story")]
#[command(about = "Embed a user's story and replace their vector")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override its values
    #[arg(long, env = "STORY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Default)]
enum Commands {
    /// Ingest a story, replacing the owner's previous vector (default)
    #[default]
    Ingest,
    /// Find stories similar to the given text
    Similar,
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig, StoryError> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.clone().into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref());
    match &config {
        Ok(config) => init_tracing(&config.logging),
        Err(_) => init_tracing(&LoggingConfig::default()),
    }

    let mut raw = String::new();
    if let Err(e) = tokio::io::stdin().read_to_string(&mut raw).await {
        // Unreadable input is reported as invalid JSON
        tracing::error!(error = %e, "Failed to read stdin");
        raw.clear();
    }

    let line = match cli.command.unwrap_or_default() {
        Commands::Ingest => handle_ingest_with(&raw, move || build_pipeline(&config?))
            .await
            .to_json_line(),
        Commands::Similar => handle_similar_with(&raw, move || build_pipeline(&config?))
            .await
            .to_json_line(),
    };

    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;

    Ok(())
}
