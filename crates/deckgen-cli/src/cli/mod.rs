//! CLI for the deckgen slide-deck generation client.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use deckgen_core::config;
use deckgen_core::DeckClient;

use commands::{run_config, run_download, run_generate, run_status, run_watch, GenerateArgs};

/// Top-level CLI for deckgen.
#[derive(Debug, Parser)]
#[command(name = "deckgen")]
#[command(about = "deckgen: submit and follow slide-deck generation jobs", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Submit a generation job and follow it to completion.
    Generate(GenerateArgs),

    /// Query the status of a job once.
    Status {
        /// Job identifier returned by `generate`.
        job_id: String,
    },

    /// Poll an existing job until it finishes.
    Watch {
        /// Job identifier returned by `generate`.
        job_id: String,
    },

    /// Print the download URL of a completed job.
    Download {
        /// Job identifier returned by `generate`.
        job_id: String,
    },

    /// Print the effective configuration (API key redacted).
    Config,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg.redacted());

        if let CliCommand::Config = cli.command {
            return run_config(&cfg);
        }

        let client = DeckClient::new(cfg)?;
        let _sweepers = client.spawn_cache_sweeper();

        match cli.command {
            CliCommand::Generate(args) => run_generate(&client, args).await?,
            CliCommand::Status { job_id } => run_status(&client, &job_id).await?,
            CliCommand::Watch { job_id } => run_watch(&client, &job_id).await?,
            CliCommand::Download { job_id } => run_download(&client, &job_id).await?,
            CliCommand::Config => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
