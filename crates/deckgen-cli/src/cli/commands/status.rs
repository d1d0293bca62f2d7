//! `deckgen status` – one-shot status query.

use anyhow::{Context, Result};
use deckgen_core::task::{clamp_progress, TaskStatus};
use deckgen_core::DeckClient;

use super::cancel_on_ctrl_c;

pub async fn run_status(client: &DeckClient, job_id: &str) -> Result<()> {
    let token = cancel_on_ctrl_c();
    let status = client
        .status(job_id, &token)
        .await
        .with_context(|| format!("query status of {}", job_id))?;
    let progress = status
        .progress
        .map(|p| format!("{}%", clamp_progress(p)))
        .unwrap_or_else(|| "-".to_string());
    println!("{:<24} {:<18} {:<6} {}", "JOB", "STATUS", "PROG", "MESSAGE");
    println!(
        "{:<24} {:<18} {:<6} {}",
        job_id,
        TaskStatus::from_server(&status.status),
        progress,
        status.message.as_deref().unwrap_or("")
    );
    Ok(())
}
