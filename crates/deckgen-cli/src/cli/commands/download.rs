//! `deckgen download` – print the artifact URL of a job.

use anyhow::{Context, Result};
use deckgen_core::DeckClient;

use super::cancel_on_ctrl_c;

pub async fn run_download(client: &DeckClient, job_id: &str) -> Result<()> {
    let token = cancel_on_ctrl_c();
    let url = client
        .download_url_for(job_id, &token)
        .await
        .with_context(|| format!("resolve download of {}", job_id))?;
    println!("{}", url);
    Ok(())
}
