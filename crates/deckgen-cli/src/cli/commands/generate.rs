//! `deckgen generate` – submit a job and, unless detached, follow it.

use anyhow::{Context, Result};
use clap::Args;
use deckgen_core::api::GenerateRequest;
use deckgen_core::DeckClient;

use super::cancel_on_ctrl_c;
use super::watch::{follow, report};

#[derive(Debug, Clone, Args)]
pub struct GenerateArgs {
    /// Subject of the deck.
    #[arg(long)]
    pub topic: String,
    /// Number of slides (1-50).
    #[arg(long, default_value = "8", value_name = "N")]
    pub pages: u32,
    /// Intended audience, e.g. "students".
    #[arg(long)]
    pub audience: Option<String>,
    /// Output language, e.g. "en".
    #[arg(long)]
    pub language: Option<String>,
    /// Visual style hint.
    #[arg(long)]
    pub style: Option<String>,
    /// Create a new job even if an identical one was submitted recently.
    #[arg(long)]
    pub fresh: bool,
    /// Print the job id and exit without waiting.
    #[arg(long)]
    pub detach: bool,
}

impl GenerateArgs {
    pub fn request(&self) -> GenerateRequest {
        let mut request = GenerateRequest::new(self.topic.clone(), self.pages);
        request.audience = self.audience.clone();
        request.language = self.language.clone();
        request.style = self.style.clone();
        request
    }
}

pub async fn run_generate(client: &DeckClient, args: GenerateArgs) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let task = client
        .submit_with(&args.request(), args.fresh, &cancel)
        .await
        .context("submit generation job")?;
    println!("submitted: {}", task.id);
    if args.detach {
        return Ok(());
    }
    let outcome = follow(client, task, &cancel).await?;
    report(client, outcome, &cancel).await
}
