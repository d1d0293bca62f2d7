//! `deckgen watch` – follow a job to a terminal state, printing progress.

use anyhow::{bail, Result};
use deckgen_core::events::{ChannelObserver, TaskEvent};
use deckgen_core::task::Task;
use deckgen_core::{DeckClient, TaskOutcome};
use tokio_util::sync::CancellationToken;

use super::cancel_on_ctrl_c;

pub async fn run_watch(client: &DeckClient, job_id: &str) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let outcome = follow(client, Task::new(job_id), &cancel).await?;
    report(client, outcome, &cancel).await
}

/// Watch `task`, printing progress lines, until it is terminal. `cancel`
/// firing cancels the watch.
pub(super) async fn follow(
    client: &DeckClient,
    task: Task,
    cancel: &CancellationToken,
) -> Result<TaskOutcome> {
    let id = task.id.clone();
    let (observer, mut rx) = ChannelObserver::new();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let TaskEvent::Progress {
                status,
                progress,
                message,
                ..
            } = event
            {
                println!(
                    "  {:<18} {:>3}%  {}",
                    status.as_str(),
                    progress,
                    message.as_deref().unwrap_or("")
                );
            }
        }
    });

    // The watch future borrows `observer`; it must be gone before the
    // observer is dropped to close the printer's channel.
    let outcome = {
        let watch = client.watch(task, &observer);
        tokio::pin!(watch);
        let mut cancel_sent = false;
        loop {
            tokio::select! {
                out = &mut watch => break out?,
                _ = cancel.cancelled(), if !cancel_sent => {
                    cancel_sent = true;
                    client.cancel(&id);
                }
            }
        }
    };
    drop(observer);
    let _ = printer.await;
    Ok(outcome)
}

/// Print the outcome; completed jobs get their download URL.
pub(super) async fn report(
    client: &DeckClient,
    outcome: TaskOutcome,
    cancel: &CancellationToken,
) -> Result<()> {
    match outcome {
        TaskOutcome::Completed { task, .. } => {
            println!("completed: {} ({} polls)", task.id, task.retry_count);
            let url = client.download_url(&task, cancel).await?;
            println!("{}", url);
            Ok(())
        }
        TaskOutcome::Cancelled { task } => {
            println!("cancelled: {} at {}%", task.id, task.progress);
            Ok(())
        }
        TaskOutcome::Failed { task, error } => {
            let retry_hint = if error.retryable {
                " (retryable)"
            } else {
                ""
            };
            bail!(
                "task {} failed after {} attempt(s): {}{}",
                task.id,
                error.attempts,
                error,
                retry_hint
            )
        }
    }
}
