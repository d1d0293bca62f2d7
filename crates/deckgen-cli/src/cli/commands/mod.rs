//! CLI command handlers. Each command is in its own file.

mod config;
mod download;
mod generate;
mod status;
mod watch;

pub use config::run_config;
pub use download::run_download;
pub use generate::{run_generate, GenerateArgs};
pub use status::run_status;
pub use watch::run_watch;

use tokio_util::sync::CancellationToken;

/// Token cancelled on the first Ctrl-C.
pub(crate) fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ncancelling...");
            trigger.cancel();
        }
    });
    token
}
