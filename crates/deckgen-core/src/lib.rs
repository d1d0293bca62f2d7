pub mod config;
pub mod logging;

pub mod api;
pub mod cache;
pub mod client;
pub mod control;
pub mod download;
pub mod events;
pub mod poller;
pub mod retry;
pub mod store;
pub mod submit;
pub mod task;
pub mod throttle;

mod util;

pub use client::DeckClient;
pub use poller::TaskOutcome;
