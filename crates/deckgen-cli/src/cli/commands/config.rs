//! `deckgen config` – print the effective configuration.

use anyhow::Result;
use deckgen_core::config::{self, DeckgenConfig};

pub fn run_config(cfg: &DeckgenConfig) -> Result<()> {
    if let Ok(path) = config::config_path() {
        println!("# {}", path.display());
    }
    print!("{}", toml::to_string_pretty(&cfg.redacted())?);
    Ok(())
}
