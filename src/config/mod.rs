//! Configuration loading and management.
//!
//! Split into logical submodules:
//! - [`types`]: core struct definitions (Config, ServerConfig, limits, ...)
//! - [`flood`]: per-command and hub-wide flood tables
//! - [`defaults`]: serde default helpers
//! - [`validation`]: the post-load sanity pass

mod defaults;
mod flood;
mod types;
mod validation;

pub use flood::{FloodAction, FloodConfig, FloodRule, HubFloodConfig};
pub use types::{
    BanConfig, ChatConfig, CloneConfig, Config, LimitsConfig, LoadConfig, LogFormat,
    MyInfoConfig, NickConfig, RegBlock, SearchConfig, ServerConfig, ShareLimits, TagConfig,
    TimeoutsConfig, ZoneConfig,
};
pub use validation::validate;

use anyhow::Context as _;
use std::path::Path;

impl Config {
    /// Load and parse a TOML config file.
    pub fn load(path: &str) -> anyhow::Result<Config> {
        let text = std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("reading config file {path}"))?;
        let config: Config = toml::from_str(&text).context("parsing config file")?;
        Ok(config)
    }
}
