#![allow(clippy::must_use_candidate)]

mod env;
pub mod llm;
mod loader;
pub mod log;
pub mod stream;

use indexmap::IndexMap;
use serde::Deserialize;

pub use llm::*;
pub use log::*;
pub use stream::*;

/// Top-level Conflux configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// LLM provider configurations keyed by name
    #[serde(default)]
    pub providers: IndexMap<String, ProviderConfig>,
    /// Streaming behaviour shared by all providers
    #[serde(default)]
    pub stream: StreamConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}
