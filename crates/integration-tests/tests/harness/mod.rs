#![allow(dead_code)]

pub mod mock_vendor;

use conflux_llm::Provider;

/// Build the single provider described by a TOML snippet
pub fn provider(toml: &str) -> Box<dyn Provider> {
    let config = conflux_config::Config::parse(toml).expect("valid test config");
    let (name, provider) = config.providers.first().expect("one provider");
    conflux_llm::build_provider(name, provider, &config.stream).expect("provider builds")
}
