use std::path::Path;

use secrecy::ExposeSecret;

use crate::{Config, ProviderConfig};

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::parse(&raw)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if expansion, parsing, or validation fails
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error if no provider is configured or a provider
    /// configuration is unusable
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.providers.is_empty() {
            anyhow::bail!("at least one LLM provider must be configured");
        }

        if self.stream.queue_capacity == 0 {
            anyhow::bail!("stream.queue_capacity must be greater than 0");
        }

        for (name, provider) in &self.providers {
            validate_provider(name, provider)?;
        }

        Ok(())
    }
}

fn validate_provider(name: &str, provider: &ProviderConfig) -> anyhow::Result<()> {
    let api_key = match provider {
        ProviderConfig::Openai(c) => Some(&c.api_key),
        ProviderConfig::AzureOpenai(c) => Some(&c.api_key),
        ProviderConfig::Anthropic(c) => Some(&c.api_key),
        ProviderConfig::Google(c) => Some(&c.api_key),
        ProviderConfig::VertexAnthropic(c) => {
            if c.project_id.trim().is_empty() {
                anyhow::bail!("provider '{name}': project_id must not be empty");
            }
            if c.location.trim().is_empty() {
                anyhow::bail!("provider '{name}': location must not be empty");
            }
            None
        }
        ProviderConfig::Ollama(_) => None,
    };

    if api_key.is_some_and(|key| key.expose_secret().trim().is_empty()) {
        anyhow::bail!("provider '{name}': api_key must not be empty");
    }

    Ok(())
}
