use std::path::PathBuf;

use clap::Parser;

/// Conflux chat completion client
#[derive(Debug, Parser)]
#[command(name = "conflux", about = "Run one chat completion against a configured LLM provider")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "conflux.toml", env = "CONFLUX_CONFIG")]
    pub config: PathBuf,

    /// Provider table to use, defaults to the first one configured
    #[arg(short, long, env = "CONFLUX_PROVIDER")]
    pub provider: Option<String>,

    /// Model to request
    #[arg(short, long, env = "CONFLUX_MODEL")]
    pub model: String,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Wait for the whole response instead of streaming tokens
    #[arg(long)]
    pub no_stream: bool,

    /// Ask the model for a JSON object
    #[arg(long)]
    pub json: bool,

    /// Prompt text
    #[arg(required = true, num_args = 1..)]
    pub prompt: Vec<String>,
}

impl Args {
    /// Prompt words joined with single spaces
    pub fn prompt_text(&self) -> String {
        self.prompt.join(" ")
    }
}
