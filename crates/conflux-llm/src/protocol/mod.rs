//! Wire format types for each vendor API

pub mod anthropic;
pub mod google;
pub mod ollama;
pub mod openai;
