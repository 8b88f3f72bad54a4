use thiserror::Error;

/// Errors that can occur during LLM operations
///
/// Reaching the end of a stream is not an error: it is reported as
/// `Ok(None)` from [`crate::ChatCompletionStream::recv`].
#[derive(Debug, Error)]
pub enum LlmError {
    /// Bad endpoint, credentials, or other construction-time input
    #[error("configuration error: {0}")]
    Config(String),

    /// Requested model is outside the provider's allow-list
    #[error("model '{model}' is not supported by provider '{provider}'")]
    UnsupportedModel { provider: String, model: String },

    /// Request cannot be expressed for this vendor
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Vendor API returned an error
    #[error("{provider} API error{}: {message}", status_suffix(.status))]
    Api {
        provider: String,
        /// HTTP status, absent for in-stream error events
        status: Option<u16>,
        /// Vendor error code or type
        code: Option<String>,
        message: String,
    },

    /// Connection or body read failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Vendor behaviour outside the known stream contract
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Stream was closed or cancelled by the caller
    #[error("stream cancelled")]
    Cancelled,
}

/// Normalizer encountered vendor output it cannot interpret
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Finish reason outside the vendor's known vocabulary
    #[error("{provider} reported unknown finish reason '{value}'")]
    UnknownFinishReason { provider: &'static str, value: String },

    /// Tool call whose arguments never became a JSON object
    #[error("tool call '{name}' ({id}) never completed, arguments so far: {arguments:?}")]
    IncompleteToolCall { id: String, name: String, arguments: String },

    /// Event that could not be decoded or does not fit the stream state
    #[error("malformed {provider} stream event: {detail}")]
    MalformedEvent { provider: &'static str, detail: String },
}

/// Closed classification of [`LlmError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration error
    Config,
    /// Unsupported model
    UnsupportedModel,
    /// Invalid request
    InvalidRequest,
    /// Vendor API error
    Api,
    /// Transport failure
    Transport,
    /// Protocol/normalization error
    Protocol,
    /// Cancellation
    Cancelled,
}

impl LlmError {
    /// Kind of this error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::UnsupportedModel { .. } => ErrorKind::UnsupportedModel,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Api { .. } => ErrorKind::Api,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the error was caused by the caller closing the stream
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[allow(clippy::ref_option)]
fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
