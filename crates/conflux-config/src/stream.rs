use serde::Deserialize;

/// Streaming behaviour shared by all providers
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    /// Capacity of the queue between a bridged vendor worker and the consumer
    ///
    /// The worker blocks once the queue is full, so a slow consumer slows
    /// the upstream read instead of growing memory.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

const fn default_queue_capacity() -> usize {
    100
}
