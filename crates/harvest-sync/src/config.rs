use std::time::Duration;

pub const DEFAULT_STAGING_QUEUE: &str = "records-temp";
pub const DEFAULT_MAIN_QUEUE: &str = "records";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub staging: String,
    pub main: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            staging: DEFAULT_STAGING_QUEUE.to_string(),
            main: DEFAULT_MAIN_QUEUE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    pub queues: QueueNames,
    /// Deadline applied to every individual store and broker call.
    pub call_timeout: Option<Duration>,
}
