use noderun_kernel::runner::error::NodeError;
use noderun_kernel::runner::node::NodeHooks;
use parking_lot::Mutex;
use std::time::Duration;

/// One `on_retry_attempt` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRetry {
    pub node_name: String,
    pub attempt: u32,
    pub code: String,
    pub delay: Duration,
}

/// [`NodeHooks`] that remember every call.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    retries: Mutex<Vec<RecordedRetry>>,
    timeouts: Mutex<Vec<(String, NodeError)>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retries(&self) -> Vec<RecordedRetry> {
        self.retries.lock().clone()
    }

    /// Backoff delays in the order they were scheduled
    pub fn delays(&self) -> Vec<Duration> {
        self.retries.lock().iter().map(|r| r.delay).collect()
    }

    pub fn timeouts(&self) -> Vec<(String, NodeError)> {
        self.timeouts.lock().clone()
    }
}

impl NodeHooks for RecordingHooks {
    fn on_retry_attempt(&self, node_name: &str, attempt: u32, error: &NodeError, delay: Duration) {
        self.retries.lock().push(RecordedRetry {
            node_name: node_name.to_string(),
            attempt,
            code: error.code().to_string(),
            delay,
        });
    }

    fn on_timeout(&self, node_name: &str, error: &NodeError) {
        self.timeouts.lock().push((node_name.to_string(), error.clone()));
    }
}
