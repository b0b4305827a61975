use async_trait::async_trait;
use noderun_kernel::runner::context::NodeExecutionContext;
use noderun_kernel::runner::error::{BoxError, ValidationError};
use noderun_kernel::runner::node::NodeImplementation;
use noderun_kernel::runner::state::StateUpdate;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// What a [`MockNode`] does on one call.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Return the update
    Succeed(StateUpdate),
    /// Fail with a connection reset, classified retryable
    Transient(String),
    /// Fail with a [`ValidationError`], classified terminal
    Invalid(String),
    /// Fail with a plain message error
    Fail(String),
    /// Panic while being polled
    Panic(String),
    /// Sleep, then behave like the inner outcome
    Delayed(Duration, Box<MockOutcome>),
}

impl MockOutcome {
    pub fn ok() -> Self {
        Self::Succeed(StateUpdate::new())
    }

    pub fn after(delay: Duration, outcome: MockOutcome) -> Self {
        Self::Delayed(delay, Box::new(outcome))
    }
}

/// A scripted node implementation.
///
/// Calls consume the script front to back; once it is empty every call gets
/// the fallback outcome. Clones share the script and the call history, so a
/// test can keep one handle while the node owns another.
#[derive(Clone)]
pub struct MockNode {
    script: Arc<RwLock<VecDeque<MockOutcome>>>,
    fallback: Arc<RwLock<MockOutcome>>,
    /// Contexts of every call, in order
    pub call_history: Arc<RwLock<Vec<NodeExecutionContext>>>,
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNode {
    /// Succeeds with an empty update on every call.
    pub fn new() -> Self {
        Self::with_fallback(MockOutcome::ok())
    }

    pub fn with_fallback(fallback: MockOutcome) -> Self {
        Self {
            script: Arc::new(RwLock::new(VecDeque::new())),
            fallback: Arc::new(RwLock::new(fallback)),
            call_history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Script the outcomes of the next calls.
    pub fn scripted(outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        let mut node = Self::new();
        node.script = Arc::new(RwLock::new(outcomes.into_iter().collect()));
        node
    }

    /// Append outcomes to the script.
    pub async fn push(&self, outcome: MockOutcome) {
        self.script.write().await.push_back(outcome);
    }

    /// Set the outcome used once the script runs out.
    pub async fn set_fallback(&self, outcome: MockOutcome) {
        *self.fallback.write().await = outcome;
    }

    pub async fn call_count(&self) -> usize {
        self.call_history.read().await.len()
    }

    /// Attempt numbers seen, in call order
    pub async fn attempts(&self) -> Vec<u32> {
        self.call_history.read().await.iter().map(|ctx| ctx.attempt).collect()
    }

    async fn next_outcome(&self) -> MockOutcome {
        match self.script.write().await.pop_front() {
            Some(outcome) => outcome,
            None => self.fallback.read().await.clone(),
        }
    }
}

async fn resolve(mut outcome: MockOutcome) -> Result<StateUpdate, BoxError> {
    loop {
        match outcome {
            MockOutcome::Succeed(update) => return Ok(update),
            MockOutcome::Transient(message) => {
                return Err(Box::new(io::Error::new(io::ErrorKind::ConnectionReset, message)));
            }
            MockOutcome::Invalid(message) => return Err(Box::new(ValidationError::new(message))),
            MockOutcome::Fail(message) => return Err(message.into()),
            MockOutcome::Panic(message) => panic!("{message}"),
            MockOutcome::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                outcome = *inner;
            }
        }
    }
}

#[async_trait]
impl<S: Send + 'static> NodeImplementation<S> for MockNode {
    async fn execute(&self, _state: S, ctx: NodeExecutionContext) -> Result<StateUpdate, BoxError> {
        self.call_history.write().await.push(ctx);
        let outcome = self.next_outcome().await;
        resolve(outcome).await
    }
}

/// Assert how many times a [`MockNode`] ran.
#[macro_export]
macro_rules! assert_node_called {
    ($node:expr, $expected_count:expr) => {
        let count = $node.call_count().await;
        assert_eq!(
            count, $expected_count,
            "Expected node to be called {} times, but was called {} times",
            $expected_count, count
        );
    };
}
