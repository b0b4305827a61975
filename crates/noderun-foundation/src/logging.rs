//! Logging setup and the per-node logger handed to implementations.

use noderun_kernel::config::{LogFormat, LoggingConfig};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber described by `config`.
///
/// `RUST_LOG` takes precedence over `config.level`. Returns `false` when a
/// global subscriber was already installed, in which case nothing changes.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    match config.format {
        LogFormat::Pretty => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}

/// Logger scoped to one node. Every event carries a `node` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLogger {
    node: String,
}

impl NodeLogger {
    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn debug(&self, message: &str) {
        debug!(node = %self.node, "{message}");
    }

    pub fn info(&self, message: &str) {
        info!(node = %self.node, "{message}");
    }

    pub fn warn(&self, message: &str) {
        warn!(node = %self.node, "{message}");
    }

    pub fn error(&self, message: &str) {
        error!(node = %self.node, "{message}");
    }
}

/// Logger for `node_name`.
pub fn create_node_logger(node_name: &str) -> NodeLogger {
    NodeLogger {
        node: node_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    #[test]
    fn test_node_logger_tags_events() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();

        let logger = create_node_logger("elaborate");
        tracing::subscriber::with_default(subscriber, || {
            logger.info("drafting");
            logger.warn("slow response");
            logger.debug("prompt built");
            logger.error("gave up");
        });

        let output = capture.contents();
        assert!(output.contains("node=elaborate"));
        assert!(output.contains("drafting"));
        assert!(output.contains("slow response"));
        assert!(output.contains("prompt built"));
        assert!(output.contains("gave up"));
        assert_eq!(logger.node(), "elaborate");
    }

    #[test]
    fn test_json_format_emits_node_field() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            create_node_logger("lint").info("ran");
        });

        let line = capture.contents();
        let event: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(event["fields"]["node"], "lint");
        assert_eq!(event["fields"]["message"], "ran");
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        let config = LoggingConfig::default();
        init_logging(&config);
        assert!(!init_logging(&config));
    }
}
