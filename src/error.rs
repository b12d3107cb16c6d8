use std::sync::Arc;
use thiserror::Error;

/// Boxed error accepted from user-supplied asynchronous operations
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors that can occur while building or running a stream graph
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    /// A stage received a signal its state does not allow
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A buffer under the `Fail` policy received an element while full
    #[error("Buffer overflow (capacity {capacity})")]
    Overflow { capacity: usize },

    /// `pop`/`head` on an empty buffer
    #[error("Buffer is empty")]
    EmptyBuffer,

    /// An external asynchronous operation or nested stream failed
    #[error("Upstream failure: {0}")]
    UpstreamFailure(Arc<dyn std::error::Error + Send + Sync>),

    /// Ports could not be wired together
    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Pipeline has already been run
    #[error("Pipeline has already been started")]
    AlreadyStarted,

    /// Nothing left to dispatch or await while stages are still running
    #[error("Pipeline stalled with {unfinished} unfinished stages")]
    Stalled { unfinished: usize },
}

impl StreamError {
    /// Wrap an external failure as an `UpstreamFailure`
    pub fn upstream(error: impl Into<BoxError>) -> Self {
        StreamError::UpstreamFailure(Arc::from(error.into()))
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        StreamError::ProtocolViolation(message.into())
    }

    /// Programming-contract violations abort the run instead of
    /// travelling through the graph as an `error` signal.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            StreamError::ProtocolViolation(_) | StreamError::EmptyBuffer
        )
    }
}

/// Validates that a size-like argument is greater than zero.
pub fn validate_positive(name: &str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(StreamError::ConfigError(format!(
            "{name} must be greater than zero"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_violation_classification() {
        assert!(StreamError::protocol("double pull").is_contract_violation());
        assert!(StreamError::EmptyBuffer.is_contract_violation());
        assert!(!StreamError::Overflow { capacity: 2 }.is_contract_violation());
        assert!(!StreamError::upstream("boom").is_contract_violation());
    }

    #[test]
    fn test_upstream_failure_keeps_message() {
        let error = StreamError::upstream("my error");
        assert_eq!(error.to_string(), "Upstream failure: my error");
        let cloned = error.clone();
        assert!(matches!(cloned, StreamError::UpstreamFailure(_)));
    }

    #[test]
    fn test_validate_positive() {
        assert_eq!(validate_positive("breadth", 4).unwrap(), 4);
        assert!(matches!(
            validate_positive("breadth", 0),
            Err(StreamError::ConfigError(_))
        ));
    }
}
