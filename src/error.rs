/// Unified error handling for the enlace driver
///
/// Every failure surfaced to callers is a `DriverError`. Only two kinds are
/// ever consumed internally: `ReplicaNotPrimary` and `UnableToConnect`, which
/// drive the failover loop. Everything else propagates unchanged.
use crate::protocol::RequestId;
use std::fmt;
use thiserror::Error;

/// Main error type for driver operations
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// No member could serve the request within the retry budget
    #[error("Unable to connect to the cluster: none of the servers [{addresses}] could serve the request")]
    ClusterUnavailable { addresses: String },

    /// The contacted replica is no longer the primary for the database
    #[error("The replica is not the primary replica")]
    ReplicaNotPrimary,

    /// Network-level failure reaching a server
    #[error("Unable to connect to server at {address}: {reason}")]
    UnableToConnect { address: String, reason: String },

    #[error("The client has been closed and no further operation is allowed")]
    ClientClosed,

    #[error("The session has been closed and no further operation is allowed")]
    SessionClosed,

    #[error("The transaction has been closed and no further operation is allowed")]
    TransactionClosed,

    /// A response frame for the request had no payload set
    #[error("The required field 'res' of request '{request_id}' was not set")]
    MissingResponse { request_id: RequestId },

    /// A response violated the transport's state machine
    #[error("Illegal state has been reached: {message}")]
    IllegalState { message: String },

    #[error("No such element")]
    NoSuchElement,

    #[error("Unexpected interruption while waiting")]
    UnexpectedInterruption,

    /// Failure reported by the server that the driver does not interpret
    #[error("Server error: {message}")]
    Server { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration-specific errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

impl DriverError {
    pub fn cluster_unavailable<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let addresses: Vec<String> = addresses
            .into_iter()
            .map(|address| address.as_ref().to_string())
            .collect();
        DriverError::ClusterUnavailable {
            addresses: addresses.join(","),
        }
    }

    pub fn unable_to_connect<A: Into<String>, R: fmt::Display>(address: A, reason: R) -> Self {
        DriverError::UnableToConnect {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    pub fn illegal_state<S: Into<String>>(message: S) -> Self {
        DriverError::IllegalState {
            message: message.into(),
        }
    }

    pub fn server<S: Into<String>>(message: S) -> Self {
        DriverError::Server {
            message: message.into(),
        }
    }

    pub fn is_replica_not_primary(&self) -> bool {
        matches!(self, DriverError::ReplicaNotPrimary)
    }

    pub fn is_unable_to_connect(&self) -> bool {
        matches!(self, DriverError::UnableToConnect { .. })
    }

    /// Errors after which the primary-replica strategy re-resolves the primary
    pub fn is_retryable_on_primary(&self) -> bool {
        self.is_replica_not_primary() || self.is_unable_to_connect()
    }

    /// Check if this error is recoverable (a later call may succeed)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DriverError::ClusterUnavailable { .. }
                | DriverError::ReplicaNotPrimary
                | DriverError::UnableToConnect { .. }
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            DriverError::Config(_) => ErrorSeverity::Critical,
            DriverError::MissingResponse { .. } => ErrorSeverity::Critical,
            DriverError::IllegalState { .. } => ErrorSeverity::Critical,
            DriverError::ReplicaNotPrimary => ErrorSeverity::Info,
            DriverError::UnableToConnect { .. } => ErrorSeverity::Warning,
            DriverError::ClusterUnavailable { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Protocol bugs or broken configuration
    Critical,
    /// Errors that abort the current operation
    Error,
    /// Transient failures that may clear on retry
    Warning,
    /// Expected conditions handled by the driver itself
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_unavailable_lists_addresses() {
        let error = DriverError::cluster_unavailable(["a:1729", "b:1729"]);
        assert_eq!(
            error.to_string(),
            "Unable to connect to the cluster: none of the servers [a:1729,b:1729] could serve the request"
        );
    }

    #[test]
    fn test_retry_classification() {
        assert!(DriverError::ReplicaNotPrimary.is_retryable_on_primary());
        assert!(DriverError::unable_to_connect("a:1729", "refused").is_retryable_on_primary());

        assert!(!DriverError::SessionClosed.is_retryable_on_primary());
        assert!(!DriverError::illegal_state("bad frame").is_retryable_on_primary());
        assert!(!DriverError::MissingResponse {
            request_id: RequestId::from_parts(1, 2)
        }
        .is_retryable_on_primary());
        assert!(!DriverError::server("not the primary replica").is_retryable_on_primary());
    }

    #[test]
    fn test_error_severity() {
        let config_error = DriverError::Config(ConfigError::ValidationError("test".to_string()));
        assert_eq!(config_error.severity(), ErrorSeverity::Critical);
        assert_eq!(
            DriverError::unable_to_connect("a:1729", "refused").severity(),
            ErrorSeverity::Warning
        );
        assert_eq!(DriverError::TransactionClosed.severity(), ErrorSeverity::Error);
        assert_eq!(ErrorSeverity::Critical.to_string(), "CRITICAL");
    }

    #[test]
    fn test_error_recoverability() {
        assert!(DriverError::cluster_unavailable(["a:1729"]).is_recoverable());
        assert!(!DriverError::NoSuchElement.is_recoverable());
        assert!(!DriverError::UnexpectedInterruption.is_recoverable());
    }
}
