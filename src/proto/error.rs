use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for shardis operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while dispatching commands to Redis.
///
/// Redirect-class errors ([`Error::Moved`], [`Error::Ask`], [`Error::Loading`])
/// are absorbed by the dispatch engine and never reach callers. Everything
/// else propagates to the caller's [`CommandFuture`](crate::engine::CommandFuture)
/// untouched, except aggregate operations which wrap a failure co-occurring
/// with partial success as [`Error::PartialFailure`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An IO error occurred.
    #[error("IO error: {source}")]
    Io {
        /// The underlying IO error.
        #[from]
        source: io::Error,
    },

    /// A protocol error occurred.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the error.
        message: String,
    },

    /// The server returned an error.
    #[error("server error: {message}")]
    Server {
        /// Error message from server.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of invalid argument.
        message: String,
    },

    /// No node was reachable for the requested source, or the connection
    /// went away before the server answered.
    #[error("connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// The command could not be put on the wire.
    #[error("can't write command {command}: {message}")]
    Write {
        /// Name of the command that failed to write.
        command: String,
        /// Description of the write failure.
        message: String,
    },

    /// The server did not answer within the response timeout.
    #[error("Redis server response timeout ({timeout:?}) occurred for command: {command}")]
    ResponseTimeout {
        /// Name of the command that timed out.
        command: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// All retry attempts were consumed without a completed write.
    ///
    /// Carries the last error recorded before exhaustion, if any attempt
    /// got far enough to record one.
    #[error("command execution timeout after {attempts} retry attempts for command: {command}")]
    RetryExhausted {
        /// Name of the command that was retried.
        command: String,
        /// Number of retry attempts that were made.
        attempts: u32,
        /// The last recorded failure, if any.
        #[source]
        cause: Option<Box<Error>>,
    },

    /// Redis Cluster: key moved to another node (permanent redirect).
    ///
    /// Never surfaced to callers; the dispatch engine follows the redirect.
    #[error("MOVED to slot {slot} at {address}")]
    Moved {
        /// The slot number (0-16383).
        slot: u16,
        /// The address of the node owning this slot (e.g., "127.0.0.1:7001").
        address: String,
    },

    /// Redis Cluster: temporary redirect during migration (ASK redirect).
    ///
    /// Never surfaced to callers; the dispatch engine re-sends the command
    /// primed with ASKING on the target node.
    #[error("ASK to slot {slot} at {address}")]
    Ask {
        /// The slot number (0-16383).
        slot: u16,
        /// The address of the node temporarily handling this slot.
        address: String,
    },

    /// The node is loading its dataset and cannot serve yet.
    ///
    /// Never surfaced to callers; the dispatch engine re-dispatches at the
    /// same node.
    #[error("LOADING node is loading the dataset in memory")]
    Loading,

    /// Redis Cluster is down or unavailable.
    #[error("CLUSTERDOWN cluster is down")]
    ClusterDown,

    /// Multi-key operation with keys in different slots (cluster mode).
    #[error("CROSSSLOT keys in multi-key operation map to different slots")]
    CrossSlot,

    /// The engine is shutting down and no longer accepts dispatches.
    #[error("shardis engine is shutdown")]
    Shutdown,

    /// An aggregate operation partially succeeded before a sub-operation
    /// failed.
    #[error("{succeeded} operations succeeded, but an error occurred: {cause}")]
    PartialFailure {
        /// Accumulated success measure at the time the aggregate resolved
        /// (deleted-key count for delete operations, count of succeeded
        /// sub-operations otherwise).
        succeeded: u64,
        /// The first failure observed.
        #[source]
        cause: Box<Error>,
    },

    /// The dispatch task terminated without producing an outcome.
    ///
    /// Cancellation initiated by the caller (dropping the future) is not an
    /// error; this variant only appears when the engine itself went away
    /// mid-flight.
    #[error("command was cancelled before completion")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        let error = Error::Io { source: io_err };
        assert!(error.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_display_retry_exhausted() {
        let error = Error::RetryExhausted {
            command: "DEL".to_string(),
            attempts: 3,
            cause: Some(Box::new(Error::Connection {
                message: "no node".to_string(),
            })),
        };
        assert!(error.to_string().contains("3 retry attempts"));
        assert!(error.to_string().contains("DEL"));
    }

    #[test]
    fn test_error_display_partial_failure() {
        let error = Error::PartialFailure {
            succeeded: 12,
            cause: Box::new(Error::Server {
                message: "ERR boom".to_string(),
            }),
        };
        let text = error.to_string();
        assert!(text.contains("12 operations succeeded"));
        assert!(text.contains("ERR boom"));
    }

    #[test]
    fn test_error_display_response_timeout() {
        let error = Error::ResponseTimeout {
            command: "GET".to_string(),
            timeout: Duration::from_millis(3000),
        };
        assert!(error.to_string().contains("GET"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test");
        let error: Error = io_err.into();
        assert!(matches!(error, Error::Io { .. }));
    }

    #[test]
    fn test_error_display_shutdown() {
        assert_eq!(Error::Shutdown.to_string(), "shardis engine is shutdown");
    }
}
