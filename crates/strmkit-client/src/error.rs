use thiserror::Error;

pub use strmkit_protocol::error::ProtocolErrorKind;

/// The crate-wide error type. Every public, fallible operation in `strmkit`
/// returns `Result<T, Error>`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("connection to {endpoint} failed: {source}")]
    ConnectionFailed {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("not connected")]
    Disconnected,

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("circuit breaker is open for {0}")]
    CircuitOpen(&'static str),

    #[error("unknown partition {partition} for topic {topic:?} ({available} partitions available)")]
    UnknownPartition {
        topic: String,
        partition: i32,
        available: usize,
    },

    #[error(transparent)]
    Protocol(#[from] strmkit_protocol::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the resilience layer should retry an operation that failed
    /// with this error — timeouts and transport failures are retriable,
    /// application-level protocol errors are not (§4.4, §7).
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ConnectionFailed { .. } | Error::Disconnected | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
