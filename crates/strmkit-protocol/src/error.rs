use thiserror::Error;

/// Application-level error codes returned by the broker in a response status.
///
/// The broker is free to return codes this client has never heard of; those
/// are preserved verbatim in [`ProtocolErrorKind::Other`] rather than dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    OffsetOutOfRange,
    UnknownTopicOrPartition,
    NotLeaderForPartition,
    RequestTimedOut,
    TopicAlreadyExists,
    InvalidPartitions,
    InvalidReplicationFactor,
    InvalidConfig,
    NotController,
    InvalidRequest,
    TopicAuthorizationFailed,
    Other(i16),
}

impl ProtocolErrorKind {
    #[must_use]
    pub fn from_code(code: i16) -> Self {
        match code {
            1 => Self::OffsetOutOfRange,
            2 => Self::UnknownTopicOrPartition,
            3 => Self::NotLeaderForPartition,
            4 => Self::RequestTimedOut,
            5 => Self::TopicAlreadyExists,
            6 => Self::InvalidPartitions,
            7 => Self::InvalidReplicationFactor,
            8 => Self::InvalidConfig,
            9 => Self::NotController,
            10 => Self::InvalidRequest,
            11 => Self::TopicAuthorizationFailed,
            other => Self::Other(other),
        }
    }
}

/// Errors surfaced by the codec and wire-type layer.
///
/// This is the error vocabulary of `strmkit-protocol`; the `strmkit` client
/// crate wraps it behind its own `Error` (connection/resilience/config
/// failures live there, not here — this crate never touches a socket).
#[derive(Debug, Error)]
pub enum Error {
    #[error("frame too large: {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: u32, limit: u32 },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("corrupt batch: {0}")]
    CorruptBatch(String),

    #[error("protocol error ({kind:?}) for {name:?}: {message}")]
    ProtocolError {
        kind: ProtocolErrorKind,
        name: Option<String>,
        message: String,
    },

    #[error("stream error (code {code}): {message}")]
    StreamError { code: i16, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
