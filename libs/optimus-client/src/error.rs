//! Error types for the client-side evaluation pipeline

use optimus_common::types::RunKind;
use thiserror::Error;

/// Structural problems with an uploaded test-case archive
///
/// All variants are fatal to the upload, never to the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("archive contains no entries")]
    Empty,

    #[error("malformed entry name `{name}`, expected case.<n>.in or case.<n>.out with 1 <= n <= 18446744073709551615")]
    Malformed { name: String },

    #[error("archive has an odd number of entries ({count})")]
    OddEntryCount { count: usize },

    #[error("test case {ordinal} is missing its input or output")]
    UnpairedCase { ordinal: u64 },

    #[error("archive could not be decoded: {0}")]
    Decode(String),
}

/// Transport-level failures surfaced on send/submit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("result channel is unavailable")]
    Unavailable,

    #[error("result channel was closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<redis::RedisError> for ChannelError {
    fn from(err: redis::RedisError) -> Self {
        ChannelError::Transport(err.to_string())
    }
}

/// Rejected correlator transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelatorError {
    #[error("a {kind} run is already in flight")]
    Conflict { kind: RunKind },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Correlator(#[from] CorrelatorError),

    #[error("no test cases loaded for this session")]
    NoTestSuite,
}
