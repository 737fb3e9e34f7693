//! Error taxonomy shared by both ends of the protocol.

use std::io;

/// Errors raised while driving a protocol exchange.
///
/// Variants for which [`ProtocolError::is_fatal`] returns true leave the
/// connection at an unknown framing position; the only safe reaction is to
/// drop it.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),

    #[error("short read: expected {expected} bytes, stream ended after {received}")]
    ShortRead { expected: usize, received: usize },

    #[error("protocol out of step: {0}")]
    Desync(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("file error on {name}: {source}")]
    FileSystem {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("{field} value {value} does not fit its frame")]
    FrameRange { field: &'static str, value: i64 },

    #[error("protocol violation: {0}")]
    Violation(String),
}

impl ProtocolError {
    pub fn fs(name: impl Into<String>, source: io::Error) -> Self {
        ProtocolError::FileSystem {
            name: name.into(),
            source,
        }
    }

    /// True when the stream can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Connection(_)
                | ProtocolError::ShortRead { .. }
                | ProtocolError::Desync(_)
                | ProtocolError::Violation(_)
        )
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
