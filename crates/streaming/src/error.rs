//! Streaming error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamingError {
    /// A frame payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    /// A frame is truncated, oversized or out of sequence.
    #[error("malformed frame: {0}")]
    Frame(String),
    /// The broadcaster has no open channel left.
    #[error("command stream closed")]
    Closed,
    /// Applying a delivered command violated an invariant. The processor has stopped.
    #[error("fatal error applying command #{sequence}: {source}")]
    Fatal {
        sequence: u64,
        #[source]
        source: corelib::Error,
    },
}

pub type Result<T> = std::result::Result<T, StreamingError>;
