//! Error types for the simulator

use spectrum_protocol::{EncodeError, FramingError};
use thiserror::Error;

/// Errors that can occur in the simulator
#[derive(Debug, Error)]
pub enum SimError {
    /// Malformed, oversized, undersized or truncated frame
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Frame could not be encoded
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Request carried a type tag we do not understand
    #[error("unknown request type {0}")]
    UnknownRequestType(u32),

    /// Channel actor is gone
    #[error("channel {0} mailbox closed")]
    MailboxClosed(u32),

    /// Channel has too many broadcasts waiting
    #[error("channel {0} is busy, broadcast dropped")]
    ChannelBusy(u32),

    /// Config file could not be parsed
    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
