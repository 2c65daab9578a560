//! Error types for spectrum frame decoding and encoding

use std::io;

use thiserror::Error;

/// Errors that can occur while reading a frame from a byte stream
///
/// Every variant is fatal to the stream that produced it: once a frame is
/// rejected the reader has lost byte alignment.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// Peer closed the stream before sending any byte of the next frame
    #[error("connection closed")]
    Disconnected,

    /// Stream ended after part of the 4-byte size prefix
    #[error("could not read frame size: stream ended after {read} of 4 bytes")]
    TruncatedPrefix { read: usize },

    /// Reading the size prefix failed
    #[error("could not read frame size: {kind}")]
    MissingPrefix { kind: io::ErrorKind },

    /// Stream ended (or failed) in the middle of a frame body
    #[error("could not read frame body (size: {size}): {kind}")]
    TruncatedBody { size: u32, kind: io::ErrorKind },

    /// Size prefix below the fixed header length
    #[error("frame size too small: {size}. Min frame size: {min}")]
    SizeTooSmall { size: u32, min: u32 },

    /// Size prefix above header length plus maximum payload
    #[error("frame size too large: {size}. Max frame size: {max}")]
    SizeTooLarge { size: u32, max: u32 },

    /// Channel id outside `0..=MAX_CHANNEL`
    #[error("channel is too large: {channel}. Max channel: {max}")]
    ChannelOutOfRange { channel: u32, max: u32 },
}

impl FramingError {
    /// True when the peer closed the stream cleanly between frames
    ///
    /// A close in the middle of a size prefix or body is not clean.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, FramingError::Disconnected)
    }
}

/// Errors that can occur while encoding a frame
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Payload exceeds `MAX_DATA_SIZE`
    #[error("too large data size: {len}. Max data size: {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// Channel id outside `0..=MAX_CHANNEL`
    #[error("too large channel: {channel}. Max value: {max}")]
    ChannelOutOfRange { channel: u32, max: u32 },
}
