//! Spectrum Protocol Library
//!
//! This crate provides framing for the spectrum simulator's binary wire
//! protocol. Clients send [`Request`]s to listen on or send to a numbered
//! channel; the server delivers [`Response`]s carrying the channel, a receive
//! timestamp and the payload.
//!
//! # Wire Format
//!
//! ```text
//! Request:  u32 size | u32 type    | u32 channel      | byte[size-8]  data
//! Response: u32 size | u32 channel | i64 timestamp_ns | byte[size-12] data
//! ```
//!
//! - All multi-byte fields are little-endian
//! - `size` counts the bytes following the prefix
//! - `channel` must not exceed [`MAX_CHANNEL`]
//! - `data` must not exceed [`MAX_DATA_SIZE`] bytes
//!
//! The layout is simple enough to be implemented in plain C by the stacks
//! under test, and must be matched byte for byte.
//!
//! # Example
//!
//! ```rust
//! use std::io::Cursor;
//! use spectrum_protocol::{read_request, Request, RequestType};
//!
//! let bytes = [8, 0, 0, 0, 1, 0, 0, 0, 37, 0, 0, 0];
//! let req = read_request(&mut Cursor::new(bytes)).unwrap();
//!
//! assert_eq!(req.request_type, RequestType::Listen);
//! assert_eq!(req.channel, 37);
//! assert_eq!(req.encode().unwrap(), bytes);
//! ```

pub mod error;
pub mod frame;
pub mod request;
pub mod response;

pub use error::{EncodeError, FramingError};
pub use frame::{read_frame, FrameKind, SIZE_PREFIX_LEN};
pub use request::{read_request, Request, RequestType};
pub use response::{from_unix_nanos, read_response, to_unix_nanos, Response};

#[cfg(feature = "tokio")]
pub use frame::read_frame_async;
#[cfg(feature = "tokio")]
pub use request::read_request_async;
#[cfg(feature = "tokio")]
pub use response::read_response_async;

/// Maximum payload length in bytes
pub const MAX_DATA_SIZE: usize = 128;

/// Largest valid channel id (`i32::MAX`)
pub const MAX_CHANNEL: u32 = i32::MAX as u32;

/// Request header length: type + channel
pub const REQUEST_HEADER_SIZE: usize = 8;

/// Response header length: channel + timestamp
pub const RESPONSE_HEADER_SIZE: usize = 12;
