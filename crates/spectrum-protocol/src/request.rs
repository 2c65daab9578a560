//! Client requests
//!
//! # Frame Format
//! ```text
//! u32 size | u32 type | u32 channel | byte[size-8] data
//! ```
//!
//! All integers are little-endian. `size` counts the bytes after the prefix,
//! so `8 <= size <= 136`.

use std::io::Read;

use crate::error::{EncodeError, FramingError};
use crate::frame::{self, FrameKind};
use crate::{MAX_DATA_SIZE, REQUEST_HEADER_SIZE};

/// Request type tag
///
/// Unrecognized tags are carried through decoding untouched; deciding what to
/// do with them is the server's business, not the codec's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RequestType {
    /// Broadcast `data` to every listener of the channel (tag 0)
    Send,
    /// Subscribe to the channel (tag 1)
    Listen,
    /// Any other tag value
    Unknown(u32),
}

impl From<u32> for RequestType {
    fn from(value: u32) -> Self {
        match value {
            0 => RequestType::Send,
            1 => RequestType::Listen,
            other => RequestType::Unknown(other),
        }
    }
}

impl From<RequestType> for u32 {
    fn from(value: RequestType) -> Self {
        match value {
            RequestType::Send => 0,
            RequestType::Listen => 1,
            RequestType::Unknown(other) => other,
        }
    }
}

/// A decoded client request
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Request {
    /// What the client wants
    pub request_type: RequestType,
    /// Target channel
    pub channel: u32,
    /// Payload (empty for Listen)
    pub data: Vec<u8>,
}

impl Request {
    /// Create a Send request
    pub fn send(channel: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            request_type: RequestType::Send,
            channel,
            data: data.into(),
        }
    }

    /// Create a Listen request
    pub fn listen(channel: u32) -> Self {
        Self {
            request_type: RequestType::Listen,
            channel,
            data: Vec::new(),
        }
    }

    /// Parse a frame body (everything after the size prefix)
    pub fn from_body(body: &[u8]) -> Result<Self, FramingError> {
        frame::check_body(FrameKind::Request, body)?;

        let request_type = RequestType::from(frame::le_u32(body, 0));
        let channel = frame::check_channel(frame::le_u32(body, 4))?;

        Ok(Self {
            request_type,
            channel,
            data: body[REQUEST_HEADER_SIZE..].to_vec(),
        })
    }

    /// Encode to wire bytes, size prefix included
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        if self.data.len() > MAX_DATA_SIZE {
            return Err(EncodeError::PayloadTooLarge {
                len: self.data.len(),
                max: MAX_DATA_SIZE,
            });
        }

        let size = (REQUEST_HEADER_SIZE + self.data.len()) as u32;
        let mut out = Vec::with_capacity(frame::SIZE_PREFIX_LEN + size as usize);
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&u32::from(self.request_type).to_le_bytes());
        out.extend_from_slice(&self.channel.to_le_bytes());
        out.extend_from_slice(&self.data);
        Ok(out)
    }
}

/// Read one request from a blocking reader
pub fn read_request<R: Read>(reader: &mut R) -> Result<Request, FramingError> {
    let body = frame::read_frame(reader, FrameKind::Request)?;
    Request::from_body(&body)
}

/// Read one request from an async reader
#[cfg(feature = "tokio")]
pub async fn read_request_async<R>(reader: &mut R) -> Result<Request, FramingError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let body = frame::read_frame_async(reader, FrameKind::Request).await?;
    Request::from_body(&body)
}
