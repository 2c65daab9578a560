//! Server responses
//!
//! # Frame Format
//! ```text
//! u32 size | u32 channel | i64 timestamp_ns | byte[size-12] data
//! ```
//!
//! All integers are little-endian. `timestamp_ns` counts nanoseconds since
//! 1970-01-01T00:00:00Z and may be negative.

use std::io::Read;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{EncodeError, FramingError};
use crate::frame::{self, FrameKind};
use crate::{MAX_CHANNEL, MAX_DATA_SIZE, RESPONSE_HEADER_SIZE};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A payload delivered to a listener
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Response {
    /// Channel the payload was sent on
    pub channel: u32,
    /// When the server received the payload
    pub timestamp: SystemTime,
    /// Payload as sent
    pub data: Vec<u8>,
}

impl Response {
    /// Create a new response
    pub fn new(channel: u32, timestamp: SystemTime, data: impl Into<Vec<u8>>) -> Self {
        Self {
            channel,
            timestamp,
            data: data.into(),
        }
    }

    /// Parse a frame body (everything after the size prefix)
    pub fn from_body(body: &[u8]) -> Result<Self, FramingError> {
        frame::check_body(FrameKind::Response, body)?;

        let channel = frame::check_channel(frame::le_u32(body, 0))?;
        let timestamp = from_unix_nanos(frame::le_i64(body, 4));

        Ok(Self {
            channel,
            timestamp,
            data: body[RESPONSE_HEADER_SIZE..].to_vec(),
        })
    }

    /// Encode to wire bytes, size prefix included
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        if self.channel > MAX_CHANNEL {
            return Err(EncodeError::ChannelOutOfRange {
                channel: self.channel,
                max: MAX_CHANNEL,
            });
        }
        if self.data.len() > MAX_DATA_SIZE {
            return Err(EncodeError::PayloadTooLarge {
                len: self.data.len(),
                max: MAX_DATA_SIZE,
            });
        }

        let size = (RESPONSE_HEADER_SIZE + self.data.len()) as u32;
        let mut out = Vec::with_capacity(frame::SIZE_PREFIX_LEN + size as usize);
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&self.channel.to_le_bytes());
        out.extend_from_slice(&to_unix_nanos(self.timestamp).to_le_bytes());
        out.extend_from_slice(&self.data);
        Ok(out)
    }
}

/// Nanoseconds since the Unix epoch, saturating at the `i64` range
pub fn to_unix_nanos(ts: SystemTime) -> i64 {
    match ts.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .map(|n| -n)
            .unwrap_or(i64::MIN),
    }
}

/// Inverse of [`to_unix_nanos`], splitting into seconds and nanoseconds
pub fn from_unix_nanos(nanos: i64) -> SystemTime {
    let secs = nanos.div_euclid(NANOS_PER_SEC);
    let subsec = nanos.rem_euclid(NANOS_PER_SEC) as u32;

    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, subsec)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + Duration::new(0, subsec)
    }
}

/// Read one response from a blocking reader
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response, FramingError> {
    let body = frame::read_frame(reader, FrameKind::Response)?;
    Response::from_body(&body)
}

/// Read one response from an async reader
#[cfg(feature = "tokio")]
pub async fn read_response_async<R>(reader: &mut R) -> Result<Response, FramingError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let body = frame::read_frame_async(reader, FrameKind::Response).await?;
    Response::from_body(&body)
}
