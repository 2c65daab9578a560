//! Length-prefixed frame reading
//!
//! Every frame on the wire starts with a little-endian `u32` size that counts
//! only the bytes following it. The size is validated against the frame kind
//! before the body is read, so a hostile prefix can never make us allocate
//! more than one maximal frame.

use std::io::{self, Read};

use crate::error::FramingError;
use crate::{MAX_CHANNEL, MAX_DATA_SIZE, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE};

/// Length of the size prefix in bytes
pub const SIZE_PREFIX_LEN: usize = 4;

/// The two frame shapes carried by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Client → server: `type | channel | data`
    Request,
    /// Server → client: `channel | timestamp | data`
    Response,
}

impl FrameKind {
    /// Fixed header length following the size prefix
    pub const fn header_size(self) -> usize {
        match self {
            FrameKind::Request => REQUEST_HEADER_SIZE,
            FrameKind::Response => RESPONSE_HEADER_SIZE,
        }
    }

    /// Smallest legal size prefix
    pub const fn min_size(self) -> u32 {
        self.header_size() as u32
    }

    /// Largest legal size prefix
    pub const fn max_size(self) -> u32 {
        (self.header_size() + MAX_DATA_SIZE) as u32
    }

    /// Validate a size prefix for this frame kind
    pub fn check_size(self, size: u32) -> Result<(), FramingError> {
        if size < self.min_size() {
            return Err(FramingError::SizeTooSmall {
                size,
                min: self.min_size(),
            });
        }
        if size > self.max_size() {
            return Err(FramingError::SizeTooLarge {
                size,
                max: self.max_size(),
            });
        }
        Ok(())
    }
}

/// Read one raw frame body (without the size prefix) from a blocking reader
pub fn read_frame<R: Read>(reader: &mut R, kind: FrameKind) -> Result<Vec<u8>, FramingError> {
    let mut prefix = [0u8; SIZE_PREFIX_LEN];
    let mut filled = 0;
    while filled < SIZE_PREFIX_LEN {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) => return Err(prefix_eof(filled)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(FramingError::MissingPrefix { kind: e.kind() }),
        }
    }

    let size = u32::from_le_bytes(prefix);
    kind.check_size(size)?;

    let mut body = vec![0u8; size as usize];
    reader
        .read_exact(&mut body)
        .map_err(|e| FramingError::TruncatedBody {
            size,
            kind: e.kind(),
        })?;
    Ok(body)
}

/// Read one raw frame body (without the size prefix) from an async reader
#[cfg(feature = "tokio")]
pub async fn read_frame_async<R>(reader: &mut R, kind: FrameKind) -> Result<Vec<u8>, FramingError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut prefix = [0u8; SIZE_PREFIX_LEN];
    let mut filled = 0;
    while filled < SIZE_PREFIX_LEN {
        match reader.read(&mut prefix[filled..]).await {
            Ok(0) => return Err(prefix_eof(filled)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(FramingError::MissingPrefix { kind: e.kind() }),
        }
    }

    let size = u32::from_le_bytes(prefix);
    kind.check_size(size)?;

    let mut body = vec![0u8; size as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| FramingError::TruncatedBody {
            size,
            kind: e.kind(),
        })?;
    Ok(body)
}

/// Decode a little-endian `u32` at `offset`
pub(crate) fn le_u32(body: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&body[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

/// Decode a little-endian `i64` at `offset`
pub(crate) fn le_i64(body: &[u8], offset: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&body[offset..offset + 8]);
    i64::from_le_bytes(raw)
}

/// Reject channel ids above `MAX_CHANNEL`
pub(crate) fn check_channel(channel: u32) -> Result<u32, FramingError> {
    if channel > MAX_CHANNEL {
        return Err(FramingError::ChannelOutOfRange {
            channel,
            max: MAX_CHANNEL,
        });
    }
    Ok(channel)
}

/// Size check for a body that did not come through [`read_frame`]
pub(crate) fn check_body(kind: FrameKind, body: &[u8]) -> Result<(), FramingError> {
    let size = u32::try_from(body.len()).map_err(|_| FramingError::SizeTooLarge {
        size: u32::MAX,
        max: kind.max_size(),
    })?;
    kind.check_size(size)
}

/// EOF while reading the size prefix, after `filled` bytes
fn prefix_eof(filled: usize) -> FramingError {
    if filled == 0 {
        FramingError::Disconnected
    } else {
        FramingError::TruncatedPrefix { read: filled }
    }
}
