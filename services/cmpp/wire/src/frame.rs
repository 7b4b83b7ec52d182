//! Length-prefixed framing for the wire protocol.
//!
//! A frame is the 12-byte header followed by the command body. The length
//! prefix counts the whole frame, header included, so a header-only frame
//! declares 12.

use crate::header::{CommandId, Header, Version, HEADER_SIZE, MIN_FRAME_SIZE, V3_MAX_FRAME_SIZE};
use crate::WireError;
use bytes::{Bytes, BytesMut};
use tracing::trace;

/// Default maximum frame size (the CMPP 3.0 limit)
pub const DEFAULT_MAX_FRAME_SIZE: usize = V3_MAX_FRAME_SIZE;

/// Complete wire frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command id
    pub command_id: CommandId,
    /// Sequence id
    pub sequence_id: u32,
    /// Command body, opaque at this layer
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(command_id: CommandId, sequence_id: u32, body: Bytes) -> Self {
        Self {
            command_id,
            sequence_id,
            body,
        }
    }

    /// Get the total frame size when encoded
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    /// Encode frame to a contiguous buffer
    pub fn encode(&self, max_frame_size: usize) -> Result<Bytes, WireError> {
        if !self.command_id.is_valid() {
            return Err(WireError::Encoding(self.command_id.get()));
        }

        let total_size = self.encoded_size();
        if total_size > max_frame_size {
            return Err(WireError::Size(total_size));
        }

        let mut buf = BytesMut::with_capacity(total_size);
        Header {
            total_length: total_size as u32,
            command_id: self.command_id,
            sequence_id: self.sequence_id,
        }
        .encode(&mut buf);
        buf.extend_from_slice(&self.body);

        Ok(buf.freeze())
    }

    /// Parse exactly one frame from `bytes`.
    ///
    /// The declared length must equal `bytes.len()`; trailing or missing
    /// bytes make the whole input invalid.
    pub fn parse(mut bytes: Bytes, max_frame_size: usize) -> Result<Self, WireError> {
        let available = bytes.len();
        let declared = check_length(&bytes, max_frame_size)?;

        if declared as usize != available {
            return Err(WireError::Malformed {
                declared,
                available,
            });
        }

        let header = Header::decode(&mut bytes)?;
        if !header.command_id.is_valid() {
            return Err(WireError::InvalidCommand(header.command_id.get()));
        }

        Ok(Self {
            command_id: header.command_id,
            sequence_id: header.sequence_id,
            body: bytes,
        })
    }
}

/// Read the length prefix and check it against the frame bounds.
///
/// Fewer than four bytes is reported as a truncated header.
fn check_length(buf: &[u8], max_frame_size: usize) -> Result<u32, WireError> {
    if buf.len() < 4 {
        return Err(WireError::Malformed {
            declared: 0,
            available: buf.len(),
        });
    }

    let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if (declared as usize) < MIN_FRAME_SIZE || declared as usize > max_frame_size {
        return Err(WireError::Malformed {
            declared,
            available: buf.len(),
        });
    }

    Ok(declared)
}

/// Frame decoder for parsing incoming frames from a byte stream
#[derive(Debug)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a decoder enforcing the frame bounds of `version`
    pub fn for_version(version: Version) -> Self {
        Self {
            max_frame_size: version.max_frame_size(),
        }
    }

    /// Maximum frame size accepted
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Decode one frame from a buffer.
    ///
    /// Returns `Ok(None)` while the buffered bytes do not yet hold a whole
    /// frame; nothing is consumed in that case.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        // Need at least 4 bytes for frame length
        if buf.len() < 4 {
            return Ok(None);
        }

        let total_len = check_length(buf, self.max_frame_size)? as usize;

        // Reject a bad command as soon as it is visible
        if buf.len() >= 8 {
            let command = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
            if !CommandId(command).is_valid() {
                return Err(WireError::InvalidCommand(command));
            }
        }

        if buf.len() < total_len {
            trace!("Partial frame: have {} of {} bytes", buf.len(), total_len);
            return Ok(None);
        }

        let mut frame_buf = buf.split_to(total_len).freeze();
        let header = Header::decode(&mut frame_buf)?;

        Ok(Some(Frame {
            command_id: header.command_id,
            sequence_id: header.sequence_id,
            body: frame_buf,
        }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
