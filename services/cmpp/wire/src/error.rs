//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Declared total length is out of bounds or disagrees with the bytes available
    #[error("malformed frame: total_length {declared}, available {available}")]
    Malformed {
        /// Value of the length prefix
        declared: u32,
        /// Bytes actually present (or the limit that was violated)
        available: usize,
    },

    /// Unsupported protocol version
    #[error("version unsupported: {0:#04x}")]
    Version(u8),

    /// Version name not recognised
    #[error("unknown version {0:?}, expected 2.0, 2.1 or 3.0")]
    VersionName(String),

    /// Command id cannot be represented on the wire
    #[error("command id {0:#010x} cannot be encoded")]
    Encoding(u32),

    /// Command id is outside the protocol's request/response ranges
    #[error("invalid command id {0:#010x}")]
    InvalidCommand(u32),

    /// Frame would exceed the configured maximum
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Command id is valid but has no registered decoder
    #[error("command {0:#010x} not supported")]
    Unsupported(u32),

    /// Body length does not match the fixed layout of the packet
    #[error("body length for command {command:#010x}: expected {expected}, got {actual}")]
    BodyLength {
        /// Command id of the offending frame
        command: u32,
        /// Length required by the packet layout
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// A packet field does not fit its wire width
    #[error("field {field} too long: {len} > {max}")]
    Field {
        /// Field name
        field: &'static str,
        /// Supplied length
        len: usize,
        /// Wire width
        max: usize,
    },
}
