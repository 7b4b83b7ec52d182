//! Wire protocol framing, command ids and packet model for CMPP.
//!
//! This crate is the stateless half of the client engine: it turns packets
//! into length-prefixed frames and back. It owns no sockets and keeps no
//! per-connection state.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------------+
//! | u32 total_length     | whole frame, header included     |
//! +----------------------+----------------------------------+
//! | u32 command_id       | request, or request | 0x80000000 |
//! +----------------------+----------------------------------+
//! | u32 sequence_id      | correlation token                |
//! +----------------------+----------------------------------+
//! | body                 | total_length - 12 bytes          |
//! +----------------------+----------------------------------+
//! ```
//!
//! All integers are big-endian.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod header;
pub mod packet;
pub mod registry;
pub mod status;

// Re-export main types
pub use error::WireError;
pub use frame::{Frame, FrameDecoder, DEFAULT_MAX_FRAME_SIZE};
pub use header::{
    CommandId, Header, Version, HEADER_SIZE, MIN_FRAME_SIZE, V2_MAX_FRAME_SIZE, V3_MAX_FRAME_SIZE,
};
pub use packet::{
    authenticator_source, local_timestamp, Connect2Rsp, Connect3Rsp, ConnectReq, Packet,
    RawPacket,
};
pub use registry::{Decoder, PacketRegistry};
pub use status::{check_login_status, LoginStatusError};
