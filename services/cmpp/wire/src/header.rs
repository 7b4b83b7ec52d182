//! Fixed 12-byte packet header, command ids and protocol versions.
//!
//! Every CMPP packet starts with the same header regardless of command:
//! total length, command id and sequence id, all big-endian `u32`.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Header size in bytes
pub const HEADER_SIZE: usize = 12;

/// Smallest legal frame (header only)
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE;

/// Largest legal frame for CMPP 2.x
pub const V2_MAX_FRAME_SIZE: usize = 2477;

/// Largest legal frame for CMPP 3.0
pub const V3_MAX_FRAME_SIZE: usize = 3335;

const RESPONSE_BIT: u32 = 0x8000_0000;
const REQUEST_MIN: u32 = 0x0000_0000;
const REQUEST_MAX: u32 = 0x0000_0018;
const RESPONSE_MIN: u32 = RESPONSE_BIT | REQUEST_MIN;
const RESPONSE_MAX: u32 = RESPONSE_BIT | REQUEST_MAX;

/// Protocol version negotiated in the login request
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Version {
    /// CMPP 2.0
    #[serde(rename = "2.0", alias = "V20")]
    V20 = 0x20,
    /// CMPP 2.1
    #[serde(rename = "2.1", alias = "V21")]
    V21 = 0x21,
    /// CMPP 3.0
    #[serde(rename = "3.0", alias = "V30")]
    V30 = 0x30,
}

impl Version {
    /// Whether this version uses the one-byte login status
    pub fn is_v2(self) -> bool {
        matches!(self, Version::V20 | Version::V21)
    }

    /// Maximum frame size accepted for this version
    pub fn max_frame_size(self) -> usize {
        if self.is_v2() {
            V2_MAX_FRAME_SIZE
        } else {
            V3_MAX_FRAME_SIZE
        }
    }
}

impl TryFrom<u8> for Version {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x20 => Ok(Version::V20),
            0x21 => Ok(Version::V21),
            0x30 => Ok(Version::V30),
            _ => Err(crate::WireError::Version(value)),
        }
    }
}

impl std::str::FromStr for Version {
    type Err = crate::WireError;

    /// Accepts `2.0`, `V20`, `20` or `0x20` and likewise for the others
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix('V'))
            .or_else(|| trimmed.strip_prefix('v'))
            .unwrap_or(trimmed);

        match digits {
            "2.0" | "20" => Ok(Version::V20),
            "2.1" | "21" => Ok(Version::V21),
            "3.0" | "30" => Ok(Version::V30),
            _ => Err(crate::WireError::VersionName(s.to_string())),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::V20 => f.write_str("2.0"),
            Version::V21 => f.write_str("2.1"),
            Version::V30 => f.write_str("3.0"),
        }
    }
}

/// Command identifier carried in every header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(pub u32);

impl CommandId {
    /// Login request
    pub const CONNECT: CommandId = CommandId(0x0000_0001);
    /// Login response
    pub const CONNECT_RESP: CommandId = CommandId(0x8000_0001);
    /// Session termination request
    pub const TERMINATE: CommandId = CommandId(0x0000_0002);
    /// Session termination response
    pub const TERMINATE_RESP: CommandId = CommandId(0x8000_0002);
    /// Submit short message
    pub const SUBMIT: CommandId = CommandId(0x0000_0004);
    /// Submit response
    pub const SUBMIT_RESP: CommandId = CommandId(0x8000_0004);
    /// Deliver short message
    pub const DELIVER: CommandId = CommandId(0x0000_0005);
    /// Deliver response
    pub const DELIVER_RESP: CommandId = CommandId(0x8000_0005);
    /// Query statistics
    pub const QUERY: CommandId = CommandId(0x0000_0006);
    /// Query response
    pub const QUERY_RESP: CommandId = CommandId(0x8000_0006);
    /// Cancel a submitted message
    pub const CANCEL: CommandId = CommandId(0x0000_0007);
    /// Cancel response
    pub const CANCEL_RESP: CommandId = CommandId(0x8000_0007);
    /// Link check
    pub const ACTIVE_TEST: CommandId = CommandId(0x0000_0008);
    /// Link check response
    pub const ACTIVE_TEST_RESP: CommandId = CommandId(0x8000_0008);
    /// Gateway-to-gateway forward
    pub const FWD: CommandId = CommandId(0x0000_0009);
    /// Forward response
    pub const FWD_RESP: CommandId = CommandId(0x8000_0009);
    /// MT route
    pub const MT_ROUTE: CommandId = CommandId(0x0000_0010);
    /// MO route
    pub const MO_ROUTE: CommandId = CommandId(0x0000_0011);
    /// Fetch MT route
    pub const GET_MT_ROUTE: CommandId = CommandId(0x0000_0012);
    /// MT route update
    pub const MT_ROUTE_UPDATE: CommandId = CommandId(0x0000_0013);
    /// MO route update
    pub const MO_ROUTE_UPDATE: CommandId = CommandId(0x0000_0014);
    /// Push MT route update
    pub const PUSH_MT_ROUTE_UPDATE: CommandId = CommandId(0x0000_0015);
    /// Push MO route update
    pub const PUSH_MO_ROUTE_UPDATE: CommandId = CommandId(0x0000_0016);
    /// Fetch MO route
    pub const GET_MO_ROUTE: CommandId = CommandId(0x0000_0017);

    /// Raw value
    pub fn get(self) -> u32 {
        self.0
    }

    /// Whether this id lies inside the request or response range
    pub fn is_valid(self) -> bool {
        (self.0 > REQUEST_MIN && self.0 < REQUEST_MAX)
            || (self.0 > RESPONSE_MIN && self.0 < RESPONSE_MAX)
    }

    /// Whether this is a response command
    pub fn is_response(self) -> bool {
        self.0 & RESPONSE_BIT != 0
    }

    /// Response id paired with this request id
    pub fn response(self) -> CommandId {
        CommandId(self.0 | RESPONSE_BIT)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Length of the whole frame, header included
    pub total_length: u32,
    /// Command id
    pub command_id: CommandId,
    /// Sequence id used for request/response correlation
    pub sequence_id: u32,
}

impl Header {
    /// Encode the header to bytes (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.total_length);
        buf.put_u32(self.command_id.0);
        buf.put_u32(self.sequence_id);
    }

    /// Decode the header from the front of `buf`.
    ///
    /// Only the layout is checked here; bounds on `total_length` are the
    /// caller's concern.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, crate::WireError> {
        if buf.remaining() < HEADER_SIZE {
            return Err(crate::WireError::Malformed {
                declared: 0,
                available: buf.remaining(),
            });
        }

        Ok(Self {
            total_length: buf.get_u32(),
            command_id: CommandId(buf.get_u32()),
            sequence_id: buf.get_u32(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_id_ranges() {
        assert!(CommandId::CONNECT.is_valid());
        assert!(CommandId::CONNECT_RESP.is_valid());
        assert!(CommandId::GET_MO_ROUTE.is_valid());
        assert!(CommandId::GET_MO_ROUTE.response().is_valid());
        assert!(!CommandId(0).is_valid());
        assert!(!CommandId(0x18).is_valid());
        assert!(!CommandId(0x8000_0000).is_valid());
        assert!(!CommandId(0x8000_0018).is_valid());
        assert!(!CommandId(0xFFFF_FFFF).is_valid());
    }

    #[test]
    fn test_response_pairing() {
        assert_eq!(CommandId::CONNECT.response(), CommandId::CONNECT_RESP);
        assert_eq!(CommandId::ACTIVE_TEST.response(), CommandId::ACTIVE_TEST_RESP);
        assert!(CommandId::TERMINATE_RESP.is_response());
        assert!(!CommandId::SUBMIT.is_response());
    }

    #[test]
    fn test_version_bounds() {
        assert_eq!(Version::V20.max_frame_size(), V2_MAX_FRAME_SIZE);
        assert_eq!(Version::V21.max_frame_size(), V2_MAX_FRAME_SIZE);
        assert_eq!(Version::V30.max_frame_size(), V3_MAX_FRAME_SIZE);
        assert_eq!(Version::try_from(0x30).unwrap(), Version::V30);
        assert!(Version::try_from(0x31).is_err());
    }

    #[test]
    fn test_version_names() {
        for name in ["2.0", "V20", "20", "0x20"] {
            assert_eq!(name.parse::<Version>().unwrap(), Version::V20);
        }
        assert_eq!(" 3.0 ".parse::<Version>().unwrap(), Version::V30);
        assert_eq!("v21".parse::<Version>().unwrap(), Version::V21);
        assert_eq!(Version::V21.to_string().parse::<Version>().unwrap(), Version::V21);
        assert!(matches!(
            "4.0".parse::<Version>(),
            Err(crate::WireError::VersionName(_))
        ));
    }

    #[test]
    fn test_header_encode_decode() {
        let header = Header {
            total_length: 39,
            command_id: CommandId::CONNECT,
            sequence_id: 0xDEAD_BEEF,
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[..4], &[0, 0, 0, 39]);

        let mut bytes = buf.freeze();
        assert_eq!(Header::decode(&mut bytes).unwrap(), header);
    }

    #[test]
    fn test_truncated_header() {
        let mut short: &[u8] = &[0, 0, 0, 12, 0, 0];
        assert!(matches!(
            Header::decode(&mut short),
            Err(crate::WireError::Malformed { .. })
        ));
    }
}
