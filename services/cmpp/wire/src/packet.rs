//! Packet model: the typed bodies carried inside frames.
//!
//! Only the session-level commands (login, terminate, active test) have a
//! layout here. Everything else travels as [`Packet::Raw`] and is laid out by
//! the embedding application.

use crate::header::{CommandId, Version};
use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};

/// Width of the source address field
pub const SOURCE_ADDR_LEN: usize = 6;

/// Width of the authenticator fields
pub const AUTH_LEN: usize = 16;

/// Login request body length
pub const CONNECT_REQ_BODY_LEN: usize = SOURCE_ADDR_LEN + AUTH_LEN + 1 + 4;

/// CMPP 2.x login response body length
pub const CONNECT2_RSP_BODY_LEN: usize = 1 + AUTH_LEN + 1;

/// CMPP 3.0 login response body length
pub const CONNECT3_RSP_BODY_LEN: usize = 4 + AUTH_LEN + 1;

/// Active test response body length
pub const ACTIVE_TEST_RSP_BODY_LEN: usize = 1;

/// Login request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectReq {
    /// Source address (the SP's account), at most 6 bytes
    pub source_addr: String,
    /// MD5 authenticator proving knowledge of the shared secret
    pub authenticator_source: [u8; AUTH_LEN],
    /// Requested protocol version
    pub version: Version,
    /// Timestamp in `MMDDHHMMSS` form
    pub timestamp: u32,
}

impl ConnectReq {
    /// Build a login request stamped with the current local time
    pub fn new(source_addr: &str, secret: &str, version: Version) -> Self {
        Self::with_timestamp(source_addr, secret, version, local_timestamp())
    }

    /// Build a login request with an explicit `MMDDHHMMSS` timestamp
    pub fn with_timestamp(source_addr: &str, secret: &str, version: Version, timestamp: u32) -> Self {
        Self {
            source_addr: source_addr.to_string(),
            authenticator_source: authenticator_source(source_addr, secret, timestamp),
            version,
            timestamp,
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        put_octet_string(buf, "source_addr", self.source_addr.as_bytes(), SOURCE_ADDR_LEN)?;
        buf.put_slice(&self.authenticator_source);
        buf.put_u8(self.version as u8);
        buf.put_u32(self.timestamp);
        Ok(())
    }

    fn decode(mut body: Bytes) -> Result<Self, WireError> {
        expect_len(CommandId::CONNECT, &body, CONNECT_REQ_BODY_LEN)?;

        let source_addr = get_octet_string(&mut body, SOURCE_ADDR_LEN);
        let mut authenticator_source = [0u8; AUTH_LEN];
        body.copy_to_slice(&mut authenticator_source);
        let version = Version::try_from(body.get_u8())?;
        let timestamp = body.get_u32();

        Ok(Self {
            source_addr,
            authenticator_source,
            version,
            timestamp,
        })
    }
}

/// CMPP 2.0/2.1 login response (one-byte status)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect2Rsp {
    /// Login status, 0 on success
    pub status: u8,
    /// ISMG authenticator
    pub auth_ismg: [u8; AUTH_LEN],
    /// Highest version supported by the ISMG
    pub version: u8,
}

impl Connect2Rsp {
    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u8(self.status);
        buf.put_slice(&self.auth_ismg);
        buf.put_u8(self.version);
    }

    fn decode(mut body: Bytes) -> Result<Self, WireError> {
        expect_len(CommandId::CONNECT_RESP, &body, CONNECT2_RSP_BODY_LEN)?;

        let status = body.get_u8();
        let mut auth_ismg = [0u8; AUTH_LEN];
        body.copy_to_slice(&mut auth_ismg);
        let version = body.get_u8();

        Ok(Self {
            status,
            auth_ismg,
            version,
        })
    }
}

/// CMPP 3.0 login response (four-byte status)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect3Rsp {
    /// Login status, 0 on success
    pub status: u32,
    /// ISMG authenticator
    pub auth_ismg: [u8; AUTH_LEN],
    /// Highest version supported by the ISMG
    pub version: u8,
}

impl Connect3Rsp {
    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.status);
        buf.put_slice(&self.auth_ismg);
        buf.put_u8(self.version);
    }

    fn decode(mut body: Bytes) -> Result<Self, WireError> {
        expect_len(CommandId::CONNECT_RESP, &body, CONNECT3_RSP_BODY_LEN)?;

        let status = body.get_u32();
        let mut auth_ismg = [0u8; AUTH_LEN];
        body.copy_to_slice(&mut auth_ismg);
        let version = body.get_u8();

        Ok(Self {
            status,
            auth_ismg,
            version,
        })
    }
}

/// Command whose body layout is owned by the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    /// Command id
    pub command_id: CommandId,
    /// Body bytes, written as-is
    pub body: Bytes,
}

/// A protocol packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Login request
    ConnectReq(ConnectReq),
    /// Login response, CMPP 2.x layout
    Connect2Rsp(Connect2Rsp),
    /// Login response, CMPP 3.0 layout
    Connect3Rsp(Connect3Rsp),
    /// Session termination request
    TerminateReq,
    /// Session termination response
    TerminateRsp,
    /// Link check request
    ActiveTestReq,
    /// Link check response
    ActiveTestRsp {
        /// Reserved byte
        reserved: u8,
    },
    /// Application-defined command
    Raw(RawPacket),
}

impl Packet {
    /// Command id carried in the header for this packet
    pub fn command_id(&self) -> CommandId {
        match self {
            Packet::ConnectReq(_) => CommandId::CONNECT,
            Packet::Connect2Rsp(_) | Packet::Connect3Rsp(_) => CommandId::CONNECT_RESP,
            Packet::TerminateReq => CommandId::TERMINATE,
            Packet::TerminateRsp => CommandId::TERMINATE_RESP,
            Packet::ActiveTestReq => CommandId::ACTIVE_TEST,
            Packet::ActiveTestRsp { .. } => CommandId::ACTIVE_TEST_RESP,
            Packet::Raw(raw) => raw.command_id,
        }
    }

    /// Serialise the body (everything after the header)
    pub fn encode_body(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::new();
        match self {
            Packet::ConnectReq(req) => req.encode_body(&mut buf)?,
            Packet::Connect2Rsp(rsp) => rsp.encode_body(&mut buf),
            Packet::Connect3Rsp(rsp) => rsp.encode_body(&mut buf),
            Packet::TerminateReq | Packet::TerminateRsp | Packet::ActiveTestReq => {}
            Packet::ActiveTestRsp { reserved } => buf.put_u8(*reserved),
            Packet::Raw(raw) => return Ok(raw.body.clone()),
        }
        Ok(buf.freeze())
    }

    /// Decode a login request body
    pub fn decode_connect_req(body: Bytes) -> Result<Self, WireError> {
        ConnectReq::decode(body).map(Packet::ConnectReq)
    }

    /// Decode a login response body.
    ///
    /// The layout is picked by body length, so a 2.x response reaching a 3.0
    /// client still decodes and can be rejected as the wrong variant. Any
    /// other length is reported against the layout `version` expects.
    pub fn decode_connect_rsp(version: Version, body: Bytes) -> Result<Self, WireError> {
        match body.len() {
            CONNECT2_RSP_BODY_LEN => Connect2Rsp::decode(body).map(Packet::Connect2Rsp),
            CONNECT3_RSP_BODY_LEN => Connect3Rsp::decode(body).map(Packet::Connect3Rsp),
            actual => Err(WireError::BodyLength {
                command: CommandId::CONNECT_RESP.get(),
                expected: if version.is_v2() {
                    CONNECT2_RSP_BODY_LEN
                } else {
                    CONNECT3_RSP_BODY_LEN
                },
                actual,
            }),
        }
    }

    /// Decode a body-less command
    pub fn decode_empty(command_id: CommandId, body: Bytes) -> Result<Self, WireError> {
        expect_len(command_id, &body, 0)?;
        match command_id {
            CommandId::TERMINATE => Ok(Packet::TerminateReq),
            CommandId::TERMINATE_RESP => Ok(Packet::TerminateRsp),
            CommandId::ACTIVE_TEST => Ok(Packet::ActiveTestReq),
            other => Err(WireError::Unsupported(other.get())),
        }
    }

    /// Decode an active test response body
    pub fn decode_active_test_rsp(body: Bytes) -> Result<Self, WireError> {
        expect_len(CommandId::ACTIVE_TEST_RESP, &body, ACTIVE_TEST_RSP_BODY_LEN)?;
        Ok(Packet::ActiveTestRsp { reserved: body[0] })
    }
}

/// MD5(source_addr ‖ 9 zero bytes ‖ secret ‖ timestamp as 10 digits)
pub fn authenticator_source(source_addr: &str, secret: &str, timestamp: u32) -> [u8; AUTH_LEN] {
    let mut hasher = Md5::new();
    hasher.update(source_addr.as_bytes());
    hasher.update([0u8; 9]);
    hasher.update(secret.as_bytes());
    hasher.update(format!("{:010}", timestamp).as_bytes());

    let mut out = [0u8; AUTH_LEN];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Current local time as `MMDDHHMMSS`
pub fn local_timestamp() -> u32 {
    let now = chrono::Local::now();
    now.format("%m%d%H%M%S")
        .to_string()
        .parse()
        .unwrap_or_default()
}

fn expect_len(command: CommandId, body: &Bytes, expected: usize) -> Result<(), WireError> {
    if body.len() != expected {
        return Err(WireError::BodyLength {
            command: command.get(),
            expected,
            actual: body.len(),
        });
    }
    Ok(())
}

fn put_octet_string(
    buf: &mut BytesMut,
    field: &'static str,
    value: &[u8],
    width: usize,
) -> Result<(), WireError> {
    if value.len() > width {
        return Err(WireError::Field {
            field,
            len: value.len(),
            max: width,
        });
    }
    buf.put_slice(value);
    buf.put_bytes(0, width - value.len());
    Ok(())
}

fn get_octet_string(body: &mut Bytes, width: usize) -> String {
    let raw = body.split_to(width);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
