//! Packet registry: maps a frame's command id to a typed [`Packet`].
//!
//! The registry is built for one protocol version, so the login response
//! variant is fixed when the registry is created rather than inspected at
//! each call site.

use crate::frame::Frame;
use crate::header::{CommandId, Version};
use crate::packet::{Packet, RawPacket};
use crate::WireError;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Body decoder for one command id
pub type Decoder = Arc<dyn Fn(Bytes) -> Result<Packet, WireError> + Send + Sync>;

/// Per-version table of body decoders
#[derive(Clone)]
pub struct PacketRegistry {
    version: Version,
    decoders: HashMap<CommandId, Decoder>,
}

impl PacketRegistry {
    /// Registry with the session-level commands pre-registered.
    ///
    /// The login response decodes by body length; `version` names the layout
    /// a wrong-sized body is reported against.
    pub fn new(version: Version) -> Self {
        let mut registry = Self::empty(version);

        registry.register(CommandId::CONNECT, Packet::decode_connect_req);
        registry.register(CommandId::CONNECT_RESP, move |body| {
            Packet::decode_connect_rsp(version, body)
        });
        for command in [CommandId::TERMINATE, CommandId::TERMINATE_RESP, CommandId::ACTIVE_TEST] {
            registry.register(command, move |body| Packet::decode_empty(command, body));
        }
        registry.register(CommandId::ACTIVE_TEST_RESP, Packet::decode_active_test_rsp);

        registry
    }

    /// Registry with no decoders at all
    pub fn empty(version: Version) -> Self {
        Self {
            version,
            decoders: HashMap::new(),
        }
    }

    /// Protocol version this registry decodes for
    pub fn version(&self) -> Version {
        self.version
    }

    /// Install a decoder, replacing any previous one for `command`
    pub fn register<F>(&mut self, command: CommandId, decoder: F)
    where
        F: Fn(Bytes) -> Result<Packet, WireError> + Send + Sync + 'static,
    {
        self.decoders.insert(command, Arc::new(decoder));
    }

    /// Pass `command` through as [`Packet::Raw`]
    pub fn register_raw(&mut self, command: CommandId) {
        self.register(command, move |body| {
            Ok(Packet::Raw(RawPacket {
                command_id: command,
                body,
            }))
        });
    }

    /// Whether a decoder exists for `command`
    pub fn contains(&self, command: CommandId) -> bool {
        self.decoders.contains_key(&command)
    }

    /// Decode the body of a complete frame
    pub fn decode(&self, frame: Frame) -> Result<Packet, WireError> {
        let decoder = self
            .decoders
            .get(&frame.command_id)
            .ok_or(WireError::Unsupported(frame.command_id.get()))?;
        decoder(frame.body)
    }
}

impl fmt::Debug for PacketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut commands: Vec<_> = self.decoders.keys().copied().collect();
        commands.sort();
        f.debug_struct("PacketRegistry")
            .field("version", &self.version)
            .field("commands", &commands)
            .finish()
    }
}
