//! CMPP client: dials an ISMG, performs the login handshake and then hands
//! out request and response sending on the authenticated connection.

use crate::conn::{ConnState, Connection, Incoming};
use crate::error::{Error, Result};
use cmpp_wire::{check_login_status, ConnectReq, Packet, PacketRegistry, Version};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::ToSocketAddrs;
use tracing::{debug, info, warn};

/// Client side of one CMPP session
pub struct Client {
    version: Version,
    registry: Arc<PacketRegistry>,
    conn: Option<Arc<Connection>>,
    logged_in: bool,
}

impl Client {
    /// Client speaking `version`, decoding with the default packet set
    pub fn new(version: Version) -> Self {
        Self::with_registry(Arc::new(PacketRegistry::new(version)))
    }

    /// Client decoding incoming frames through `registry`.
    ///
    /// The protocol version is the registry's.
    pub fn with_registry(registry: Arc<PacketRegistry>) -> Self {
        Self {
            version: registry.version(),
            registry,
            conn: None,
            logged_in: false,
        }
    }

    /// Protocol version in use
    pub fn version(&self) -> Version {
        self.version
    }

    /// State of the current connection; [`ConnState::Init`] before any dial
    pub fn state(&self) -> ConnState {
        self.conn
            .as_ref()
            .map(|conn| conn.state())
            .unwrap_or(ConnState::Init)
    }

    /// Shared handle to the underlying connection, for concurrent use
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.conn.clone()
    }

    /// Dial `addr` and log in as `user`.
    ///
    /// `timeout` bounds the dial only; the wait for the login response is
    /// unbounded. Any failure after the dial leaves the connection closed.
    pub async fn connect<A>(&mut self, addr: A, user: &str, secret: &str, timeout: Duration) -> Result<()>
    where
        A: ToSocketAddrs + std::fmt::Display,
    {
        let state = self.state();
        if matches!(state, ConnState::Connected | ConnState::AuthOk) {
            return Err(Error::IllegalState { op: "connect", state });
        }

        info!("Connecting to ISMG {} as {} ({})", addr, user, self.version);
        let conn = Arc::new(Connection::open(addr, timeout, self.registry.clone()).await?);
        self.conn = Some(conn.clone());
        self.logged_in = false;

        if let Err(e) = self.login(&conn, user, secret).await {
            warn!("Login as {} failed: {}", user, e);
            conn.close().await;
            return Err(e);
        }

        self.logged_in = true;
        info!("Logged in as {}", user);
        Ok(())
    }

    async fn login(&self, conn: &Connection, user: &str, secret: &str) -> Result<()> {
        let request = Packet::ConnectReq(ConnectReq::new(user, secret, self.version));
        let seq = conn.sequence().next();
        conn.send_packet(&request, seq).await?;
        debug!("Sent CONNECT seq {}", seq);

        let incoming = conn.receive(Duration::ZERO).await?;
        if incoming.sequence_id != seq {
            warn!(
                "CONNECT_RESP seq {} does not echo request seq {}",
                incoming.sequence_id, seq
            );
        }

        let status = match (self.version.is_v2(), incoming.packet) {
            (true, Packet::Connect2Rsp(rsp)) => u32::from(rsp.status),
            (false, Packet::Connect3Rsp(rsp)) => rsp.status,
            (_, other) => return Err(Error::RespNotMatch(other.command_id().get())),
        };

        check_login_status(self.version, status)?;
        conn.set_state(ConnState::AuthOk)
    }

    /// Close the session. Fails if no login ever succeeded.
    pub async fn disconnect(&mut self) -> Result<()> {
        let conn = match (&self.conn, self.logged_in) {
            (Some(conn), true) => conn,
            _ => {
                return Err(Error::IllegalState {
                    op: "disconnect",
                    state: self.state(),
                })
            }
        };

        conn.close().await;
        Ok(())
    }

    fn current(&self, op: &'static str) -> Result<&Arc<Connection>> {
        self.conn.as_ref().ok_or(Error::IllegalState {
            op,
            state: ConnState::Init,
        })
    }

    /// Send a request under a freshly allocated sequence id
    pub async fn send_request(&self, packet: &Packet) -> Result<()> {
        self.send_request_with_id(packet).await.map(|_| ())
    }

    /// Send a request and return the sequence id it went out with
    pub async fn send_request_with_id(&self, packet: &Packet) -> Result<u32> {
        let conn = self.current("send_request")?;
        let seq = conn.sequence().next();
        conn.send_packet(packet, seq).await?;
        Ok(seq)
    }

    /// Send a response echoing the request's `sequence_id`
    pub async fn send_response(&self, packet: &Packet, sequence_id: u32) -> Result<()> {
        self.current("send_response")?
            .send_packet(packet, sequence_id)
            .await
    }

    /// Wait for the next packet; `Duration::ZERO` waits indefinitely
    pub async fn receive(&self, timeout: Duration) -> Result<Incoming> {
        self.current("receive")?.receive(timeout).await
    }
}
