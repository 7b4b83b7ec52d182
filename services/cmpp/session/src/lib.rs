//! Connection lifecycle and client handshake for CMPP.
//!
//! This crate owns the transport: it dials the ISMG, tracks the
//! connection state machine, allocates sequence ids and performs the
//! login exchange before handing the session to the application.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cmpp_session::Client;
//! use cmpp_wire::{Packet, Version};
//! use std::time::Duration;
//!
//! # async fn run() -> cmpp_session::Result<()> {
//! let mut client = Client::new(Version::V30);
//! client
//!     .connect("127.0.0.1:7891", "900001", "secret", Duration::from_secs(2))
//!     .await?;
//!
//! let seq = client.send_request_with_id(&Packet::ActiveTestReq).await?;
//! let reply = client.receive(Duration::from_secs(5)).await?;
//! assert_eq!(reply.sequence_id, seq);
//!
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod conn;
pub mod error;
pub mod seq;
pub mod transport;

// Re-export main types
pub use client::Client;
pub use conn::{ConnState, Connection, Incoming};
pub use error::{Error, Result};
pub use seq::SequenceAllocator;
