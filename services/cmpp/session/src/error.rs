//! Session error types.

use crate::conn::ConnState;
use cmpp_wire::{LoginStatusError, WireError};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`Connection`](crate::Connection) and [`Client`](crate::Client)
#[derive(Error, Debug)]
pub enum Error {
    /// Transport could not be established
    #[error("dial {addr} failed: {source}")]
    Dial {
        /// Address that was dialled
        addr: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// A bounded wait expired
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Bytes did not parse as a valid frame or packet body
    #[error("malformed frame: {0}")]
    Malformed(#[source] WireError),

    /// A frame began arriving but did not complete
    #[error("data not being handled completed: {buffered} bytes buffered")]
    NotCompleted {
        /// Bytes of the partial frame held back
        buffered: usize,
    },

    /// The received packet is not the one the protocol step expects
    #[error("the response is not matched with the request: got command {0:#010x}")]
    RespNotMatch(u32),

    /// The ISMG rejected the login
    #[error(transparent)]
    LoginStatus(#[from] LoginStatusError),

    /// Operation not allowed in the current lifecycle state
    #[error("{op} not allowed in state {state:?}")]
    IllegalState {
        /// Operation attempted
        op: &'static str,
        /// State at the time
        state: ConnState,
    },

    /// Encoding or registry failure on an otherwise healthy connection
    #[error("wire error: {0}")]
    Wire(#[source] WireError),

    /// Transport failed during an otherwise valid operation
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for session operations
pub type Result<T> = std::result::Result<T, Error>;
