//! TCP transport for CMPP connections.

use crate::error::{Error, Result};
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

/// Connect to `addr`, giving up after `timeout`.
///
/// A zero `timeout` waits for the operating system's own connect timeout.
pub async fn dial<A>(addr: A, timeout: Duration) -> Result<TcpStream>
where
    A: ToSocketAddrs + std::fmt::Display,
{
    let label = addr.to_string();
    debug!("Dialing {} (timeout {:?})", label, timeout);

    let connect = TcpStream::connect(addr);
    let result = if timeout.is_zero() {
        connect.await
    } else {
        tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| Error::Timeout(timeout))?
    };

    let stream = result.map_err(|source| Error::Dial {
        addr: label.clone(),
        source,
    })?;
    stream.set_nodelay(true)?;

    debug!("Connected to {}", label);
    Ok(stream)
}
