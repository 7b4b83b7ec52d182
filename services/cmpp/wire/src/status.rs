//! Login response status codes.
//!
//! Status 0 means the ISMG accepted the login. Every other value maps to a
//! [`LoginStatusError`]; codes without a table entry map to
//! [`LoginStatusError::Rejected`] so that no status is ever mistaken for
//! success.

use crate::header::Version;
use thiserror::Error;
use tracing::debug;

/// Reasons an ISMG can reject a login
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatusError {
    /// Status 1
    #[error("connect response status: invalid protocol structure")]
    InvalidStructure,
    /// Status 2
    #[error("connect response status: invalid source address")]
    InvalidSourceAddr,
    /// Status 3
    #[error("connect response status: authentication failed")]
    AuthFailed,
    /// Status 4
    #[error("connect response status: protocol version is too high")]
    VersionTooHigh,
    /// Status 5
    #[error("connect response status: other error")]
    Other,
    /// Any status without a table entry
    #[error("connect response status: login rejected (status {0})")]
    Rejected(u32),
}

impl LoginStatusError {
    /// Status code this error was mapped from
    pub fn code(&self) -> u32 {
        match self {
            LoginStatusError::InvalidStructure => 1,
            LoginStatusError::InvalidSourceAddr => 2,
            LoginStatusError::AuthFailed => 3,
            LoginStatusError::VersionTooHigh => 4,
            LoginStatusError::Other => 5,
            LoginStatusError::Rejected(code) => *code,
        }
    }
}

/// Translate a login status into a result.
///
/// 2.x and 3.0 use the same table for codes 1..=5, so `version` does not
/// change the mapping; it is carried for the log line. A 3.0 status is four
/// bytes wide and is never truncated before lookup.
pub fn check_login_status(version: Version, status: u32) -> Result<(), LoginStatusError> {
    if status == 0 {
        return Ok(());
    }

    let mapped = match status {
        1 => LoginStatusError::InvalidStructure,
        2 => LoginStatusError::InvalidSourceAddr,
        3 => LoginStatusError::AuthFailed,
        4 => LoginStatusError::VersionTooHigh,
        5 => LoginStatusError::Other,
        code => LoginStatusError::Rejected(code),
    };
    debug!("CMPP {} login status {} -> {}", version, status, mapped);
    Err(mapped)
}
