//! Crate-wide error alias plus the lower-level error enums each layer raises.
//!
//! Layers that must branch on a specific failure (authentication outcomes,
//! framing errors) keep their own typed enum. Everything else composes into
//! [`Error`] at the boundary where the caller only needs to log and move on.

use std::fmt;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

/// Errors the TLS acceptor / TUN device layers can raise at startup or
/// during a fatal I/O fault.
#[derive(Debug)]
pub enum TlsError {
    CertLoad(String),
    KeyLoad(String),
    Config(String),
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsError::CertLoad(msg) => write!(f, "failed to load certificate: {msg}"),
            TlsError::KeyLoad(msg) => write!(f, "failed to load private key: {msg}"),
            TlsError::Config(msg) => write!(f, "invalid TLS configuration: {msg}"),
        }
    }
}

impl std::error::Error for TlsError {}

#[derive(Debug)]
pub enum TunError {
    Create(String),
    AssignIp(String),
    Io(std::io::Error),
    Closed,
}

impl fmt::Display for TunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunError::Create(msg) => write!(f, "failed to create TUN device: {msg}"),
            TunError::AssignIp(msg) => write!(f, "failed to assign TUN address: {msg}"),
            TunError::Io(e) => write!(f, "TUN I/O error: {e}"),
            TunError::Closed => write!(f, "TUN device closed"),
        }
    }
}

impl std::error::Error for TunError {}

impl From<std::io::Error> for TunError {
    fn from(e: std::io::Error) -> Self {
        TunError::Io(e)
    }
}

/// Reasons an authentication attempt does not succeed. Kept distinct from
/// [`Error`] because the session layer must choose a specific
/// `errorMessage` per spec.md §7 based on which variant fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    InvalidCredentials,
    AccountDisabled,
    MaxConnections,
    PoolExhausted,
    Internal(String),
}

impl AuthError {
    /// The bounded, client-visible message for this failure (spec.md §7).
    pub fn client_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "Invalid credentials",
            AuthError::AccountDisabled => "Account is disabled",
            AuthError::MaxConnections => "Maximum connections reached",
            AuthError::PoolExhausted => "No available IP addresses",
            AuthError::Internal(_) => "Internal server error",
        }
    }

    /// The detail recorded in `connection_logs.details` for an `auth_fail`
    /// event (spec.md §8 scenario 2) — more specific than the bounded
    /// client-visible message, since this one never leaves the server.
    pub fn log_detail(&self) -> String {
        match self {
            AuthError::InvalidCredentials => "Wrong password".to_string(),
            AuthError::AccountDisabled => "Account disabled".to_string(),
            AuthError::MaxConnections => "Maximum connections reached".to_string(),
            AuthError::PoolExhausted => "No available IP addresses".to_string(),
            AuthError::Internal(msg) => msg.clone(),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "invalid credentials"),
            AuthError::AccountDisabled => write!(f, "account disabled"),
            AuthError::MaxConnections => write!(f, "max connections reached"),
            AuthError::PoolExhausted => write!(f, "no available IP addresses"),
            AuthError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

#[derive(Debug)]
pub enum PoolError {
    Exhausted,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Exhausted => "No available IP addresses".fmt(f),
        }
    }
}

impl std::error::Error for PoolError {}
