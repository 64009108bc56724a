//! Application error model
//!
//! Defines a typed error hierarchy using `thiserror`. Tool handlers never
//! surface these as protocol faults; every variant is rendered into the
//! `error` field of a failed tool response, keeping the underlying cause text.

use thiserror::Error;

/// Application error type
///
/// Covers all error cases the email MCP server may encounter.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or invalid account configuration
    #[error("configuration error: {0}")]
    Config(String),
    /// Session establishment failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// Operation deadline exceeded; the in-flight work was abandoned
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Resource not found (account, message)
    #[error("not found: {0}")]
    NotFound(String),
    /// Invalid caller input (missing compose fields, malformed ids)
    #[error("invalid input: {0}")]
    Validation(String),
    /// Server rejected a command inside an established session
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Delivery transport rejected the outgoing message
    #[error("delivery failed: {0}")]
    Delivery(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `Validation`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Classified failure while opening a mailbox session
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection refused by {host}:{port}: {detail}")]
    Refused {
        host: String,
        port: u16,
        detail: String,
    },
    #[error("connection to {host}:{port} timed out: {detail}")]
    Timeout {
        host: String,
        port: u16,
        detail: String,
    },
    #[error(
        "TLS negotiation with {host}:{port} failed: {detail}; check that the secure flag matches the server port"
    )]
    Tls {
        host: String,
        port: u16,
        detail: String,
    },
    #[error("authentication rejected for {user}: {detail}")]
    Auth { user: String, detail: String },
    #[error("protocol error talking to {host}:{port}: {detail}")]
    Protocol {
        host: String,
        port: u16,
        detail: String,
    },
}

/// Endpoint identity used when classifying connect failures
#[derive(Debug, Clone, Copy)]
pub struct Endpoint<'a> {
    pub host: &'a str,
    pub port: u16,
    pub user: &'a str,
}

impl Endpoint<'_> {
    pub fn refused(&self, detail: impl Into<String>) -> ConnectionError {
        ConnectionError::Refused {
            host: self.host.to_owned(),
            port: self.port,
            detail: detail.into(),
        }
    }

    pub fn timed_out(&self, detail: impl Into<String>) -> ConnectionError {
        ConnectionError::Timeout {
            host: self.host.to_owned(),
            port: self.port,
            detail: detail.into(),
        }
    }

    pub fn tls(&self, detail: impl Into<String>) -> ConnectionError {
        ConnectionError::Tls {
            host: self.host.to_owned(),
            port: self.port,
            detail: detail.into(),
        }
    }

    pub fn auth(&self, detail: impl Into<String>) -> ConnectionError {
        ConnectionError::Auth {
            user: self.user.to_owned(),
            detail: detail.into(),
        }
    }

    pub fn protocol(&self, detail: impl Into<String>) -> ConnectionError {
        ConnectionError::Protocol {
            host: self.host.to_owned(),
            port: self.port,
            detail: detail.into(),
        }
    }

    /// Classify a connect failure from its message text
    ///
    /// Only used when the underlying failure carries no structured kind.
    /// Anything unrecognised falls back to `ConnectionError::Protocol`.
    pub fn classify(&self, detail: impl Into<String>) -> ConnectionError {
        let detail = detail.into();
        let lower = detail.to_ascii_lowercase();
        if lower.contains("connection refused") || lower.contains("econnrefused") {
            self.refused(detail)
        } else if lower.contains("timeout") || lower.contains("timed out") {
            self.timed_out(detail)
        } else if lower.contains("certificate") || lower.contains("ssl") || lower.contains("tls")
        {
            self.tls(detail)
        } else if lower.contains("invalid credentials")
            || lower.contains("auth")
            || lower.contains("login")
        {
            self.auth(detail)
        } else {
            self.protocol(detail)
        }
    }
}

/// Type alias for fallible return values
pub type AppResult<T> = Result<T, AppError>;
