//! Transfer error taxonomy.
//!
//! Remote-store failures are mapped into a small closed set of kinds at the
//! collaborator boundary. Retry decisions only ever look at the kind.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of failure encountered during a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,   // request or read timed out - retry
    Network,   // connection reset/closed, TLS, DNS - retry
    Throttled, // SlowDown and friends - retry
    Server,    // 5xx-style service errors - retry
    ClockSkew, // skewed clock or stale signature - retry
    Auth,      // access denied, expired credentials - NO retry
    NotFound,  // missing key or bucket - NO retry
    Io,        // local filesystem failure - NO retry
    Unknown,
}

impl ErrorKind {
    /// Returns true if failures of this kind are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::Network
                | ErrorKind::Throttled
                | ErrorKind::Server
                | ErrorKind::ClockSkew
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::Throttled => "throttled",
            ErrorKind::Server => "server",
            ErrorKind::ClockSkew => "clock_skew",
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Io => "io",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Map a structured remote-store error code to a kind.
    pub fn from_code(code: &str) -> ErrorKind {
        match code {
            "RequestTimeout" => ErrorKind::Timeout,
            "SlowDown" | "Throttling" | "ThrottlingException" | "TooManyRequests"
            | "RequestLimitExceeded" => ErrorKind::Throttled,
            "ServiceUnavailable" | "InternalError" | "InternalServerError" => ErrorKind::Server,
            "RequestTimeTooSkewed" | "SignatureDoesNotMatch" => ErrorKind::ClockSkew,
            "AccessDenied" | "InvalidAccessKeyId" | "ExpiredToken" | "InvalidToken"
            | "AllAccessDisabled" | "UnauthorizedAccess" => ErrorKind::Auth,
            "NoSuchKey" | "NoSuchBucket" | "NotFound" => ErrorKind::NotFound,
            _ => ErrorKind::Unknown,
        }
    }

    /// Classify an error that carries no structured code by its message.
    pub fn from_message(message: &str) -> ErrorKind {
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            ErrorKind::Timeout
        } else if [
            "connection",
            "reset",
            "closed",
            "network",
            "ssl",
            "tls",
            "handshake",
            "certificate",
            "dns",
        ]
        .iter()
        .any(|pattern| lower.contains(pattern))
        {
            ErrorKind::Network
        } else {
            ErrorKind::Unknown
        }
    }
}

/// Retry classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retryable,
    Fatal,
}

/// A failed transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({})", kind.as_str())]
pub struct TransferError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TransferError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build from a structured error code, e.g. `SlowDown`.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.is_empty() {
            code.to_string()
        } else {
            format!("{}: {}", code, message)
        };
        Self::new(ErrorKind::from_code(code), message)
    }

    /// Build from an unstructured message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorKind::from_message(&message), message)
    }

    pub fn classification(&self) -> Classification {
        if self.kind.is_retryable() {
            Classification::Retryable
        } else {
            Classification::Fatal
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => ErrorKind::Network,
            _ => ErrorKind::Io,
        };
        Self::new(kind, err.to_string())
    }
}
