//! Error types for the Slack archiver

use std::time::Duration;

use thiserror::Error;

/// Failure of a remote call below the application protocol.
///
/// Returned by [`crate::client::Client`] implementations. The core never
/// retries these; the caller-side [`crate::retry::RetryingClient`] may.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("HTTP error{}: {message}", .status.map(|s| format!(" {s}")).unwrap_or_default())]
    Http {
        status: Option<u16>,
        message: String,
    },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("API error: {0}")]
    Api(String),
}

impl ClientError {
    /// Network failures and 5xx responses are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http { status: None, .. } => true,
            ClientError::Http {
                status: Some(code), ..
            } => *code >= 500,
            ClientError::RateLimited { .. } => true,
            ClientError::Decode(_) | ClientError::Api(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{op} {target}: call failed: {source}")]
    Transport {
        op: &'static str,
        target: String,
        #[source]
        source: ClientError,
    },

    #[error("{op} {target}: server rejected query: {reason}")]
    ServerRejected {
        op: &'static str,
        target: String,
        reason: String,
    },

    #[error("{op} {target}: {what} not found")]
    NotFound {
        op: &'static str,
        target: String,
        what: &'static str,
    },

    #[error("{op} {target}: cancelled")]
    Cancelled { op: &'static str, target: String },

    #[error("user {user_id} could not be resolved: {reason}")]
    UnresolvedUser { user_id: String, reason: String },

    #[error("rate limiter for {0} is exhausted and never refills")]
    LimiterExhausted(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the run was cancelled rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// True when a well-formed response simply had nothing to return.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub(crate) fn transport(op: &'static str, target: impl Into<String>, source: ClientError) -> Self {
        Error::Transport {
            op,
            target: target.into(),
            source,
        }
    }

    pub(crate) fn rejected(
        op: &'static str,
        target: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        Error::ServerRejected {
            op,
            target: target.into(),
            reason: reason.unwrap_or_else(|| "unknown_error".to_string()),
        }
    }

    pub(crate) fn cancelled(op: &'static str, target: impl Into<String>) -> Self {
        Error::Cancelled {
            op,
            target: target.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}
