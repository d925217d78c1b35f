//! # Errors
//!
//! Tally carries one error taxonomy across every crate:
//! - `NetworkUnreachable`: no response was received at all
//! - `Http`: the backend answered with a non-2xx status
//! - `AccountDeleted`: the signed-in identity can no longer be resolved
//! - `Validation`: a client-side precondition failed before any call was made
//! - `Storage`: a storage tier refused a read or write
//!
//! Errors are `Clone` so a single settled request can be handed to every
//! caller that was waiting on it.

use anyhow::Error as AnyError;
use thiserror::Error;

/// A convenience result type for Tally APIs.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Message used when a response body could not be understood.
pub const UNEXPECTED_RESPONSE: &str = "Unexpected response from server";

/// Substrings that mark an error message as "this account is gone".
const DELETION_INDICATORS: &[&str] = &[
    "deleted",
    "not found",
    "inactive",
    "deactivated",
    "does not exist",
    "no longer",
    "disabled",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NetworkUnreachable,
    Http,
    AccountDeleted,
    Validation,
    Storage,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::NetworkUnreachable => "NetworkUnreachable",
            ErrorKind::Http => "HttpError",
            ErrorKind::AccountDeleted => "AccountDeleted",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Storage => "StorageError",
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            ErrorKind::NetworkUnreachable => "network-unreachable",
            ErrorKind::Http => "http-error",
            ErrorKind::AccountDeleted => "account-deleted",
            ErrorKind::Validation => "validation-error",
            ErrorKind::Storage => "storage-error",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Network unreachable: {message}")]
    NetworkUnreachable { message: String },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Account no longer exists: {email}")]
    AccountDeleted { email: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl ClientError {
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::NetworkUnreachable {
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn account_deleted(email: impl Into<String>) -> Self {
        Self::AccountDeleted {
            email: email.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Body could not be parsed; keep the status, drop the parser detail.
    pub fn unexpected_response(status: u16) -> Self {
        Self::http(status, UNEXPECTED_RESPONSE)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::NetworkUnreachable { .. } => ErrorKind::NetworkUnreachable,
            ClientError::Http { .. } => ErrorKind::Http,
            ClientError::AccountDeleted { .. } => ErrorKind::AccountDeleted,
            ClientError::Validation { .. } => ErrorKind::Validation,
            ClientError::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// HTTP status, when the backend answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ClientError::NetworkUnreachable { message }
            | ClientError::Http { message, .. }
            | ClientError::Validation { message }
            | ClientError::Storage { message } => message,
            ClientError::AccountDeleted { email } => email,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, ClientError::NetworkUnreachable { .. })
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// True when the backend is telling us the identity is gone: a 404, or
    /// an error message carrying one of the deletion indicators.
    pub fn indicates_deletion(&self) -> bool {
        match self {
            ClientError::AccountDeleted { .. } => true,
            ClientError::Http { status, message } => {
                *status == 404 || is_deletion_indicator(message)
            }
            _ => false,
        }
    }

    /// Turn any error into a ClientError:
    /// - if it's already a ClientError, keep it (lossless)
    /// - otherwise wrap as a generic 500
    pub fn normalize(err: AnyError) -> ClientError {
        match err.downcast::<ClientError>() {
            Ok(client) => client,
            Err(other) => {
                tracing::debug!(error = %other, "normalizing foreign error");
                ClientError::http(500, "Something went wrong")
            }
        }
    }

    pub fn into_anyhow(self) -> AnyError {
        AnyError::new(self)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }
}

/// Case-insensitive check for deletion/inactivity wording in a backend message.
pub fn is_deletion_indicator(message: &str) -> bool {
    let lower = message.to_lowercase();
    DELETION_INDICATORS.iter().any(|needle| lower.contains(needle))
}
