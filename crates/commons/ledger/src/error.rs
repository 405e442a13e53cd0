//! Ledger errors.

use commons_room::RoomError;
use commons_types::ClosedSetError;
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors returned by ledger operations.
///
/// Only validation failures and authoritative-write failures surface here.
/// A rejected allocation is a normal result, and best-effort writes report
/// their outcome on the returned receipt instead.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("permission denied: {actor} may not {action} {target}")]
    PermissionDenied {
        actor: String,
        action: &'static str,
        target: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("room store error: {0}")]
    Room(#[from] RoomError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation(message.into())
    }

    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        LedgerError::NotFound(format!("{what} {id}"))
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LedgerError::Validation(_) | LedgerError::PermissionDenied { .. } | LedgerError::NotFound(_)
        )
    }
}

impl From<ClosedSetError> for LedgerError {
    fn from(err: ClosedSetError) -> Self {
        LedgerError::Validation(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(err: config::ConfigError) -> Self {
        LedgerError::Config(err.to_string())
    }
}
