use thiserror::Error;

/// Result type for room store operations.
pub type RoomResult<T> = Result<T, RoomError>;

/// Room-store errors.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room unavailable: {0}")]
    Unavailable(String),

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for RoomError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}
