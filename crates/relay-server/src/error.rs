//! Error types for the relay server

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Authentication error: token missing")]
    MissingToken,

    #[error("Authentication error: {0}")]
    InvalidToken(String),

    #[error("Failed to sign token: {0}")]
    TokenIssue(String),

    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    #[error("No board id in {0} payload")]
    MissingBoardId(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
