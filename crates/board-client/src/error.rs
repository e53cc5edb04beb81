//! Error types for board-client

use thiserror::Error;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Board model or backend error
    #[error(transparent)]
    Core(#[from] board_core::Error),

    /// The relay refused the connection
    #[error("Handshake failed: {message}")]
    Handshake { message: String },

    /// Sending to the relay failed
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Operation needs a joined board
    #[error("Not joined to a board")]
    NotJoined,

    /// Reconnect without a board to return to
    #[error("No board has been opened")]
    NoBoard,

    #[error("Invalid move: {message}")]
    InvalidMove { message: String },
}

impl ClientError {
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn invalid_move(message: impl Into<String>) -> Self {
        Self::InvalidMove {
            message: message.into(),
        }
    }
}
