//! Client side of the realtime Kanban board
//!
//! [`BoardSession`] keeps a local copy of one board, applies the user's
//! changes optimistically, writes them through a [`BoardBackend`] and
//! announces them over a [`RealtimeTransport`].
//!
//! [`BoardBackend`]: board_core::BoardBackend

pub mod error;
pub mod http;
pub mod session;
pub mod transport;

pub use error::{ClientError, Result};
pub use http::HttpBoardBackend;
pub use session::{BoardSession, ConnectionState, Notice, NoticeLevel};
pub use transport::RealtimeTransport;
