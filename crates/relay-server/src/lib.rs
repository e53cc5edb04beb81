//! Realtime relay server for the Kanban board
//!
//! Authenticated Socket.IO connections join board rooms; board mutations
//! emitted by one member are relayed to the rest of the room.

pub mod auth;
pub mod config;
pub mod error;
pub mod relay;
pub mod routes;
pub mod socket;

pub use auth::{Principal, TokenVerifier};
pub use config::RelayConfig;
pub use error::RelayError;
pub use relay::{Delivery, Relay};
