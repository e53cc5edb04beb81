//! Realtime transport seam
//!
//! The session talks to the relay through [`RealtimeTransport`]. Relayed
//! events flow the other way: whoever owns the socket hands them to
//! [`BoardSession::handle_remote`](crate::BoardSession::handle_remote).

use async_trait::async_trait;
use board_core::{EventKind, RoomControl};
use serde_json::Value;

use crate::error::Result;

#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open the connection, presenting the bearer token in the handshake
    async fn connect(&self, token: &str) -> Result<()>;

    /// Send a room membership request
    async fn room(&self, control: RoomControl, board_id: &str) -> Result<()>;

    /// Send a board event under its inbound name
    async fn emit(&self, kind: EventKind, payload: Value) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}
