//! Room-scoped event relay
//!
//! Connections join board rooms and every mutation they emit is delivered to
//! the other members of the room. The relay never looks inside a payload
//! beyond the board id it routes on.

mod registry;

pub use registry::Relay;

use serde_json::Value;

/// An event queued for one connection
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub event: &'static str,
    pub payload: Value,
}

/// Socket.IO room name for a board
pub fn room_name(board_id: &str) -> String {
    format!("project:{}", board_id)
}
