//! Relay registry - tracks connections and their board rooms

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use board_core::event::board_id_of;
use board_core::EventKind;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use super::{room_name, Delivery};
use crate::auth::Principal;
use crate::error::{RelayError, Result};

struct Connection {
    principal: Principal,
    tx: mpsc::Sender<Delivery>,
    rooms: HashSet<String>,
    connected_at: Instant,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<String, Connection>,
    rooms: HashMap<String, HashSet<String>>,
}

impl Registry {
    fn remove_member(&mut self, board_id: &str, connection_id: &str) -> bool {
        let Some(members) = self.rooms.get_mut(board_id) else {
            return false;
        };
        let removed = members.remove(connection_id);
        if members.is_empty() {
            self.rooms.remove(board_id);
        }
        removed
    }

    /// Queue a delivery for every member of a room except `skip`
    fn deliver(&self, board_id: &str, skip: Option<&str>, delivery: Delivery) -> usize {
        let Some(members) = self.rooms.get(board_id) else {
            return 0;
        };

        let mut delivered = 0;
        for member in members {
            if Some(member.as_str()) == skip {
                continue;
            }
            let Some(connection) = self.connections.get(member) else {
                continue;
            };
            match connection.tx.try_send(delivery.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!("Dropped {} for {}: queue full", delivery.event, member);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Dropped {} for {}: connection closed", delivery.event, member);
                }
            }
        }
        delivered
    }
}

/// Relay - owns the membership table for every live connection
#[derive(Default)]
pub struct Relay {
    registry: RwLock<Registry>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated connection and the queue feeding it
    pub async fn register(
        &self,
        connection_id: impl Into<String>,
        principal: Principal,
        tx: mpsc::Sender<Delivery>,
    ) {
        let connection_id = connection_id.into();
        let mut registry = self.registry.write().await;

        if let Some(previous) = registry.connections.remove(&connection_id) {
            warn!("Connection {} already registered, replacing it", connection_id);
            for board_id in previous.rooms {
                registry.remove_member(&board_id, &connection_id);
            }
        }

        info!(
            "Connection {} registered for user {}",
            connection_id, principal.user_id
        );
        registry.connections.insert(
            connection_id,
            Connection {
                principal,
                tx,
                rooms: HashSet::new(),
                connected_at: Instant::now(),
            },
        );
    }

    /// Add a connection to a board room. Joining twice is a no-op.
    pub async fn join(&self, connection_id: &str, board_id: &str) -> Result<bool> {
        let mut registry = self.registry.write().await;
        let connection = registry
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| RelayError::UnknownConnection(connection_id.to_string()))?;

        if !connection.rooms.insert(board_id.to_string()) {
            return Ok(false);
        }
        registry
            .rooms
            .entry(board_id.to_string())
            .or_default()
            .insert(connection_id.to_string());

        info!("Connection {} joined {}", connection_id, room_name(board_id));
        Ok(true)
    }

    /// Remove a connection from a board room. Safe when not a member.
    pub async fn leave(&self, connection_id: &str, board_id: &str) -> bool {
        let mut registry = self.registry.write().await;
        if let Some(connection) = registry.connections.get_mut(connection_id) {
            connection.rooms.remove(board_id);
        }

        let left = registry.remove_member(board_id, connection_id);
        if left {
            info!("Connection {} left {}", connection_id, room_name(board_id));
        }
        left
    }

    /// Forward a client event to the rest of its board room.
    ///
    /// Returns how many connections the event was queued for.
    pub async fn relay(
        &self,
        connection_id: &str,
        kind: EventKind,
        mut payload: Value,
    ) -> Result<usize> {
        let board_id =
            board_id_of(&payload).ok_or_else(|| RelayError::MissingBoardId(kind.to_string()))?;

        let registry = self.registry.read().await;
        if kind == EventKind::CursorMove {
            let connection = registry
                .connections
                .get(connection_id)
                .ok_or_else(|| RelayError::UnknownConnection(connection_id.to_string()))?;
            if let Value::Object(map) = &mut payload {
                map.insert(
                    "userId".to_string(),
                    Value::String(connection.principal.user_id.clone()),
                );
            }
        }

        let delivered = registry.deliver(
            &board_id,
            Some(connection_id),
            Delivery {
                event: kind.relayed_name(),
                payload,
            },
        );
        debug!(
            "Relayed {} from {} to {} peer(s) in {}",
            kind.relayed_name(),
            connection_id,
            delivered,
            room_name(&board_id)
        );
        Ok(delivered)
    }

    /// Deliver a server-originated event to every member of a board room.
    ///
    /// Nothing in this crate originates events; this is the hook for an
    /// embedding service (a REST layer, say) to announce its own writes.
    pub async fn publish(&self, board_id: &str, kind: EventKind, payload: Value) -> usize {
        let registry = self.registry.read().await;
        let delivered = registry.deliver(
            board_id,
            None,
            Delivery {
                event: kind.relayed_name(),
                payload,
            },
        );
        debug!(
            "Published {} to {} member(s) of {}",
            kind.relayed_name(),
            delivered,
            room_name(board_id)
        );
        delivered
    }

    /// Drop a connection and every room membership it held
    pub async fn disconnect(&self, connection_id: &str) -> Vec<String> {
        let mut registry = self.registry.write().await;
        let Some(connection) = registry.connections.remove(connection_id) else {
            return Vec::new();
        };

        let mut rooms: Vec<String> = connection.rooms.into_iter().collect();
        rooms.sort();
        for board_id in &rooms {
            registry.remove_member(board_id, connection_id);
        }

        info!(
            "Connection {} disconnected after {:?}, left {} room(s)",
            connection_id,
            connection.connected_at.elapsed(),
            rooms.len()
        );
        rooms
    }

    /// Boards a connection currently belongs to
    pub async fn rooms_of(&self, connection_id: &str) -> Vec<String> {
        let registry = self.registry.read().await;
        let mut rooms: Vec<String> = registry
            .connections
            .get(connection_id)
            .map(|connection| connection.rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Connections currently in a board room
    pub async fn members(&self, board_id: &str) -> Vec<String> {
        let registry = self.registry.read().await;
        let mut members: Vec<String> = registry
            .rooms
            .get(board_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.connections.len()
    }

    pub async fn room_count(&self) -> usize {
        self.registry.read().await.rooms.len()
    }
}
