//! Socket.IO adapter for the relay
//!
//! The handshake is checked by a connect middleware; only authenticated
//! sockets get the room and board event handlers attached.

use std::sync::Arc;

use axum::http::HeaderMap;
use board_core::event::board_id_of;
use board_core::{EventKind, RoomControl};
use serde::Deserialize;
use serde_json::Value;
use socketioxide::extract::{Data, SocketRef, State, TryData};
use socketioxide::handler::ConnectHandler;
use socketioxide::{SocketIo, TransportType};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auth::{bearer_token, TokenVerifier};
use crate::error::RelayError;
use crate::relay::Relay;

/// Shared state for Socket.IO handlers
#[derive(Clone)]
pub struct SocketState {
    pub relay: Arc<Relay>,
    pub verifier: Arc<TokenVerifier>,
    pub outbound_buffer: usize,
}

/// The `auth` object sent with the Socket.IO handshake
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeAuth {
    #[serde(default)]
    pub token: Option<String>,
}

/// Pick the handshake credential: `auth.token` first, then the
/// `Authorization: Bearer` header. Blank tokens count as absent.
fn handshake_token(auth: Option<HandshakeAuth>, headers: &HeaderMap) -> Option<String> {
    auth.and_then(|auth| auth.token)
        .filter(|token| !token.trim().is_empty())
        .or_else(|| bearer_token(headers).map(str::to_string))
}

/// Verify the handshake credential and register the connection
async fn authenticate(
    socket: SocketRef,
    TryData(auth): TryData<HandshakeAuth>,
    State(state): State<SocketState>,
) -> Result<(), RelayError> {
    let Some(token) = handshake_token(auth.ok(), &socket.req_parts().headers) else {
        warn!("Rejected connection {}: no token", socket.id);
        return Err(RelayError::MissingToken);
    };

    let principal = state.verifier.verify(&token).map_err(|err| {
        warn!("Rejected connection {}: {}", socket.id, err);
        err
    })?;

    let (tx, mut rx) = mpsc::channel(state.outbound_buffer);
    state
        .relay
        .register(socket.id.to_string(), principal, tx)
        .await;

    let forward = socket.clone();
    tokio::spawn(async move {
        while let Some(delivery) = rx.recv().await {
            if let Err(e) = forward.emit(delivery.event, &delivery.payload) {
                debug!("Failed to emit {} to {}: {}", delivery.event, forward.id, e);
            }
        }
    });

    Ok(())
}

/// Handle new socket connection
pub async fn on_connect(socket: SocketRef) {
    info!("Client connected: {}", socket.id);

    socket.on(
        RoomControl::Join.name(),
        |socket: SocketRef, State(state): State<SocketState>, Data(data): Data<Value>| async move {
            handle_room(socket, state, RoomControl::Join, data).await;
        },
    );

    socket.on(
        RoomControl::Leave.name(),
        |socket: SocketRef, State(state): State<SocketState>, Data(data): Data<Value>| async move {
            handle_room(socket, state, RoomControl::Leave, data).await;
        },
    );

    for kind in EventKind::ALL {
        socket.on(
            kind.inbound_name(),
            move |socket: SocketRef, State(state): State<SocketState>, Data(data): Data<Value>| async move {
                handle_relay(socket, state, kind, data).await;
            },
        );
    }

    socket.on_disconnect(|socket: SocketRef, State(state): State<SocketState>| async move {
        let rooms = state.relay.disconnect(&socket.id.to_string()).await;
        info!("Client disconnected: {} ({} room(s))", socket.id, rooms.len());
    });
}

async fn handle_room(socket: SocketRef, state: SocketState, control: RoomControl, data: Value) {
    let Some(board_id) = board_id_of(&data) else {
        warn!("{} from {} without a board id", control.name(), socket.id);
        return;
    };
    let connection_id = socket.id.to_string();

    match control {
        RoomControl::Join => {
            if let Err(e) = state.relay.join(&connection_id, &board_id).await {
                warn!("Failed to join {}: {}", board_id, e);
            }
        }
        RoomControl::Leave => {
            state.relay.leave(&connection_id, &board_id).await;
        }
    }
}

async fn handle_relay(socket: SocketRef, state: SocketState, kind: EventKind, data: Value) {
    if let Err(e) = state
        .relay
        .relay(&socket.id.to_string(), kind, data)
        .await
    {
        debug!("Not relaying {} from {}: {}", kind, socket.id, e);
    }
}

/// Create and configure Socket.IO layer
pub fn create_socket_layer(
    state: SocketState,
    websocket_only: bool,
) -> (socketioxide::layer::SocketIoLayer, SocketIo) {
    let mut builder = SocketIo::builder().with_state(state);
    if websocket_only {
        builder = builder.transports([TransportType::Websocket]);
    }
    let (layer, io) = builder.build_layer();

    io.ns("/", on_connect.with(authenticate));

    (layer, io)
}
