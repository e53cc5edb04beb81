//! Health check endpoint

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::relay::Relay;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    version: String,
    connections: usize,
    rooms: usize,
}

async fn health_check(State(relay): State<Arc<Relay>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections: relay.connection_count().await,
        rooms: relay.room_count().await,
    })
}

pub fn router() -> Router<Arc<Relay>> {
    Router::new().route("/health", get(health_check))
}
