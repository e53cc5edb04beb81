//! Relay server entry point
//!
//! Serves Socket.IO and the health route on a single port.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_server::socket::{create_socket_layer, SocketState};
use relay_server::{routes, Relay, RelayConfig, TokenVerifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_server=debug,tower_http=debug,socketioxide=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayConfig::from_env().context("Failed to read relay configuration")?;

    let relay = Arc::new(Relay::new());
    let socket_state = SocketState {
        relay: Arc::clone(&relay),
        verifier: Arc::new(TokenVerifier::new(&config.jwt_secret)),
        outbound_buffer: config.outbound_buffer,
    };
    let (socket_layer, _io) = create_socket_layer(socket_state, config.websocket_only);

    // Layers are applied bottom-to-top, so CorsLayer wraps the socket layer
    let app = Router::new()
        .merge(routes::health::router())
        .with_state(relay)
        .layer(socket_layer)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Relay listening on {}", addr);
    if config.jwt_secret == "secret_key" {
        tracing::warn!("JWT_SECRET not set, using the development secret");
    }

    axum::serve(listener, app).await.context("Relay server stopped")?;
    Ok(())
}
