mod auth;
mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use hush_gateway::connection;
use hush_gateway::handshake::{KeyExchange, StaticKeyExchange};
use hush_gateway::{ConnectionRegistry, MessageRouter};

use crate::config::Config;

#[derive(Clone)]
struct ServerState {
    router: MessageRouter,
    exchange: Arc<dyn KeyExchange>,
    jwt_secret: String,
    handshake_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: String,
    /// Pre-shared credential for the key exchange; defaults to the token.
    credential: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hush=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Offline store
    let db = Arc::new(hush_db::Database::open(&config.db_path)?);

    // Shared state
    let registry = ConnectionRegistry::with_policy(db, config.policy);
    let state = ServerState {
        router: MessageRouter::new(registry),
        exchange: Arc::new(StaticKeyExchange::from_config(&config.static_key)?),
        jwt_secret: config.jwt_secret.clone(),
        handshake_timeout: config.handshake_timeout,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/gateway", get(ws_upgrade))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(
        "Hush relay listening on {} ({:?} connections per user)",
        addr, config.policy
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

/// Authenticate at the upgrade layer; only a valid token gets a socket.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(user_id) = auth::authenticate(&query.token, &state.jwt_secret) else {
        warn!("Rejected gateway upgrade with invalid token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let credential = query.credential.unwrap_or(query.token);
    ws.on_upgrade(move |socket| {
        connection::handle_connection_authenticated(
            socket,
            state.router,
            state.exchange,
            user_id,
            credential,
            state.handshake_timeout,
        )
    })
    .into_response()
}
