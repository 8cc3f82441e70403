use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocket;
use tracing::{debug, info, warn};

use crate::channel::SecureChannel;
use crate::error::RelayError;
use crate::handshake::{KeyExchange, establish_key};
use crate::router::MessageRouter;
use crate::transport::Transport;

/// Handle a pre-authenticated WebSocket connection.
/// The token was already validated at the HTTP upgrade layer, so `user_id`
/// is trusted; `credential` is handed through to the key exchange.
pub async fn handle_connection_authenticated(
    socket: WebSocket,
    router: MessageRouter,
    exchange: Arc<dyn KeyExchange>,
    user_id: String,
    credential: String,
    handshake_timeout: Duration,
) {
    let channel = Arc::new(SecureChannel::new(Transport::websocket(socket)));
    serve_connection(
        channel,
        &router,
        exchange.as_ref(),
        &user_id,
        &credential,
        handshake_timeout,
    )
    .await;
}

/// Drive one channel for its whole life: key exchange, registration (which
/// replays the offline queue), then the receive loop. Frames are handled
/// one at a time in arrival order.
///
/// Any receive or routing error ends the connection; the channel is
/// deregistered and closed before returning the reason.
pub async fn serve_connection(
    channel: Arc<SecureChannel>,
    router: &MessageRouter,
    exchange: &dyn KeyExchange,
    user_id: &str,
    credential: &str,
    handshake_timeout: Duration,
) -> RelayError {
    if let Err(e) = establish_key(exchange, &channel, user_id, credential, handshake_timeout).await {
        channel.close();
        return e;
    }

    let conn_id = channel.id().to_string();
    info!("{} connected (conn {})", user_id, conn_id);

    let registry = router.registry();
    registry.add_connection(user_id, channel.clone()).await;

    let reason = loop {
        let frame = match channel.receive().await {
            Ok(frame) => frame,
            Err(e) => break e,
        };
        match router.handle_frame(user_id, &conn_id, frame).await {
            Ok(routed) => debug!("{} (conn {}): {:?}", user_id, conn_id, routed),
            Err(e) => break e,
        }
    };

    match &reason {
        RelayError::ChannelClosed => info!("{} disconnected (conn {})", user_id, conn_id),
        other => warn!("{} (conn {}) dropped: {}", user_id, conn_id, other),
    }

    registry.remove_connection(user_id, &conn_id).await;
    channel.close();
    reason
}
