use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, trace, warn};

use hush_types::message::{Message, MessageType};

use crate::channel::Frame;
use crate::error::{RelayError, Result};
use crate::registry::ConnectionRegistry;
use crate::store::OfflineStore;

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// PING answered on the originating channel.
    Pong,
    /// At least one of the recipient's channels took the message.
    Delivered,
    /// Recipient unreachable; the message sits in the offline store.
    Queued { id: i64 },
    /// Accepted but not routed: only single-recipient messages are relayed.
    Ignored(MessageType),
}

/// Decides, per inbound frame, between a control reply, live delivery and
/// store-and-forward.
#[derive(Clone)]
pub struct MessageRouter {
    registry: ConnectionRegistry,
    store: Arc<dyn OfflineStore>,
}

impl MessageRouter {
    /// The router queues into the same store the registry replays from.
    pub fn new(registry: ConnectionRegistry) -> Self {
        let store = registry.store().clone();
        Self { registry, store }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Handle one frame received on `conn_id`, which belongs to the
    /// authenticated user `uid`.
    pub async fn handle_frame(&self, uid: &str, conn_id: &str, frame: Frame) -> Result<Routed> {
        match frame {
            Frame::Ping => {
                self.registry.dispatch_control_pong(uid, conn_id).await?;
                Ok(Routed::Pong)
            }
            Frame::Plaintext(raw) => {
                let message = Message::parse(&raw)
                    .map_err(|e| RelayError::MalformedMessage(e.to_string()))?
                    .stamp(uid, Utc::now());
                self.route(message).await
            }
        }
    }

    /// Route an already stamped message.
    pub async fn route(&self, message: Message) -> Result<Routed> {
        match message.message_type {
            MessageType::Single => self.route_single(message).await,
            other => {
                warn!(
                    "{} sent a {} message; only single-recipient messages are relayed",
                    message.from, other
                );
                Ok(Routed::Ignored(other))
            }
        }
    }

    async fn route_single(&self, message: Message) -> Result<Routed> {
        if message.destination.is_empty() {
            return Err(RelayError::MalformedMessage("empty destination".into()));
        }

        let payload = message
            .to_json()
            .map_err(|e| RelayError::MalformedMessage(e.to_string()))?;

        match self.registry.send_to_user(&message.destination, &payload).await {
            Ok(()) => {
                trace!("{} -> {} delivered live", message.from, message.destination);
                Ok(Routed::Delivered)
            }
            Err(e) => {
                debug!(
                    "{} -> {} not delivered live ({}), queueing",
                    message.from, message.destination, e
                );
                let id = self.persist(&message.destination, payload).await?;
                Ok(Routed::Queued { id })
            }
        }
    }

    async fn persist(&self, owner: &str, payload: String) -> Result<i64> {
        let store = self.store.clone();
        let owner_key = owner.to_string();
        tokio::task::spawn_blocking(move || store.append(&owner_key, &payload))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                RelayError::PersistenceFailed(e.to_string())
            })?
            .map_err(|e| {
                error!("failed to queue message for {}: {}", owner, e);
                RelayError::PersistenceFailed(e.to_string())
            })
    }
}
