use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use hush_types::wire::PONG;

use crate::channel::SecureChannel;
use crate::error::{RelayError, Result};
use crate::store::OfflineStore;

/// What `add_connection` does with a user's existing channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionPolicy {
    /// Every device keeps its own channel.
    #[default]
    Multi,
    /// A new channel closes and replaces whatever the user had.
    Single,
}

impl FromStr for ConnectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "multi" => Ok(Self::Multi),
            "single" => Ok(Self::Single),
            other => Err(format!("unknown connection policy '{}'", other)),
        }
    }
}

/// Tracks every live channel per user and fans sends out across them.
///
/// The map is only ever touched for the length of a map operation. Anything
/// that leads to I/O copies the relevant handles out first and works on the
/// copy with the lock released.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// user id -> live channels, in registration order. A key exists only
    /// while its list is non-empty.
    connections: RwLock<HashMap<String, Vec<Arc<SecureChannel>>>>,

    store: Arc<dyn OfflineStore>,

    policy: ConnectionPolicy,
}

impl ConnectionRegistry {
    pub fn new(store: Arc<dyn OfflineStore>) -> Self {
        Self::with_policy(store, ConnectionPolicy::default())
    }

    pub fn with_policy(store: Arc<dyn OfflineStore>, policy: ConnectionPolicy) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connections: RwLock::new(HashMap::new()),
                store,
                policy,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn OfflineStore> {
        &self.inner.store
    }

    /// Register a handshaken channel, then replay the user's offline queue
    /// through it. Returns how many queued messages were delivered (and
    /// therefore deleted).
    pub async fn add_connection(&self, uid: &str, channel: Arc<SecureChannel>) -> usize {
        let replaced = {
            let mut connections = self.inner.connections.write().await;
            let list = connections.entry(uid.to_string()).or_default();
            let replaced = match self.inner.policy {
                ConnectionPolicy::Multi => Vec::new(),
                ConnectionPolicy::Single => std::mem::take(list),
            };
            list.push(channel.clone());
            replaced
        };

        for old in replaced {
            info!("{} reconnected, closing previous conn {}", uid, old.id());
            old.close();
        }

        info!("{} registered conn {}", uid, channel.id());
        self.replay_offline(uid, &channel).await
    }

    /// Deregister and close one channel. Unknown users or ids are ignored:
    /// disconnect races are normal.
    pub async fn remove_connection(&self, uid: &str, conn_id: &str) -> bool {
        let mut connections = self.inner.connections.write().await;

        let Some(list) = connections.get_mut(uid) else {
            return false;
        };
        let Some(pos) = list.iter().position(|c| c.id() == conn_id) else {
            return false;
        };

        let channel = list.remove(pos);
        channel.close();
        if list.is_empty() {
            connections.remove(uid);
        }

        info!("{} deregistered conn {}", uid, conn_id);
        true
    }

    /// Best-effort fan-out to every channel the user has. Succeeds if any
    /// one channel confirmed the write.
    pub async fn send_to_user(&self, uid: &str, plaintext: &str) -> Result<()> {
        let targets = self.snapshot(uid).await;
        if targets.is_empty() {
            return Err(RelayError::NoConnection);
        }

        let results = join_all(targets.iter().map(|channel| channel.send(plaintext))).await;
        let mut delivered = 0usize;
        for (channel, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => debug!("send to {} conn {} failed: {}", uid, channel.id(), e),
            }
        }

        if delivered == 0 {
            warn!("all {} connections of {} failed", targets.len(), uid);
            return Err(RelayError::DeliveryFailed);
        }
        Ok(())
    }

    /// Answer a PING on exactly the channel it came from.
    pub async fn dispatch_control_pong(&self, uid: &str, conn_id: &str) -> Result<()> {
        let target = {
            let connections = self.inner.connections.read().await;
            connections
                .get(uid)
                .and_then(|list| list.iter().find(|c| c.id() == conn_id))
                .cloned()
        };

        match target {
            Some(channel) => channel.send(PONG).await,
            None => Err(RelayError::NoConnection),
        }
    }

    pub async fn is_online(&self, uid: &str) -> bool {
        self.inner.connections.read().await.contains_key(uid)
    }

    pub async fn connection_count(&self, uid: &str) -> usize {
        self.inner
            .connections
            .read()
            .await
            .get(uid)
            .map_or(0, Vec::len)
    }

    /// Users with at least one live channel, sorted.
    pub async fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .inner
            .connections
            .read()
            .await
            .keys()
            .cloned()
            .collect();
        users.sort();
        users
    }

    async fn snapshot(&self, uid: &str) -> Vec<Arc<SecureChannel>> {
        self.inner
            .connections
            .read()
            .await
            .get(uid)
            .cloned()
            .unwrap_or_default()
    }

    async fn replay_offline(&self, uid: &str, channel: &SecureChannel) -> usize {
        let store = self.inner.store.clone();
        let owner = uid.to_string();
        let records = match tokio::task::spawn_blocking(move || store.list_by_owner(&owner)).await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                warn!("failed to load offline messages for {}: {}", uid, e);
                return 0;
            }
            Err(e) => {
                error!("spawn_blocking join error: {}", e);
                return 0;
            }
        };

        if records.is_empty() {
            return 0;
        }

        let mut delivered = Vec::with_capacity(records.len());
        for record in &records {
            match channel.send(&record.payload).await {
                Ok(()) => delivered.push(record.id),
                Err(e) => warn!(
                    "replay of offline message {} to {} failed: {}",
                    record.id, uid, e
                ),
            }
        }

        let count = delivered.len();
        if count > 0 {
            let store = self.inner.store.clone();
            match tokio::task::spawn_blocking(move || store.delete_batch(&delivered)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("failed to delete replayed messages for {}: {}", uid, e),
                Err(e) => error!("spawn_blocking join error: {}", e),
            }
        }

        info!(
            "replayed {}/{} offline messages to {} (conn {})",
            count,
            records.len(),
            uid,
            channel.id()
        );
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Peer, Transport, WireFrame};
    use hush_crypto::encrypt::decrypt_frame;
    use hush_crypto::keys::generate_key;
    use hush_db::Database;

    fn registry() -> (ConnectionRegistry, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (ConnectionRegistry::new(db.clone()), db)
    }

    fn channel(key: [u8; 32]) -> (Arc<SecureChannel>, Peer) {
        let (transport, peer) = Transport::pair();
        let channel = SecureChannel::new(transport);
        channel.set_key(key).unwrap();
        (Arc::new(channel), peer)
    }

    fn next_plaintext(peer: &mut Peer, key: &[u8; 32]) -> Option<String> {
        match peer.try_recv()? {
            WireFrame::Binary(frame) => {
                Some(String::from_utf8(decrypt_frame(key, &frame).unwrap()).unwrap())
            }
            WireFrame::Text(text) => Some(text),
        }
    }

    #[tokio::test]
    async fn fan_out_skips_broken_channels() {
        let (registry, _db) = registry();
        let key = generate_key();
        let (c1, p1) = channel(key);
        let (c2, mut p2) = channel(key);
        registry.add_connection("U", c1).await;
        registry.add_connection("U", c2).await;

        drop(p1);
        registry.send_to_user("U", "m").await.unwrap();
        assert_eq!(next_plaintext(&mut p2, &key).as_deref(), Some("m"));
        assert!(next_plaintext(&mut p2, &key).is_none());
    }

    #[tokio::test]
    async fn absent_user_has_no_connection() {
        let (registry, _db) = registry();
        assert!(matches!(
            registry.send_to_user("nobody", "m").await,
            Err(RelayError::NoConnection)
        ));
    }

    #[tokio::test]
    async fn all_broken_is_delivery_failure() {
        let (registry, _db) = registry();
        let key = generate_key();
        let (c1, p1) = channel(key);
        let (c2, p2) = channel(key);
        registry.add_connection("U", c1).await;
        registry.add_connection("U", c2).await;
        drop(p1);
        drop(p2);

        assert!(matches!(
            registry.send_to_user("U", "m").await,
            Err(RelayError::DeliveryFailed)
        ));
    }

    #[tokio::test]
    async fn replay_is_fifo_then_drained() {
        let (registry, db) = registry();
        db.insert_offline_message("U", "r1").unwrap();
        db.insert_offline_message("U", "r2").unwrap();
        db.insert_offline_message("U", "r3").unwrap();
        db.insert_offline_message("other", "x").unwrap();

        let key = generate_key();
        let (c, mut peer) = channel(key);
        assert_eq!(registry.add_connection("U", c).await, 3);

        for expected in ["r1", "r2", "r3"] {
            assert_eq!(next_plaintext(&mut peer, &key).as_deref(), Some(expected));
        }
        assert!(next_plaintext(&mut peer, &key).is_none());
        assert!(db.get_offline_messages("U").unwrap().is_empty());
        assert_eq!(db.count_offline_messages("other").unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_replay_keeps_records() {
        let (registry, db) = registry();
        db.insert_offline_message("U", "r1").unwrap();
        db.insert_offline_message("U", "r2").unwrap();

        let (c, peer) = channel(generate_key());
        drop(peer);
        assert_eq!(registry.add_connection("U", c).await, 0);
        assert_eq!(db.count_offline_messages("U").unwrap(), 2);
    }

    #[tokio::test]
    async fn replay_to_a_hung_up_client_deletes_nothing() {
        let (registry, db) = registry();
        db.insert_offline_message("U", "r1").unwrap();
        db.insert_offline_message("U", "r2").unwrap();

        let (c, peer) = channel(generate_key());
        peer.hang_up();
        assert_eq!(registry.add_connection("U", c).await, 0);

        let kept: Vec<String> = db
            .get_offline_messages("U")
            .unwrap()
            .into_iter()
            .map(|row| row.payload)
            .collect();
        assert_eq!(kept, ["r1", "r2"]);
    }

    #[tokio::test]
    async fn replayed_records_are_on_the_wire_before_deletion() {
        let (registry, db) = registry();
        db.insert_offline_message("U", "r1").unwrap();
        db.insert_offline_message("U", "r2").unwrap();

        let key = generate_key();
        let (c, mut peer) = channel(key);
        let delivered = registry.add_connection("U", c).await;

        let mut seen = 0;
        while next_plaintext(&mut peer, &key).is_some() {
            seen += 1;
        }
        assert_eq!(delivered, 2);
        assert_eq!(seen, delivered);
        assert_eq!(db.count_offline_messages("U").unwrap(), 0);
    }

    #[tokio::test]
    async fn removal_is_idempotent_and_drops_empty_users() {
        let (registry, _db) = registry();
        let (c, peer) = channel(generate_key());
        let conn_id = c.id().to_string();
        registry.add_connection("U", c).await;
        assert!(registry.is_online("U").await);

        assert!(registry.remove_connection("U", &conn_id).await);
        assert!(!registry.remove_connection("U", &conn_id).await);
        assert!(!registry.remove_connection("ghost", "nope").await);

        assert!(!registry.is_online("U").await);
        assert!(registry.online_users().await.is_empty());
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn removing_one_device_keeps_the_others() {
        let (registry, _db) = registry();
        let key = generate_key();
        let (c1, _p1) = channel(key);
        let (c2, mut p2) = channel(key);
        let id1 = c1.id().to_string();
        registry.add_connection("U", c1).await;
        registry.add_connection("U", c2).await;

        registry.remove_connection("U", &id1).await;
        assert_eq!(registry.connection_count("U").await, 1);
        registry.send_to_user("U", "still here").await.unwrap();
        assert_eq!(next_plaintext(&mut p2, &key).as_deref(), Some("still here"));
    }

    #[tokio::test]
    async fn single_policy_replaces_previous_channel() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = ConnectionRegistry::with_policy(db, ConnectionPolicy::Single);
        let key = generate_key();
        let (old, old_peer) = channel(key);
        let (new, _new_peer) = channel(key);
        registry.add_connection("U", old.clone()).await;
        registry.add_connection("U", new).await;

        assert_eq!(registry.connection_count("U").await, 1);
        assert!(old.is_closed());
        assert!(old_peer.is_closed());
    }

    #[tokio::test]
    async fn pong_goes_to_the_pinging_channel_only() {
        let (registry, _db) = registry();
        let key = generate_key();
        let (c1, mut p1) = channel(key);
        let (c2, mut p2) = channel(key);
        let id2 = c2.id().to_string();
        registry.add_connection("U", c1).await;
        registry.add_connection("U", c2).await;

        registry.dispatch_control_pong("U", &id2).await.unwrap();
        assert_eq!(p2.try_recv(), Some(WireFrame::Text(PONG.to_string())));
        assert!(p1.try_recv().is_none());

        assert!(matches!(
            registry.dispatch_control_pong("U", "unknown").await,
            Err(RelayError::NoConnection)
        ));
        assert!(matches!(
            registry.dispatch_control_pong("ghost", &id2).await,
            Err(RelayError::NoConnection)
        ));
    }

    #[tokio::test]
    async fn concurrent_churn_leaves_a_consistent_map() {
        let (registry, _db) = registry();
        let mut tasks = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let uid = format!("user-{}", i % 4);
                let (c, _peer) = channel(generate_key());
                let id = c.id().to_string();
                registry.add_connection(&uid, c).await;
                if i % 2 == 0 {
                    registry.remove_connection(&uid, &id).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut total = 0;
        for user in registry.online_users().await {
            let count = registry.connection_count(&user).await;
            assert!(count > 0);
            total += count;
        }
        assert_eq!(total, 16);
    }

    #[test]
    fn policy_parses_from_config_strings() {
        assert_eq!("multi".parse::<ConnectionPolicy>().unwrap(), ConnectionPolicy::Multi);
        assert_eq!(" Single ".parse::<ConnectionPolicy>().unwrap(), ConnectionPolicy::Single);
        assert!("many".parse::<ConnectionPolicy>().is_err());
    }
}
