use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use hush_crypto::keys::{derive_key, parse_static_key};

use crate::channel::SecureChannel;
use crate::error::{RelayError, Result};

/// Default bound on the key exchange step.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Establishes the per-connection symmetric key.
///
/// Implementations may talk to the client through
/// [`SecureChannel::send_raw`] / [`SecureChannel::receive_raw`]; the channel
/// refuses application data until the returned key is installed.
pub trait KeyExchange: Send + Sync + 'static {
    fn handshake<'a>(
        &'a self,
        channel: &'a SecureChannel,
        identity: &'a str,
        credential: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<[u8; 32]>>;
}

/// Non-handshake mode: every connection uses one key derived from a
/// configured secret. No bytes are exchanged.
pub struct StaticKeyExchange {
    key: [u8; 32],
}

impl StaticKeyExchange {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn from_secret(secret: &str) -> Self {
        Self::new(derive_key(secret))
    }

    /// Accepts either `base64:<raw key>` or a secret to derive from.
    pub fn from_config(value: &str) -> anyhow::Result<Self> {
        Ok(Self::new(parse_static_key(value)?))
    }
}

impl KeyExchange for StaticKeyExchange {
    fn handshake<'a>(
        &'a self,
        _channel: &'a SecureChannel,
        _identity: &'a str,
        _credential: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<[u8; 32]>> {
        let key = self.key;
        async move { Ok(key) }.boxed()
    }
}

/// Run the exchange under `timeout` and install the resulting key.
pub async fn establish_key(
    exchange: &dyn KeyExchange,
    channel: &SecureChannel,
    identity: &str,
    credential: &str,
    timeout: Duration,
) -> Result<()> {
    let key = match tokio::time::timeout(timeout, exchange.handshake(channel, identity, credential)).await {
        Ok(Ok(key)) => key,
        Ok(Err(e)) => {
            warn!("handshake with {} failed: {}", identity, e);
            return Err(RelayError::Handshake(e.to_string()));
        }
        Err(_) => {
            warn!("handshake with {} timed out after {:?}", identity, timeout);
            return Err(RelayError::Handshake("timed out".into()));
        }
    };

    channel.set_key(key)?;
    debug!("conn {} keyed for {}", channel.id(), identity);
    Ok(())
}
