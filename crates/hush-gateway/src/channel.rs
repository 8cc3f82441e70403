use std::sync::OnceLock;
use std::time::Duration;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use hush_crypto::encrypt::{decrypt_frame, encrypt_frame};
use hush_types::wire::{PONG, is_ping};

use crate::error::{RelayError, Result};
use crate::transport::{Outbound, Transport, WireFrame};

/// Upper bound on waiting for the writer to confirm one frame.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// One inbound unit after the channel boundary has dealt with encryption.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The unencrypted liveness check.
    Ping,
    /// Decrypted application bytes.
    Plaintext(Vec<u8>),
}

/// An encrypted, framed message channel over one client transport.
///
/// The key is write-once: set after the handshake, never replaced. Until it
/// is set, only the `PING`/`PONG` literals and raw handshake frames may pass.
/// Open -> closed happens once; a closed channel is never reused.
pub struct SecureChannel {
    id: String,
    key: OnceLock<[u8; 32]>,
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl SecureChannel {
    pub fn new(transport: Transport) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            key: OnceLock::new(),
            outbound: transport.outbound,
            inbound: Mutex::new(transport.inbound),
            shutdown: transport.shutdown,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_key(&self, key: [u8; 32]) -> Result<()> {
        self.key.set(key).map_err(|_| RelayError::KeyAlreadySet)
    }

    pub fn has_key(&self) -> bool {
        self.key.get().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.shutdown.is_cancelled()
    }

    /// Encrypt and write one application frame. `PONG` is the single
    /// plaintext exception and goes out as-is.
    ///
    /// Resolves once the transport has written the frame; `Ok` means it
    /// reached the socket, not merely a queue.
    pub async fn send(&self, plaintext: &str) -> Result<()> {
        if plaintext == PONG {
            return self.write(WireFrame::Text(PONG.to_string())).await;
        }

        let key = self.key.get().ok_or(RelayError::KeyNotSet)?;
        let frame = encrypt_frame(key, plaintext.as_bytes()).map_err(|e| {
            warn!("conn {} encrypt failed: {}", self.id, e);
            RelayError::EncryptFailed
        })?;
        self.write(WireFrame::Binary(Bytes::from(frame))).await
    }

    /// Wait for the next frame. `PING` bypasses decryption; anything else
    /// must authenticate under the channel key.
    pub async fn receive(&self) -> Result<Frame> {
        let raw = self.receive_raw().await?;
        if is_ping(&raw) {
            return Ok(Frame::Ping);
        }

        let key = self.key.get().ok_or(RelayError::KeyNotSet)?;
        decrypt_frame(key, &raw)
            .map(Frame::Plaintext)
            .map_err(|_| RelayError::DecryptFailed)
    }

    /// Write bytes without encryption. Only for key exchange traffic.
    pub async fn send_raw(&self, data: impl Into<Bytes>) -> Result<()> {
        self.write(WireFrame::Binary(data.into())).await
    }

    /// Read one frame without decryption. Only for key exchange traffic.
    pub async fn receive_raw(&self) -> Result<Bytes> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(RelayError::ChannelClosed),
            raw = inbound.recv() => raw.ok_or(RelayError::ChannelClosed),
        }
    }

    /// Release the transport. Unblocks a pending [`SecureChannel::receive`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shutdown.cancel();
            debug!("conn {} closed", self.id);
        }
    }

    async fn write(&self, frame: WireFrame) -> Result<()> {
        if self.is_closed() {
            return Err(RelayError::ChannelClosed);
        }
        let (ack, written) = oneshot::channel();
        self.outbound
            .send(Outbound { frame, ack })
            .map_err(|_| RelayError::ChannelClosed)?;

        match tokio::time::timeout(WRITE_TIMEOUT, written).await {
            Ok(Ok(true)) => Ok(()),
            Ok(_) => Err(RelayError::ChannelClosed),
            Err(_) => {
                warn!("conn {} write not confirmed within {:?}", self.id, WRITE_TIMEOUT);
                Err(RelayError::ChannelClosed)
            }
        }
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("id", &self.id)
            .field("keyed", &self.has_key())
            .field("closed", &self.is_closed())
            .finish()
    }
}
