//! Chat transport boundary
//!
//! The engine never talks to the chat network directly. It sees inbound
//! messages and lifecycle events on channels, and sends outbound traffic
//! through the object-safe [`ChatClient`] trait. The production
//! implementation lives in [`bridge`]; tests substitute mocks.

mod bridge;

pub use bridge::{BridgeClient, BridgeFactory};

use async_trait::async_trait;
use base64::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

const BROADCAST_SENDER: &str = "status@broadcast";

/// Opaque stable identifier for a chat counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderId(String);

impl SenderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Status broadcasts share one well-known pseudo-sender.
    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST_SENDER
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One inbound chat message, as delivered by the transport.
///
/// Media is carried inline as base64 so the message stays self-contained
/// after the originating connection dies.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender_id: SenderId,
    pub display_name: Option<String>,
    pub body: String,
    pub has_media: bool,
    pub media: Option<String>,
}

impl InboundMessage {
    /// Decode the attached media, if any.
    pub fn fetch_media(&self) -> Result<Vec<u8>, TransportError> {
        let Some(encoded) = &self.media else {
            return Err(TransportError::Protocol(
                "message has no media attachment".to_string(),
            ));
        };
        Ok(BASE64_STANDARD.decode(encoded)?)
    }
}

/// Connection lifecycle notifications, consumed by the supervisor.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// Pairing QR code, emitted until the session is authenticated.
    Qr { data: String },
    Ready,
    Disconnected { reason: String },
    AuthFailure { message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to chat bridge: {0}")]
    Connect(String),

    #[error("failed to send message: {0}")]
    Send(String),

    #[error("invalid media payload: {0}")]
    Media(#[from] base64::DecodeError),

    #[error("bridge protocol error: {0}")]
    Protocol(String),
}

/// Outbound operations on a live chat connection.
///
/// Object-safe so the dispatcher and the HTTP API can share one slot that
/// the supervisor swaps as connections come and go.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Reply to a sender in their existing conversation.
    async fn reply(&self, to: &SenderId, body: &str) -> Result<(), TransportError>;

    /// Send a message to a resolved chat identity outside any conversation.
    async fn send_direct(&self, jid: &str, body: &str) -> Result<(), TransportError>;

    /// Resolve a raw recipient (a phone number) to a routable chat
    /// identity. `Ok(None)` means the recipient is not reachable.
    async fn resolve_identity(&self, raw: &str) -> Result<Option<String>, TransportError>;

    /// Tear down the connection. Idempotent.
    async fn teardown(&self);
}

/// Creates fresh connections for the supervisor. Each call must yield an
/// independent client whose events flow into the given channels.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    type Client: ChatClient + 'static;

    async fn create(
        &self,
        lifecycle_tx: mpsc::Sender<LifecycleEvent>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> Result<Arc<Self::Client>, TransportError>;
}

/// Shared handle to the currently live client, if any. The supervisor
/// writes it, everyone else reads.
pub type ClientSlot = Arc<RwLock<Option<Arc<dyn ChatClient>>>>;
