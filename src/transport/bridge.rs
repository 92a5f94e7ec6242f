//! NDJSON-over-TCP client for the whatsapp-web.js sidecar.
//!
//! The sidecar owns the browser session; this side speaks a small line
//! protocol. Each line is one JSON object. Sidecar to us: lifecycle and
//! message events. Us to sidecar: `reply`, `send` and `resolve` ops,
//! where `resolve` is request/response correlated by `id`.

use super::{
    ChatClient, ClientFactory, InboundMessage, LifecycleEvent, SenderId, TransportError,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(15);

/// Events emitted by the sidecar, one per line.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum BridgeEvent {
    Qr {
        data: String,
    },
    Ready,
    AuthFailure {
        #[serde(default)]
        message: String,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    Message {
        from: String,
        #[serde(default)]
        body: String,
        #[serde(rename = "notifyName")]
        notify_name: Option<String>,
        #[serde(rename = "hasMedia", default)]
        has_media: bool,
        media: Option<String>,
    },
    Resolved {
        id: u64,
        jid: Option<String>,
    },
}

type PendingResolves = Arc<Mutex<HashMap<u64, oneshot::Sender<Option<String>>>>>;

/// Connects to a sidecar at a fixed address.
pub struct BridgeFactory {
    addr: String,
}

impl BridgeFactory {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl ClientFactory for BridgeFactory {
    type Client = BridgeClient;

    async fn create(
        &self,
        lifecycle_tx: mpsc::Sender<LifecycleEvent>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> Result<Arc<BridgeClient>, TransportError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!(addr = %self.addr, "connected to chat bridge");

        let (read_half, write_half) = stream.into_split();
        let pending: PendingResolves = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        tokio::spawn(read_loop(
            read_half,
            lifecycle_tx,
            inbound_tx,
            Arc::clone(&pending),
            cancel.clone(),
        ));

        Ok(Arc::new(BridgeClient {
            writer: Mutex::new(BufWriter::new(write_half)),
            pending,
            next_id: AtomicU64::new(1),
            cancel,
        }))
    }
}

async fn read_loop(
    read_half: OwnedReadHalf,
    lifecycle_tx: mpsc::Sender<LifecycleEvent>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    pending: PendingResolves,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            // EOF or a dead socket both mean the connection is gone.
            Ok(None) => {
                let _ = lifecycle_tx
                    .send(LifecycleEvent::Disconnected {
                        reason: "bridge closed the connection".to_string(),
                    })
                    .await;
                break;
            }
            Err(e) => {
                let _ = lifecycle_tx
                    .send(LifecycleEvent::Disconnected {
                        reason: format!("bridge read error: {e}"),
                    })
                    .await;
                break;
            }
        };

        let event: BridgeEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "ignoring malformed bridge line");
                continue;
            }
        };

        match event {
            BridgeEvent::Qr { data } => {
                let _ = lifecycle_tx.send(LifecycleEvent::Qr { data }).await;
            }
            BridgeEvent::Ready => {
                let _ = lifecycle_tx.send(LifecycleEvent::Ready).await;
            }
            BridgeEvent::AuthFailure { message } => {
                let _ = lifecycle_tx
                    .send(LifecycleEvent::AuthFailure { message })
                    .await;
            }
            BridgeEvent::Disconnected { reason } => {
                let _ = lifecycle_tx
                    .send(LifecycleEvent::Disconnected { reason })
                    .await;
            }
            BridgeEvent::Message {
                from,
                body,
                notify_name,
                has_media,
                media,
            } => {
                let _ = inbound_tx
                    .send(InboundMessage {
                        sender_id: SenderId::new(from),
                        display_name: notify_name,
                        body,
                        has_media,
                        media,
                    })
                    .await;
            }
            BridgeEvent::Resolved { id, jid } => {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(jid);
                } else {
                    debug!(id, "resolve response with no waiter");
                }
            }
        }
    }
}

/// Live connection to the sidecar.
pub struct BridgeClient {
    writer: Mutex<BufWriter<OwnedWriteHalf>>,
    pending: PendingResolves,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

impl BridgeClient {
    async fn write_op(&self, op: &serde_json::Value) -> Result<(), TransportError> {
        let mut line =
            serde_json::to_vec(op).map_err(|e| TransportError::Protocol(e.to_string()))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

#[async_trait]
impl ChatClient for BridgeClient {
    async fn reply(&self, to: &SenderId, body: &str) -> Result<(), TransportError> {
        self.write_op(&json!({ "op": "reply", "to": to.as_str(), "body": body }))
            .await
    }

    async fn send_direct(&self, jid: &str, body: &str) -> Result<(), TransportError> {
        self.write_op(&json!({ "op": "send", "jid": jid, "body": body }))
            .await
    }

    async fn resolve_identity(&self, raw: &str) -> Result<Option<String>, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self
            .write_op(&json!({ "op": "resolve", "id": id, "number": raw }))
            .await
        {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(RESOLVE_TIMEOUT, rx).await {
            Ok(Ok(jid)) => Ok(jid),
            // Reader task dropped the sender, the connection is gone.
            Ok(Err(_)) => Err(TransportError::Send(
                "connection lost while resolving recipient".to_string(),
            )),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(TransportError::Send(
                    "timed out resolving recipient".to_string(),
                ))
            }
        }
    }

    async fn teardown(&self) {
        self.cancel.cancel();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "bridge writer shutdown failed");
        }
        // Any outstanding resolves will never be answered.
        self.pending.lock().await.clear();
    }
}
