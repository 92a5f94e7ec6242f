//! Connection lifecycle supervisor.
//!
//! Owns the only live chat client. Builds a connection through the
//! [`ClientFactory`], waits for it to authenticate within a deadline, then
//! watches lifecycle events and replaces the connection with bounded
//! exponential backoff when it dies. At most one client is ever live; the
//! current one is published through the shared [`ClientSlot`].

use crate::transport::{ChatClient, ClientFactory, ClientSlot, InboundMessage, LifecycleEvent};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long a fresh connection may take to reach Ready.
    pub ready_timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(45),
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Ready,
    /// A connection existed but died; a replacement is pending.
    Degraded,
}

/// The supervisor's view of the connection. Read by the health endpoint.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub restart_attempts: u32,
    /// Armed while Connecting; the instant by which Ready must arrive.
    pub ready_deadline: Option<Instant>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            restart_attempts: 0,
            ready_deadline: None,
        }
    }
}

pub type ConnectionStateHandle = Arc<Mutex<ConnectionState>>;

/// Backoff before restart attempt `attempt` (1-based): base doubled per
/// attempt, capped at `max`.
pub fn restart_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(32);
    base.saturating_mul(2u32.saturating_pow(exp)).min(max)
}

pub struct ConnectionSupervisor<F: ClientFactory> {
    factory: F,
    config: SupervisorConfig,
    slot: ClientSlot,
    state: ConnectionStateHandle,
    inbound_tx: mpsc::Sender<InboundMessage>,
    shutdown: CancellationToken,
}

impl<F: ClientFactory> ConnectionSupervisor<F> {
    pub fn new(
        factory: F,
        config: SupervisorConfig,
        slot: ClientSlot,
        inbound_tx: mpsc::Sender<InboundMessage>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            factory,
            config,
            slot,
            state: Arc::new(Mutex::new(ConnectionState::default())),
            inbound_tx,
            shutdown,
        }
    }

    /// Shared state snapshot handle for the health endpoint.
    pub fn state_handle(&self) -> ConnectionStateHandle {
        Arc::clone(&self.state)
    }

    /// Supervision loop. Runs until the shutdown token fires.
    pub async fn run(self) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            {
                let mut state = self.state.lock().unwrap();
                state.phase = ConnectionPhase::Connecting;
                state.ready_deadline = Some(Instant::now() + self.config.ready_timeout);
            }

            // Fresh lifecycle channel per connection so a dead client's
            // trailing events cannot leak into its replacement.
            let (lifecycle_tx, mut lifecycle_rx) = mpsc::channel(16);

            let client = match self
                .factory
                .create(lifecycle_tx, self.inbound_tx.clone())
                .await
            {
                Ok(client) => client,
                Err(e) => {
                    error!(error = %e, "failed to create chat connection");
                    self.set_phase(ConnectionPhase::Disconnected);
                    if !self.schedule_restart().await {
                        break;
                    }
                    continue;
                }
            };

            let client: Arc<dyn ChatClient> = client;
            *self.slot.write().await = Some(client);

            // The connection must authenticate within the deadline. Shutdown
            // may fire mid-wait; it must not sit out the full timeout.
            let ready = tokio::select! {
                () = self.shutdown.cancelled() => break,
                ready = tokio::time::timeout(
                    self.config.ready_timeout,
                    wait_for_ready(&mut lifecycle_rx),
                ) => ready,
            };

            match ready {
                Ok(Ok(())) => {
                    info!("chat connection ready");
                    {
                        let mut state = self.state.lock().unwrap();
                        state.phase = ConnectionPhase::Ready;
                        state.restart_attempts = 0;
                        state.ready_deadline = None;
                    }
                }
                Ok(Err(reason)) => {
                    warn!(reason = %reason, "connection failed before becoming ready");
                    self.replace_connection().await;
                    continue;
                }
                Err(_) => {
                    warn!(
                        timeout = ?self.config.ready_timeout,
                        "connection did not become ready in time"
                    );
                    self.replace_connection().await;
                    continue;
                }
            }

            // Steady state: watch for death or shutdown.
            let died = loop {
                tokio::select! {
                    () = self.shutdown.cancelled() => break None,
                    event = lifecycle_rx.recv() => match event {
                        Some(LifecycleEvent::Disconnected { reason }) => break Some(reason),
                        Some(LifecycleEvent::AuthFailure { message }) => break Some(message),
                        Some(LifecycleEvent::Qr { .. } | LifecycleEvent::Ready) => {}
                        None => break Some("lifecycle channel closed".to_string()),
                    },
                }
            };

            match died {
                Some(reason) => {
                    warn!(reason = %reason, "chat connection lost");
                    self.replace_connection().await;
                }
                None => break,
            }
        }

        self.teardown_current().await;
        self.set_phase(ConnectionPhase::Disconnected);
        info!("connection supervisor stopped");
    }

    /// Tear down the dead connection and back off before the next attempt.
    async fn replace_connection(&self) {
        self.set_phase(ConnectionPhase::Degraded);
        self.teardown_current().await;
        self.set_phase(ConnectionPhase::Disconnected);
        self.schedule_restart().await;
    }

    /// Remove the client from the slot and tear it down. A second call is a
    /// no-op, the slot is already empty.
    async fn teardown_current(&self) {
        let client = self.slot.write().await.take();
        if let Some(client) = client {
            client.teardown().await;
        }
    }

    /// Sleep out the backoff for the next attempt. Returns false when
    /// shutdown fired during the wait.
    async fn schedule_restart(&self) -> bool {
        let attempt = {
            let mut state = self.state.lock().unwrap();
            state.restart_attempts += 1;
            state.restart_attempts
        };
        let delay = restart_delay(self.config.base_delay, self.config.max_delay, attempt);
        info!(attempt, delay = ?delay, "scheduling connection restart");

        tokio::select! {
            () = self.shutdown.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        let mut state = self.state.lock().unwrap();
        state.phase = phase;
        if phase != ConnectionPhase::Connecting {
            state.ready_deadline = None;
        }
    }
}

/// Drain lifecycle events until Ready. QR codes are surfaced to the
/// operator via the log; failure events end the wait.
async fn wait_for_ready(
    lifecycle_rx: &mut mpsc::Receiver<LifecycleEvent>,
) -> Result<(), String> {
    loop {
        match lifecycle_rx.recv().await {
            Some(LifecycleEvent::Ready) => return Ok(()),
            Some(LifecycleEvent::Qr { data }) => {
                info!(qr = %data, "scan the QR code to authenticate");
            }
            Some(LifecycleEvent::AuthFailure { message }) => return Err(message),
            Some(LifecycleEvent::Disconnected { reason }) => return Err(reason),
            None => return Err("lifecycle channel closed".to_string()),
        }
    }
}
