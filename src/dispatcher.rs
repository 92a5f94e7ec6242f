//! Message dispatcher.
//!
//! Pulls inbound messages off the channel, normalizes each into an engine
//! event, runs the pure transition function and executes the effects it
//! produces. Effect completions feed back in as events on a local queue, so
//! each reply reflects the real outcome of its effect before the next event
//! is considered.

mod store;

#[cfg(test)]
pub mod testing;

pub use store::ConversationStore;

use crate::db::Database;
use crate::ocr::OcrAdapter;
use crate::state_machine::{
    extract_digit_runs, is_greeting, transition, Effect, Event, LookupResult, SenderContext,
};
use crate::transport::{ClientSlot, InboundMessage, SenderId};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const OCR_FAILED_REPLY: &str = "Error leyendo la imagen. Intenta enviarla de nuevo.";
const REGISTRATION_CONFLICT: &str = "Ese número de celular ya está registrado.";
const REGISTRATION_STORE_FAILED: &str = "No pude guardar el registro. Intenta de nuevo.";

pub struct Dispatcher<O: OcrAdapter> {
    db: Database,
    ocr: Arc<O>,
    store: ConversationStore,
    slot: ClientSlot,
    inbound_rx: mpsc::Receiver<InboundMessage>,
    shutdown: CancellationToken,
}

impl<O: OcrAdapter> Dispatcher<O> {
    pub fn new(
        db: Database,
        ocr: Arc<O>,
        slot: ClientSlot,
        inbound_rx: mpsc::Receiver<InboundMessage>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            ocr,
            store: ConversationStore::new(),
            slot,
            inbound_rx,
            shutdown,
        }
    }

    /// Dispatch loop. Runs until the shutdown token fires.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                message = self.inbound_rx.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => break,
                },
            }
        }
        info!("dispatcher stopped");
    }

    async fn handle_message(&mut self, message: InboundMessage) {
        // Broadcast pseudo-senders are dropped before any lookup.
        if message.sender_id.is_broadcast() {
            debug!("ignoring broadcast message");
            return;
        }

        let lookup = match self.db.find_user_by_sender(message.sender_id.as_str()) {
            Ok(Some(user)) => LookupResult::registered(user.cellphone, user.display_name),
            Ok(None) => LookupResult::unregistered(),
            Err(e) => {
                // Without a reliable lookup we cannot route the message.
                warn!(sender = %message.sender_id, error = %e, "user lookup failed, dropping message");
                return;
            }
        };

        let ctx = SenderContext {
            sender_id: message.sender_id.clone(),
            display_name: message.display_name.clone(),
            now: Utc::now(),
        };

        let Some(first_event) = self.normalize(&message).await else {
            return;
        };

        // Effects can produce completion events; drain until quiet.
        let mut queue = VecDeque::from([first_event]);
        while let Some(event) = queue.pop_front() {
            let state = self.store.get(&ctx.sender_id);
            let result = transition(&state, &ctx, &lookup, event);
            self.store.set(&ctx.sender_id, result.new_state);

            if let Some(reply) = result.reply {
                self.send_reply(&ctx.sender_id, &reply).await;
            }
            for effect in result.effects {
                queue.push_back(self.execute_effect(effect).await);
            }
        }
    }

    /// Turn a raw message into an engine event. Digits in the body win over
    /// attached media; media is only decoded when the text gives nothing.
    async fn normalize(&self, message: &InboundMessage) -> Option<Event> {
        if !extract_digit_runs(&message.body).is_empty() || is_greeting(&message.body) {
            return Some(Event::Text {
                body: message.body.clone(),
            });
        }

        if message.has_media {
            let image = match message.fetch_media() {
                Ok(image) => image,
                Err(e) => {
                    warn!(sender = %message.sender_id, error = %e, "failed to decode media");
                    self.send_reply(&message.sender_id, OCR_FAILED_REPLY).await;
                    return None;
                }
            };
            return match self.ocr.recognize_digits(&image).await {
                Ok(decoded_numbers) => Some(Event::Image { decoded_numbers }),
                Err(e) => {
                    warn!(sender = %message.sender_id, error = %e, "OCR failed");
                    self.send_reply(&message.sender_id, OCR_FAILED_REPLY).await;
                    None
                }
            };
        }

        Some(Event::Text {
            body: message.body.clone(),
        })
    }

    async fn execute_effect(&self, effect: Effect) -> Event {
        match effect {
            Effect::RegisterUser {
                sender_id,
                display_name,
                cellphone,
            } => match self
                .db
                .insert_user(sender_id.as_str(), &display_name, &cellphone)
            {
                Ok(user) => {
                    info!(sender = %sender_id, "registered new user");
                    Event::Registered {
                        cellphone: user.cellphone,
                    }
                }
                Err(e) if e.is_duplicate() => Event::RegistrationFailed {
                    reason: REGISTRATION_CONFLICT.to_string(),
                },
                Err(e) => {
                    warn!(sender = %sender_id, error = %e, "registration insert failed");
                    Event::RegistrationFailed {
                        reason: REGISTRATION_STORE_FAILED.to_string(),
                    }
                }
            },
            Effect::CommitBatch {
                cellphone,
                numbers,
                submitted_at,
            } => {
                let committed = self.db.commit_batch(&cellphone, &numbers, submitted_at);
                info!(
                    cellphone,
                    submitted = numbers.len(),
                    committed = committed.len(),
                    "batch committed"
                );
                Event::BatchCommitted { committed }
            }
        }
    }

    /// Best effort: a dead connection drops the reply, the supervisor will
    /// bring a new one up and the sender can retry.
    async fn send_reply(&self, to: &SenderId, body: &str) {
        let client = self.slot.read().await.clone();
        match client {
            Some(client) => {
                if let Err(e) = client.reply(to, body).await {
                    warn!(sender = %to, error = %e, "failed to send reply");
                }
            }
            None => warn!(sender = %to, "no live connection, dropping reply"),
        }
    }
}
