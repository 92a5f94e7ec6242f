//! Conversation state types

use crate::transport::SenderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversation state for a single sender.
///
/// A sender has at most one state at any time; "no state" and `Idle` are
/// equivalent (the store drops `Idle` entries).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConvState {
    /// No pending workflow step
    #[default]
    Idle,

    /// Sender is unregistered and was asked for their cellphone number
    AwaitingPhoneRegistration { display_name: String },

    /// Sender submitted ticket numbers and was asked to confirm them
    AwaitingNumberConfirmation {
        /// Detected ticket numbers, in submission order (may repeat)
        candidate_numbers: Vec<String>,
        /// The sender's registered cellphone
        cellphone: String,
        /// When the candidate list was produced
        submitted_at: DateTime<Utc>,
        /// Original message text, when the numbers came from typed text
        raw_text: Option<String>,
    },
}

impl ConvState {
    pub fn is_idle(&self) -> bool {
        matches!(self, ConvState::Idle)
    }
}

/// Per-message context (immutable during one evaluation).
///
/// Carries the clock so `transition` stays pure.
#[derive(Debug, Clone)]
pub struct SenderContext {
    pub sender_id: SenderId,
    /// Platform-provided display name, when the message carried one
    pub display_name: Option<String>,
    pub now: DateTime<Utc>,
}

/// Registration details resolved from the persistence gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub cellphone: String,
    pub display_name: String,
}

/// Result of the registration lookup the dispatcher performs before
/// evaluating a message.
#[derive(Debug, Clone, Default)]
pub struct LookupResult {
    pub registration: Option<Registration>,
}

impl LookupResult {
    pub fn unregistered() -> Self {
        Self { registration: None }
    }

    pub fn registered(cellphone: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            registration: Some(Registration {
                cellphone: cellphone.into(),
                display_name: display_name.into(),
            }),
        }
    }
}
