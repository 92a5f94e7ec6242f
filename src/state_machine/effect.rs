//! Effects produced by state transitions

use crate::transport::SenderId;
use chrono::{DateTime, Utc};

/// Side-effect requests emitted by `transition`.
///
/// The dispatcher executes each effect and feeds the outcome back in as an
/// event (`Registered`, `RegistrationFailed`, `BatchCommitted`).
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Persist a new registered user
    RegisterUser {
        sender_id: SenderId,
        display_name: String,
        cellphone: String,
    },

    /// Run the duplicate-tolerant batch commit for a confirmed candidate list
    CommitBatch {
        cellphone: String,
        numbers: Vec<String>,
        submitted_at: DateTime<Utc>,
    },
}
