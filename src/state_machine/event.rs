//! Events that trigger conversation state transitions

/// Events fed into `transition`.
///
/// `Text` and `Image` are normalized inbound messages; the remaining
/// variants are effect completions the dispatcher chains back in, so a
/// reply that depends on an effect's outcome is only produced once that
/// outcome is known.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Plain text message body
    Text { body: String },

    /// Media message after OCR; `None` when no digits were decodable
    Image { decoded_numbers: Option<Vec<String>> },

    /// A `RegisterUser` effect succeeded
    Registered { cellphone: String },

    /// A `RegisterUser` effect failed; `reason` is the user-facing reply
    RegistrationFailed { reason: String },

    /// A `CommitBatch` effect finished; `committed` is the verified set of
    /// newly persisted numbers, in batch order
    BatchCommitted { committed: Vec<String> },
}
