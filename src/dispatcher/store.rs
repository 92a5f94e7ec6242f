use crate::state_machine::ConvState;
use crate::transport::SenderId;
use std::collections::HashMap;

/// In-memory conversation states, one per sender.
///
/// Only the dispatcher writes, and it processes one message at a time per
/// pass, so a sender's state never sees interleaved updates. States are
/// deliberately not persisted: after a restart every sender starts Idle.
#[derive(Default)]
pub struct ConversationStore {
    states: HashMap<SenderId, ConvState>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state for a sender; unknown senders are Idle.
    pub fn get(&self, sender: &SenderId) -> ConvState {
        self.states.get(sender).cloned().unwrap_or_default()
    }

    /// Record a sender's new state. Idle entries are dropped so the map
    /// only holds senders mid-flow.
    pub fn set(&mut self, sender: &SenderId, state: ConvState) {
        if state.is_idle() {
            self.states.remove(sender);
        } else {
            self.states.insert(sender.clone(), state);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_sender_defaults_to_idle() {
        let store = ConversationStore::new();
        assert!(store.get(&SenderId::new("x@c.us")).is_idle());
    }

    #[test]
    fn idle_states_are_not_retained() {
        let mut store = ConversationStore::new();
        let sender = SenderId::new("x@c.us");

        store.set(
            &sender,
            ConvState::AwaitingPhoneRegistration {
                display_name: "Ana".to_string(),
            },
        );
        assert_eq!(store.len(), 1);

        store.set(&sender, ConvState::Idle);
        assert_eq!(store.len(), 0);
    }
}
