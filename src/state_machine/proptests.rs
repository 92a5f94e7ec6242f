use super::*;
use crate::transport::SenderId;
use chrono::Utc;
use proptest::prelude::*;

fn any_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        "[a-zA-Z0-9 ,]{0,40}".prop_map(|body| Event::Text { body }),
        proptest::option::of(proptest::collection::vec("[0-9]{1,6}", 0..4))
            .prop_map(|decoded_numbers| Event::Image { decoded_numbers }),
    ]
}

fn any_state() -> impl Strategy<Value = ConvState> {
    prop_oneof![
        Just(ConvState::Idle),
        "[a-zA-Z ]{0,20}".prop_map(|display_name| ConvState::AwaitingPhoneRegistration {
            display_name
        }),
        proptest::collection::vec("[0-9]{1,6}", 1..5).prop_map(|candidate_numbers| {
            ConvState::AwaitingNumberConfirmation {
                candidate_numbers,
                cellphone: "3001234567".to_string(),
                submitted_at: Utc::now(),
                raw_text: None,
            }
        }),
    ]
}

proptest! {
    /// Exactly the strings matching `3` followed by nine digits are accepted.
    #[test]
    fn cellphone_validation_matches_shape(s in "[0-9a-z]{0,12}") {
        let expected = s.len() == 10
            && s.starts_with('3')
            && s.chars().all(|c| c.is_ascii_digit());
        prop_assert_eq!(is_valid_cellphone(&s), expected);
    }

    #[test]
    fn every_ten_digit_number_starting_with_three_is_accepted(s in "3[0-9]{9}") {
        prop_assert!(is_valid_cellphone(&s));
    }

    /// Digit extraction returns maximal runs: no run is empty, every
    /// character is a digit, and rejoining runs recovers all digits of the
    /// input in order.
    #[test]
    fn digit_runs_cover_all_digits_in_order(s in "[0-9a-z ,.]{0,60}") {
        let runs = extract_digit_runs(&s);
        for run in &runs {
            prop_assert!(!run.is_empty());
            prop_assert!(run.chars().all(|c| c.is_ascii_digit()));
        }
        let joined: String = runs.concat();
        let digits: String = s.chars().filter(char::is_ascii_digit).collect();
        prop_assert_eq!(joined, digits);
    }

    /// Broadcast senders never accumulate state, get replies or cause
    /// side effects, whatever the current state and event.
    #[test]
    fn broadcast_is_inert(state in any_state(), event in any_event()) {
        let ctx = SenderContext {
            sender_id: SenderId::new("status@broadcast"),
            display_name: None,
            now: Utc::now(),
        };
        let result = transition(&state, &ctx, &LookupResult::unregistered(), event);
        prop_assert!(result.new_state.is_idle());
        prop_assert!(result.reply.is_none());
        prop_assert!(result.effects.is_empty());
    }

    /// For ordinary senders the transition is total and any produced
    /// CommitBatch effect carries the registered cellphone.
    #[test]
    fn commit_batch_uses_the_registered_cellphone(state in any_state(), event in any_event()) {
        let ctx = SenderContext {
            sender_id: SenderId::new("573001112233@c.us"),
            display_name: Some("Ana".to_string()),
            now: Utc::now(),
        };
        let lookup = LookupResult::registered("3001234567", "Ana");
        let result = transition(&state, &ctx, &lookup, event);
        for effect in &result.effects {
            if let Effect::CommitBatch { cellphone, numbers, .. } = effect {
                prop_assert_eq!(cellphone, "3001234567");
                prop_assert!(!numbers.is_empty());
            }
        }
    }
}
