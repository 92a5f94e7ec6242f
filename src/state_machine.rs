//! Core conversation state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions:
//! each inbound message becomes an event, the transition function returns
//! the next state plus an optional reply and side-effect requests, and the
//! dispatcher feeds effect results back in as follow-up events.

mod effect;
mod event;
mod state;
mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{ConvState, LookupResult, Registration, SenderContext};
pub use transition::{
    extract_digit_runs, is_greeting, is_valid_cellphone, transition, TransitionResult,
};
