//! Pure state transition function
//!
//! Rule evaluation is strictly ordered so that a message matching several
//! rules (digits inside a greeting, a confirmation answer that happens to
//! contain digits) behaves deterministically:
//!
//! 1. broadcast senders bypass everything and never get a state
//! 2. a pending confirmation consumes the message as a yes/no answer
//! 3. a pending registration consumes the message as a cellphone number
//! 4. unregistered senders are prompted to register
//! 5. digit runs (text first, then image) open a confirmation
//! 6. the greeting gets the instructional reply
//! 7. media without decodable digits gets an error reply
//! 8. anything else is ignored

use super::{ConvState, Effect, Event, LookupResult, SenderContext};
use regex::Regex;
use std::sync::OnceLock;

const REGISTRATION_PROMPT: &str = "Bienvenido. Para registrarte, envía tu número de celular \
     (10 dígitos, comienza por 3). Ejemplo: 3001234567";

const PHONE_FORMAT_ERROR: &str = "Número de celular inválido. Debe tener exactamente 10 dígitos \
     y comenzar por 3. Ejemplo: 3001234567";

const REGISTRATION_SUCCESS: &str = "✅ Registro exitoso.\nAhora digita los números de las boletas \
     separados por comas o envía una imagen con los números visibles en forma horizontal.";

const GREETING_REPLY: &str = "¡Hola!\nPor favor digita los números de las boletas separados por \
     comas o envía una imagen con los números visibles en forma horizontal.";

const ANSWER_YES_OR_NO: &str = "Responde S o N";

const NEGATIVE_SUGGESTION: &str = "*Sugerencia*:\n1️⃣ Mejora la imagen y envía de nuevo.\n2️⃣ O \
     digita la lista de números separados por comas.";

const NO_NUMBERS_IN_IMAGE: &str = "No detecté números en la imagen";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub reply: Option<String>,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            reply: None,
            effects: vec![],
        }
    }

    pub fn with_reply(mut self, text: impl Into<String>) -> Self {
        self.reply = Some(text.into());
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Extract decimal digit runs from free text, in order of appearance.
pub fn extract_digit_runs(text: &str) -> Vec<String> {
    static DIGIT_RUNS: OnceLock<Regex> = OnceLock::new();
    let re = DIGIT_RUNS.get_or_init(|| Regex::new(r"\d+").unwrap());
    re.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

/// A cellphone is exactly 10 ASCII digits starting with `3`.
pub fn is_valid_cellphone(s: &str) -> bool {
    s.len() == 10 && s.starts_with('3') && s.chars().all(|c| c.is_ascii_digit())
}

/// The greeting is the exact word `hola`, case-insensitive, after trimming.
pub fn is_greeting(body: &str) -> bool {
    body.trim().eq_ignore_ascii_case("hola")
}

/// Pure transition function.
///
/// Given the same state, context, lookup and event this always produces the
/// same result; all I/O happens in the dispatcher via the returned effects.
pub fn transition(
    state: &ConvState,
    ctx: &SenderContext,
    lookup: &LookupResult,
    event: Event,
) -> TransitionResult {
    // Broadcast senders bypass registration entirely and never hold state.
    if ctx.sender_id.is_broadcast() {
        return TransitionResult::new(ConvState::Idle);
    }

    // Effect completions close out a previous transition in the same
    // dispatch pass; they are not subject to the message rules below.
    match event {
        Event::Registered { .. } => {
            return TransitionResult::new(ConvState::Idle).with_reply(REGISTRATION_SUCCESS);
        }
        Event::RegistrationFailed { reason } => {
            return TransitionResult::new(state.clone()).with_reply(reason);
        }
        Event::BatchCommitted { committed } => {
            return TransitionResult::new(ConvState::Idle).with_reply(committed_reply(&committed));
        }
        Event::Text { .. } | Event::Image { .. } => {}
    }

    match state {
        // A pending confirmation always consumes the message, even a
        // greeting or a fresh number list.
        ConvState::AwaitingNumberConfirmation {
            candidate_numbers,
            cellphone,
            submitted_at,
            ..
        } => match &event {
            Event::Text { body } => {
                let answer = body.trim().to_lowercase();
                match answer.as_str() {
                    "s" | "si" | "y" | "yes" => {
                        TransitionResult::new(ConvState::Idle).with_effect(Effect::CommitBatch {
                            cellphone: cellphone.clone(),
                            numbers: candidate_numbers.clone(),
                            submitted_at: *submitted_at,
                        })
                    }
                    "n" | "no" => {
                        TransitionResult::new(ConvState::Idle).with_reply(NEGATIVE_SUGGESTION)
                    }
                    _ => TransitionResult::new(state.clone()).with_reply(ANSWER_YES_OR_NO),
                }
            }
            Event::Image { .. } => TransitionResult::new(state.clone()).with_reply(ANSWER_YES_OR_NO),
            _ => TransitionResult::new(state.clone()),
        },

        // A pending registration consumes the message as a cellphone; an
        // image cannot be a phone number, so it fails validation too.
        ConvState::AwaitingPhoneRegistration { display_name } => match &event {
            Event::Text { body } if is_valid_cellphone(body.trim()) => {
                TransitionResult::new(state.clone()).with_effect(Effect::RegisterUser {
                    sender_id: ctx.sender_id.clone(),
                    display_name: display_name.clone(),
                    cellphone: body.trim().to_string(),
                })
            }
            _ => TransitionResult::new(state.clone()).with_reply(PHONE_FORMAT_ERROR),
        },

        ConvState::Idle => {
            let Some(registration) = &lookup.registration else {
                // Unregistered sender: any message opens registration.
                return TransitionResult::new(ConvState::AwaitingPhoneRegistration {
                    display_name: ctx.display_name.clone().unwrap_or_default(),
                })
                .with_reply(REGISTRATION_PROMPT);
            };

            match event {
                Event::Text { body } => {
                    let numbers = extract_digit_runs(&body);
                    if !numbers.is_empty() {
                        let reply = detected_reply(&numbers);
                        return TransitionResult::new(ConvState::AwaitingNumberConfirmation {
                            candidate_numbers: numbers,
                            cellphone: registration.cellphone.clone(),
                            submitted_at: ctx.now,
                            raw_text: Some(body),
                        })
                        .with_reply(reply);
                    }
                    if is_greeting(&body) {
                        return TransitionResult::new(ConvState::Idle).with_reply(GREETING_REPLY);
                    }
                    // Unrecognized message: no reply, no state change.
                    TransitionResult::new(ConvState::Idle)
                }
                Event::Image { decoded_numbers } => match decoded_numbers {
                    Some(numbers) if !numbers.is_empty() => {
                        let reply = detected_reply(&numbers);
                        TransitionResult::new(ConvState::AwaitingNumberConfirmation {
                            candidate_numbers: numbers,
                            cellphone: registration.cellphone.clone(),
                            submitted_at: ctx.now,
                            raw_text: None,
                        })
                        .with_reply(reply)
                    }
                    _ => TransitionResult::new(ConvState::Idle).with_reply(NO_NUMBERS_IN_IMAGE),
                },
                _ => TransitionResult::new(ConvState::Idle),
            }
        }
    }
}

fn detected_reply(numbers: &[String]) -> String {
    format!(
        "Números detectados: {}\n\n¿Están correctos? S/N",
        numbers.join(", ")
    )
}

fn committed_reply(committed: &[String]) -> String {
    if committed.is_empty() {
        "Ningún número nuevo fue guardado: todos ya estaban registrados para tu celular."
            .to_string()
    } else {
        format!(
            "✅ Guardado: {}\nLos números que no aparecen ya estaban registrados anteriormente.",
            committed.join(", ")
        )
    }
}
