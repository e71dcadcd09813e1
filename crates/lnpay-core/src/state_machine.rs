use std::fmt;

use crate::error::CoreError;

/// States of one pay() call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayState {
    /// Request validated, nothing tried yet.
    Initial,
    /// At least one attempt has started.
    Attempting,
    /// The payee released the preimage. Final state.
    Succeeded,
    /// Every strategy failed, the attempt bound was hit, or the failure was permanent.
    /// Final state.
    Exhausted,
    /// The node stopped before the call finished and the outcome found on restart
    /// was not a success. Final state.
    Interrupted,
}

impl PayState {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted | Self::Interrupted)
    }
}

impl fmt::Display for PayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Attempting => write!(f, "attempting"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Events driving a pay() call forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayEvent {
    /// The first attempt begins.
    Start,
    /// Another attempt begins after a failed one.
    Retry,
    /// An attempt was fulfilled.
    Fulfilled,
    /// No further attempt will be made.
    GiveUp,
    /// Closed out on restart without a fulfilled attempt.
    Interrupt,
}

/// Valid transitions:
/// - Initial → Attempting (Start)
/// - Attempting → Attempting (Retry)
/// - Attempting → Succeeded (Fulfilled)
/// - Attempting → Exhausted (GiveUp)
/// - Initial | Attempting → Interrupted (Interrupt)
pub struct PayStateMachine;

impl PayStateMachine {
    pub fn transition(current: PayState, event: PayEvent) -> Result<PayState, CoreError> {
        let new_state = match (current, event) {
            (PayState::Initial, PayEvent::Start) => PayState::Attempting,
            (PayState::Attempting, PayEvent::Retry) => PayState::Attempting,
            (PayState::Attempting, PayEvent::Fulfilled) => PayState::Succeeded,
            (PayState::Attempting, PayEvent::GiveUp) => PayState::Exhausted,
            (PayState::Initial | PayState::Attempting, PayEvent::Interrupt) => {
                PayState::Interrupted
            }
            _ => {
                let target = match event {
                    PayEvent::Start | PayEvent::Retry => PayState::Attempting,
                    PayEvent::Fulfilled => PayState::Succeeded,
                    PayEvent::GiveUp => PayState::Exhausted,
                    PayEvent::Interrupt => PayState::Interrupted,
                };
                return Err(CoreError::InvalidStateTransition {
                    from: current,
                    to: target,
                });
            }
        };

        tracing::debug!(
            from = %current,
            to = %new_state,
            event = ?event,
            "pay state transition"
        );

        Ok(new_state)
    }

    pub fn can_transition(current: PayState, event: PayEvent) -> bool {
        Self::transition(current, event).is_ok()
    }
}
