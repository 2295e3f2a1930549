//! Negotiation and call-phase state machines.

use crate::types::Identity;
use serde::Serialize;

/// State of the single peer connection's offer/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum NegotiationState {
    /// Nothing created yet.
    #[default]
    Idle,
    /// Connection created and local media acquired.
    Connecting,
    /// Our offer is out, waiting for the answer.
    OfferSent,
    /// Our answer is out.
    AnswerSent,
    /// Both descriptions set and the candidate buffer drained.
    Established,
    Closed,
}

impl NegotiationState {
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Still exchanging descriptions.
    pub fn is_negotiating(&self) -> bool {
        matches!(self, Self::Connecting | Self::OfferSent | Self::AnswerSent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationTransition {
    /// Connection created, local media attached.
    Open,
    OfferSent,
    AnswerSent,
    /// Remote description applied. `pending_candidates` is what is still
    /// sitting in the candidate buffer and must be zero.
    Establish { pending_candidates: usize },
    Close,
}

impl NegotiationState {
    /// Next state for `transition`, or an error if the table has no entry.
    pub fn apply(self, transition: NegotiationTransition) -> Result<Self, InvalidTransition> {
        use NegotiationState as S;
        use NegotiationTransition as T;

        let next = match (self, transition) {
            (S::Idle, T::Open) => S::Connecting,
            (S::Connecting, T::OfferSent) => S::OfferSent,
            (S::Connecting, T::AnswerSent) => S::AnswerSent,
            (
                S::OfferSent | S::AnswerSent,
                T::Establish {
                    pending_candidates: 0,
                },
            ) => S::Established,
            (current, T::Close) if current != S::Closed => S::Closed,
            (current, transition) => {
                return Err(InvalidTransition::new(current, transition));
            }
        };
        Ok(next)
    }
}

/// Call lifecycle as seen by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub enum CallPhase {
    #[default]
    NoCall,
    /// We asked `callee` for a call and wait for the accept.
    RingingOut { callee: Identity },
    /// `caller` asked us for a call.
    Incoming { caller: Identity },
    /// A peer connection exists (or is being built) with `remote`.
    InCall { remote: Identity },
}

impl CallPhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::NoCall)
    }

    /// The other participant of the current phase, if any.
    pub fn peer(&self) -> Option<&Identity> {
        match self {
            Self::NoCall => None,
            Self::RingingOut { callee } => Some(callee),
            Self::Incoming { caller } => Some(caller),
            Self::InCall { remote } => Some(remote),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseTransition {
    /// We sent `callUser`.
    Dial(Identity),
    /// An `incomingCall` arrived.
    Ring(Identity),
    /// A negotiation with the peer started.
    Connect(Identity),
    /// Cleanup ran.
    Reset,
}

impl CallPhase {
    pub fn apply(&self, transition: PhaseTransition) -> Result<Self, InvalidTransition> {
        use PhaseTransition as T;

        let next = match (self, transition) {
            (Self::NoCall, T::Dial(callee)) => Self::RingingOut { callee },
            (Self::NoCall, T::Ring(caller)) => Self::Incoming { caller },
            (Self::NoCall, T::Connect(remote)) => Self::InCall { remote },
            (Self::RingingOut { callee }, T::Connect(remote)) if *callee == remote => {
                Self::InCall { remote }
            }
            (Self::Incoming { caller }, T::Connect(remote)) if *caller == remote => {
                Self::InCall { remote }
            }
            (_, T::Reset) => Self::NoCall,
            (current, transition) => {
                return Err(InvalidTransition::new(current, transition));
            }
        };
        Ok(next)
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl InvalidTransition {
    pub(crate) fn new(current: impl std::fmt::Debug, attempted: impl std::fmt::Debug) -> Self {
        Self {
            current_state: format!("{:?}", current),
            attempted: format!("{:?}", attempted),
        }
    }
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Identity {
        s.parse().unwrap()
    }

    /// Flow: Idle → Connecting → OfferSent → Established → Closed
    #[test]
    fn test_offerer_flow() {
        let mut state = NegotiationState::Idle;
        state = state.apply(NegotiationTransition::Open).unwrap();
        assert!(state.is_negotiating());
        state = state.apply(NegotiationTransition::OfferSent).unwrap();
        assert_eq!(state, NegotiationState::OfferSent);
        state = state
            .apply(NegotiationTransition::Establish {
                pending_candidates: 0,
            })
            .unwrap();
        assert!(state.is_established());
        state = state.apply(NegotiationTransition::Close).unwrap();
        assert!(state.is_closed());
    }

    /// Flow: Idle → Connecting → AnswerSent → Established
    #[test]
    fn test_answerer_flow() {
        let state = NegotiationState::Idle
            .apply(NegotiationTransition::Open)
            .unwrap()
            .apply(NegotiationTransition::AnswerSent)
            .unwrap()
            .apply(NegotiationTransition::Establish {
                pending_candidates: 0,
            })
            .unwrap();
        assert!(state.is_established());
    }

    #[test]
    fn test_establish_refused_with_queued_candidates() {
        let err = NegotiationState::OfferSent
            .apply(NegotiationTransition::Establish {
                pending_candidates: 2,
            })
            .unwrap_err();
        assert_eq!(err.current_state, "OfferSent");
    }

    #[test]
    fn test_invalid_negotiation_transitions() {
        assert!(
            NegotiationState::Idle
                .apply(NegotiationTransition::OfferSent)
                .is_err()
        );
        assert!(
            NegotiationState::Connecting
                .apply(NegotiationTransition::Establish {
                    pending_candidates: 0
                })
                .is_err()
        );
        assert!(
            NegotiationState::Established
                .apply(NegotiationTransition::Open)
                .is_err()
        );
        // Closed is terminal.
        assert!(
            NegotiationState::Closed
                .apply(NegotiationTransition::Close)
                .is_err()
        );
    }

    #[test]
    fn test_close_from_any_live_state() {
        for state in [
            NegotiationState::Idle,
            NegotiationState::Connecting,
            NegotiationState::OfferSent,
            NegotiationState::AnswerSent,
            NegotiationState::Established,
        ] {
            assert_eq!(
                state.apply(NegotiationTransition::Close).unwrap(),
                NegotiationState::Closed
            );
        }
    }

    #[test]
    fn test_phase_caller_flow() {
        let phase = CallPhase::NoCall
            .apply(PhaseTransition::Dial(id("B")))
            .unwrap();
        assert_eq!(phase.peer(), Some(&id("B")));
        let phase = phase.apply(PhaseTransition::Connect(id("B"))).unwrap();
        assert_eq!(phase, CallPhase::InCall { remote: id("B") });
        assert!(phase.apply(PhaseTransition::Reset).unwrap().is_idle());
    }

    #[test]
    fn test_phase_rejects_other_party() {
        let phase = CallPhase::Incoming { caller: id("A") };
        assert!(phase.apply(PhaseTransition::Connect(id("C"))).is_err());
        assert!(phase.apply(PhaseTransition::Ring(id("C"))).is_err());
        assert!(phase.apply(PhaseTransition::Dial(id("C"))).is_err());
    }

    #[test]
    fn test_phase_reset_is_idempotent() {
        let phase = CallPhase::NoCall.apply(PhaseTransition::Reset).unwrap();
        assert_eq!(phase, CallPhase::NoCall);
    }
}
