//! Call-related error types.

use super::media::MediaError;
use crate::signaling::SignalingError;
use crate::types::events::FailureKind;
use crate::types::Identity;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    /// Connection creation or media capture failed. The call attempt is over.
    #[error("call setup failed: {0}")]
    Setup(#[source] MediaError),

    /// A session description step failed. The call is stalled until ended.
    #[error("negotiation failed: {0}")]
    Negotiation(#[source] MediaError),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("signaling failed: {0}")]
    Signaling(#[from] SignalingError),

    #[error("already in a call with {0}")]
    Busy(Identity),

    #[error("no active call")]
    NoActiveCall,

    #[error("call controller has stopped")]
    ControllerStopped,
}

impl CallError {
    /// Category shown to the user.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Setup(_) => FailureKind::Setup,
            Self::Signaling(_) | Self::ControllerStopped => FailureKind::Transport,
            Self::Negotiation(_)
            | Self::InvalidTransition(_)
            | Self::Busy(_)
            | Self::NoActiveCall => FailureKind::Negotiation,
        }
    }
}
