//! Calls: the negotiation core.
//!
//! # Architecture
//!
//! - [`CandidateBuffer`]: remote ICE candidates held until they can be applied
//! - [`Negotiator`]: the single peer connection and its offer/answer exchange
//! - [`CallController`]: call lifecycle, policies and cleanup; sole owner of
//!   the negotiator
//! - [`media`]: the engine seam and its `webrtc` implementation
//!
//! # Protocol Overview
//!
//! The caller sends `callUser`; the callee answers `callAccepted` (or
//! `callDeclined`). On the accept the caller becomes the offerer and sends
//! `offer`; the callee answers with `answer`. Both sides trickle `candidate`
//! messages throughout. `endCall` asks the peer to hang up, and `callEnded`
//! tells us the peer did.

mod candidates;
mod controller;
mod error;
pub mod media;
mod negotiator;
mod state;


pub use candidates::{CandidateBuffer, CandidateOutcome, DrainReport};
pub use controller::{CallCommand, CallConfig, CallController, CallHandle, ControllerInput};
pub use error::CallError;
pub use negotiator::{Negotiator, Role};
pub use state::{
    CallPhase, InvalidTransition, NegotiationState, NegotiationTransition, PhaseTransition,
};
