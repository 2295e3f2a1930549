//! Signaling over the relay: event catalogue, JSON wire format, and the
//! channel adapter with its dispatch table.

mod channel;
mod error;
mod event;
mod message;

pub use channel::SignalingChannel;
pub use error::SignalingError;
pub use event::EventKind;
pub use message::{
    AnswerPayload, CallDeclined, CallEndedPayload, CallRequest, CandidatePayload, EndCallPayload,
    OfferPayload, SignalingMessage,
};

/// Relay URL for `identity`: the identity rides along as the `uuid` query
/// parameter.
pub fn relay_url(base: &str, identity: &crate::types::Identity) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{base}{separator}uuid={}",
        urlencoding::encode(identity.as_str())
    )
}
