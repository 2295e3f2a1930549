pub mod events;
mod identity;
mod sdp;

pub use identity::{Contact, EmptyIdentity, Identity};
pub use sdp::{IceCandidate, SdpType, SessionDescription};
