//! Peer-to-peer video calling between two identities.
//!
//! Signaling goes through a Socket.IO relay, contacts come from a directory
//! service, and media flows directly between the peers over WebRTC.

pub mod calls;
pub mod config;
pub mod directory;
pub mod http;
pub mod session;
pub mod signaling;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use calls::{CallCommand, CallConfig, CallController, CallError, CallHandle, CallPhase};
pub use config::ClientConfig;
pub use session::{IdentitySession, SessionDeps, SessionError};
pub use types::{Contact, Identity};
