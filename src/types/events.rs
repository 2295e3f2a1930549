use crate::calls::{CallPhase, NegotiationState};
use crate::types::{Contact, Identity};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// State of the link to the signaling relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingStatus {
    Connected,
    Disconnected,
}

/// Contact list fetched for the current identity (empty when the lookup failed).
#[derive(Debug, Clone)]
pub struct ContactsLoaded {
    pub identity: Identity,
    pub contacts: Vec<Contact>,
}

#[derive(Debug, Clone)]
pub struct CallPhaseChanged {
    pub phase: CallPhase,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NegotiationStateChanged {
    pub remote: Identity,
    pub state: NegotiationState,
    pub at: DateTime<Utc>,
}

/// A call request reached us. `auto_accepted` is false when the
/// presentation layer has to decide.
#[derive(Debug, Clone)]
pub struct IncomingCall {
    pub from: Identity,
    pub from_display_name: Option<String>,
    pub auto_accepted: bool,
}

/// The callee declined our call request.
#[derive(Debug, Clone)]
pub struct DeclineNotice {
    pub message: Option<String>,
}

/// User-facing failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Media device or connection creation failed; the call was reset.
    Setup,
    /// A session description was rejected; the call is stalled until ended.
    Negotiation,
    /// A single ICE candidate could not be applied; the call continues.
    Candidate,
    /// The relay link failed or dropped.
    Transport,
    /// The contact lookup failed; the contact list is empty.
    Directory,
}

#[derive(Debug, Clone)]
pub struct CallFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl CallFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus with one broadcast channel per event type.
        /// The presentation layer subscribes to the channels it renders.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    (signaling, Arc<SignalingStatus>),
    (contacts, Arc<ContactsLoaded>),
    (call_phase, Arc<CallPhaseChanged>),
    (negotiation, Arc<NegotiationStateChanged>),
    (incoming_call, Arc<IncomingCall>),
    (call_declined, Arc<DeclineNotice>),
    (call_failure, Arc<CallFailure>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Broadcast without caring whether anybody listens.
    pub fn publish<T>(sender: &broadcast::Sender<Arc<T>>, event: T) {
        let _ = sender.send(Arc::new(event));
    }

    pub fn failure(&self, kind: FailureKind, message: impl Into<String>) {
        Self::publish(&self.call_failure, CallFailure::new(kind, message));
    }
}
