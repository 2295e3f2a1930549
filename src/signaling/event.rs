//! Signaling event catalogue.
//!
//! These are the event names exchanged with the relay. Each one is the first
//! argument of a Socket.IO event.

use std::fmt;

/// Named signaling events understood by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Ask the relay to ring another identity.
    CallUser,
    /// The relay tells a callee somebody is calling.
    IncomingCall,
    /// The callee accepted; relayed back to the caller.
    CallAccepted,
    /// The callee declined (or was busy).
    CallDeclined,
    /// SDP offer.
    Offer,
    /// SDP answer.
    Answer,
    /// One ICE candidate.
    Candidate,
    /// Ask the relay to end the call with the addressed identity.
    EndCall,
    /// The relay tells us the call is over.
    CallEnded,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        Self::CallUser,
        Self::IncomingCall,
        Self::CallAccepted,
        Self::CallDeclined,
        Self::Offer,
        Self::Answer,
        Self::Candidate,
        Self::EndCall,
        Self::CallEnded,
    ];

    /// Name used on the wire.
    pub const fn tag_name(&self) -> &'static str {
        match self {
            Self::CallUser => "callUser",
            Self::IncomingCall => "incomingCall",
            Self::CallAccepted => "callAccepted",
            Self::CallDeclined => "callDeclined",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
            Self::EndCall => "endCall",
            Self::CallEnded => "callEnded",
        }
    }

    /// Parse from the wire name. Names are case-sensitive.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.tag_name() == tag)
    }

    /// Whether this client ever receives the event.
    pub const fn is_inbound(&self) -> bool {
        !matches!(self, Self::CallUser | Self::EndCall)
    }

    /// Whether this client ever sends the event.
    pub const fn is_outbound(&self) -> bool {
        matches!(
            self,
            Self::CallUser
                | Self::CallAccepted
                | Self::CallDeclined
                | Self::Offer
                | Self::Answer
                | Self::Candidate
                | Self::EndCall
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag_name())
    }
}
