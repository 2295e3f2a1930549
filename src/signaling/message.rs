//! Typed signaling payloads and the Socket.IO event arguments they travel in.
//!
//! ```json
//! ["offer", {"from": "A", "to": "B", "offer": {"type": "offer", "sdp": "..."}}]
//! ```

use super::error::SignalingError;
use super::event::EventKind;
use crate::types::{IceCandidate, Identity, SessionDescription};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload shared by `callUser`, `incomingCall` and `callAccepted`.
///
/// Fields the relay adds are kept in `extra` so an accept can echo the
/// request verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub to: Identity,
    pub from: Identity,
    #[serde(
        rename = "fromUsername",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub from_username: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CallRequest {
    pub fn new(from: Identity, to: Identity, from_username: Option<String>) -> Self {
        Self {
            to,
            from,
            from_username,
            extra: Map::new(),
        }
    }

    /// The participant on the other side from `me`'s point of view.
    pub fn counterpart(&self, me: &Identity) -> &Identity {
        if &self.to == me { &self.from } else { &self.to }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CallDeclined {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CallDeclined {
    /// Decline built from the request being declined, echoing its fields.
    pub fn for_request(request: &CallRequest, message: impl Into<String>) -> Self {
        let extra = match serde_json::to_value(request) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self {
            message: Some(message.into()),
            extra,
        }
    }

    /// Callee of the declined request, when the relay echoed it.
    pub fn declined_by(&self) -> Option<&str> {
        self.extra.get("to").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferPayload {
    pub from: Identity,
    pub to: Identity,
    pub offer: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerPayload {
    pub answer: SessionDescription,
    pub to: Identity,
    pub from: Identity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Identity>,
    pub candidate: IceCandidate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndCallPayload {
    pub to: Identity,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CallEndedPayload {
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One signaling message, typed by event.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingMessage {
    CallUser(CallRequest),
    IncomingCall(CallRequest),
    CallAccepted(CallRequest),
    CallDeclined(CallDeclined),
    Offer(OfferPayload),
    Answer(AnswerPayload),
    Candidate(CandidatePayload),
    EndCall(EndCallPayload),
    CallEnded(CallEndedPayload),
}

impl SignalingMessage {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::CallUser(_) => EventKind::CallUser,
            Self::IncomingCall(_) => EventKind::IncomingCall,
            Self::CallAccepted(_) => EventKind::CallAccepted,
            Self::CallDeclined(_) => EventKind::CallDeclined,
            Self::Offer(_) => EventKind::Offer,
            Self::Answer(_) => EventKind::Answer,
            Self::Candidate(_) => EventKind::Candidate,
            Self::EndCall(_) => EventKind::EndCall,
            Self::CallEnded(_) => EventKind::CallEnded,
        }
    }

    /// Encode as Socket.IO event arguments: `["event", data]`.
    pub fn encode(&self) -> Result<String, SignalingError> {
        let data = match self {
            Self::CallUser(p) | Self::IncomingCall(p) | Self::CallAccepted(p) => {
                serde_json::to_value(p)
            }
            Self::CallDeclined(p) => serde_json::to_value(p),
            Self::Offer(p) => serde_json::to_value(p),
            Self::Answer(p) => serde_json::to_value(p),
            Self::Candidate(p) => serde_json::to_value(p),
            Self::EndCall(p) => serde_json::to_value(p),
            Self::CallEnded(p) => serde_json::to_value(p),
        }
        .map_err(SignalingError::Encode)?;

        serde_json::to_string(&(self.kind().tag_name(), data)).map_err(SignalingError::Encode)
    }

    /// Decode Socket.IO event arguments. Arguments after the payload are
    /// ignored, and a missing payload reads as `null`.
    pub fn decode(frame: &str) -> Result<Self, SignalingError> {
        let args: Vec<Value> =
            serde_json::from_str(frame).map_err(SignalingError::InvalidFrame)?;
        let mut args = args.into_iter();
        let event = match args.next() {
            Some(Value::String(event)) => event,
            _ => return Err(SignalingError::MissingEventName),
        };
        let kind =
            EventKind::from_tag(&event).ok_or_else(|| SignalingError::UnknownEvent(event.clone()))?;
        let data = args.next().unwrap_or(Value::Null);

        let message = match kind {
            EventKind::CallUser => Self::CallUser(payload(kind, data)?),
            EventKind::IncomingCall => Self::IncomingCall(payload(kind, data)?),
            EventKind::CallAccepted => Self::CallAccepted(payload(kind, data)?),
            EventKind::CallDeclined => Self::CallDeclined(payload_or_default(kind, data)?),
            EventKind::Offer => Self::Offer(payload(kind, data)?),
            EventKind::Answer => Self::Answer(payload(kind, data)?),
            EventKind::Candidate => Self::Candidate(payload(kind, data)?),
            EventKind::EndCall => Self::EndCall(payload(kind, data)?),
            EventKind::CallEnded => Self::CallEnded(payload_or_default(kind, data)?),
        };
        Ok(message)
    }
}

fn payload<T: DeserializeOwned>(kind: EventKind, data: Value) -> Result<T, SignalingError> {
    serde_json::from_value(data).map_err(|source| SignalingError::MalformedPayload { kind, source })
}

fn payload_or_default<T: DeserializeOwned + Default>(
    kind: EventKind,
    data: Value,
) -> Result<T, SignalingError> {
    if data.is_null() {
        return Ok(T::default());
    }
    payload(kind, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Identity {
        s.parse().unwrap()
    }

    #[test]
    fn test_call_user_wire_shape() {
        let msg = SignalingMessage::CallUser(CallRequest::new(
            id("A"),
            id("B"),
            Some("Alice".into()),
        ));
        let frame = msg.encode().unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v[0], "callUser");
        assert_eq!(v[1]["to"], "B");
        assert_eq!(v[1]["from"], "A");
        assert_eq!(v[1]["fromUsername"], "Alice");
    }

    #[test]
    fn test_incoming_call_keeps_relay_fields() {
        let frame = r#"["incomingCall",{"from":"A","to":"B","fromUsername":"Alice","socketId":"s-19"}]"#;
        let SignalingMessage::IncomingCall(req) = SignalingMessage::decode(frame).unwrap() else {
            panic!("expected incomingCall");
        };
        assert_eq!(req.extra.get("socketId"), Some(&Value::from("s-19")));

        // The accept echoes the request, relay fields included.
        let echo = SignalingMessage::CallAccepted(req).encode().unwrap();
        let v: Value = serde_json::from_str(&echo).unwrap();
        assert_eq!(v[0], "callAccepted");
        assert_eq!(v[1]["socketId"], "s-19");
    }

    #[test]
    fn test_call_ended_without_data() {
        let msg = SignalingMessage::decode(r#"["callEnded"]"#).unwrap();
        assert_eq!(msg.kind(), EventKind::CallEnded);
        let msg = SignalingMessage::decode(r#"["callEnded",{}]"#).unwrap();
        assert_eq!(msg.kind(), EventKind::CallEnded);
        assert_eq!(
            SignalingMessage::CallEnded(CallEndedPayload::default())
                .encode()
                .unwrap(),
            r#"["callEnded",{}]"#
        );
    }

    #[test]
    fn test_unknown_event_is_distinguished() {
        let err = SignalingMessage::decode(r#"["ping",{}]"#).unwrap_err();
        assert!(matches!(err, SignalingError::UnknownEvent(ref e) if e == "ping"));
    }

    #[test]
    fn test_frames_must_be_event_arrays() {
        assert!(matches!(
            SignalingMessage::decode(r#"{"event":"offer","data":{}}"#),
            Err(SignalingError::InvalidFrame(_))
        ));
        for frame in ["[]", "[42,{}]", r#"[{"event":"offer"}]"#] {
            assert!(matches!(
                SignalingMessage::decode(frame),
                Err(SignalingError::MissingEventName)
            ));
        }
    }

    #[test]
    fn test_extra_arguments_are_ignored() {
        let msg = SignalingMessage::decode(r#"["endCall",{"to":"B"},"ack"]"#).unwrap();
        assert_eq!(msg, SignalingMessage::EndCall(EndCallPayload { to: id("B") }));
    }

    #[test]
    fn test_malformed_payload_names_event() {
        let err = SignalingMessage::decode(r#"["offer",{"from":"A"}]"#).unwrap_err();
        assert!(matches!(
            err,
            SignalingError::MalformedPayload {
                kind: EventKind::Offer,
                ..
            }
        ));
    }

    #[test]
    fn test_candidate_without_addressing() {
        let frame = r#"["candidate",{"candidate":{"candidate":"candidate:1 1 udp 1 10.0.0.2 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}]"#;
        let SignalingMessage::Candidate(c) = SignalingMessage::decode(frame).unwrap() else {
            panic!("expected candidate");
        };
        assert!(c.from.is_none());
        assert!(c.to.is_none());
        assert_eq!(c.candidate.sdp_m_line_index, Some(0));
    }

    #[test]
    fn test_decline_echoes_request() {
        let req = CallRequest::new(id("A"), id("B"), None);
        let decline = CallDeclined::for_request(&req, "busy");
        let v = serde_json::to_value(&decline).unwrap();
        assert_eq!(v["message"], "busy");
        assert_eq!(v["from"], "A");
        assert_eq!(v["to"], "B");
        assert_eq!(decline.declined_by(), Some("B"));
        assert_eq!(CallDeclined::default().declined_by(), None);
    }

    #[test]
    fn test_counterpart() {
        let req = CallRequest::new(id("A"), id("B"), None);
        assert_eq!(req.counterpart(&id("A")), &id("B"));
        assert_eq!(req.counterpart(&id("B")), &id("A"));
    }
}
