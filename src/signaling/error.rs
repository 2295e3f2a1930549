use super::event::EventKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),

    #[error("failed to encode signaling message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("signaling frame is not a JSON array: {0}")]
    InvalidFrame(#[source] serde_json::Error),

    #[error("signaling frame does not start with an event name")]
    MissingEventName,

    #[error("unknown signaling event: {0}")]
    UnknownEvent(String),

    #[error("malformed {kind} payload: {source}")]
    MalformedPayload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}
