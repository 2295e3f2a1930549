//! Media engine seam.
//!
//! The call controller never touches a concrete WebRTC stack. It drives a
//! [`MediaEngine`], which hands out [`PeerConnection`]s and captured
//! [`LocalStream`]s, and receives the engine's callbacks as [`PeerEvent`]s.
//!
//! - [`WebRtcEngine`]: implementation on the `webrtc` crate
//! - [`CaptureSource`]: where captured tracks get their samples
//! - [`MediaSurfaces`]: local/remote video surface bindings for the UI

mod capture;
mod surface;
mod webrtc;

pub use self::capture::{CaptureSource, EncodedSample, FileCapture, SampleFeed};
pub use self::surface::{MediaSurfaces, SurfaceWatch, VideoSurface};
pub use self::webrtc::{WebRtcConnection, WebRtcEngine, WebRtcLocalStream};

use crate::types::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("peer connection error: {0}")]
    Connection(String),

    #[error("session description rejected: {0}")]
    DescriptionRejected(String),

    #[error("ICE candidate rejected: {0}")]
    CandidateRejected(String),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("connection closed")]
    Closed,

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] ::webrtc::Error),
}

/// One STUN or TURN server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

/// Configuration every peer connection is created with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtcConfiguration {
    pub ice_servers: Vec<IceServer>,
}

/// Which tracks local capture should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    pub id: String,
    pub kind: TrackKind,
}

/// What a video surface shows: one media stream and its tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub id: String,
    pub tracks: Vec<TrackInfo>,
}

impl StreamInfo {
    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Video)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Callback from the engine about one peer connection.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A local ICE candidate was gathered and should go to the remote peer.
    LocalCandidate(IceCandidate),
    /// Remote media arrived.
    RemoteStream(StreamInfo),
    StateChanged(ConnectionState),
}

/// Sink the engine reports [`PeerEvent`]s into. Cheap to clone.
#[derive(Clone)]
pub struct PeerEvents(Arc<dyn Fn(PeerEvent) + Send + Sync>);

impl PeerEvents {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(PeerEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(sink))
    }

    pub fn emit(&self, event: PeerEvent) {
        (self.0)(event)
    }
}

impl fmt::Debug for PeerEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PeerEvents(..)")
    }
}

#[async_trait]
pub trait PeerConnection: Send + Sync + 'static {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;
    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;
    async fn set_local_description(&self, description: SessionDescription)
    -> Result<(), MediaError>;
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;
    async fn has_remote_description(&self) -> bool;
    async fn close(&self) -> Result<(), MediaError>;
}

/// A captured local audio/video stream.
#[async_trait]
pub trait LocalStream: Send + Sync + 'static {
    fn info(&self) -> StreamInfo;
    /// Stop every track. Calling it again is a no-op.
    async fn stop(&self);
    fn is_live(&self) -> bool;
}

#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    type Connection: PeerConnection;
    type Stream: LocalStream;

    async fn create_peer_connection(
        &self,
        config: &RtcConfiguration,
        events: PeerEvents,
    ) -> Result<Self::Connection, MediaError>;

    async fn capture_local_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Self::Stream, MediaError>;

    /// Add every track of `stream` to `connection`.
    async fn attach_local_stream(
        &self,
        connection: &Self::Connection,
        stream: &Self::Stream,
    ) -> Result<(), MediaError>;
}
