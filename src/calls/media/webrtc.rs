//! Media engine on top of the `webrtc` crate.
//!
//! Every peer connection is created from one shared API instance with the
//! default codecs and interceptors registered. Engine callbacks (gathered
//! candidates, remote tracks, connection state) are translated into
//! [`PeerEvent`]s and pushed into the [`PeerEvents`] sink the controller
//! handed over.
//!
//! Capture produces an Opus audio track and a VP8 video track. Each track is
//! fed from the engine's [`CaptureSource`] by a task that writes samples at
//! their own pace until the stream is stopped. Embedders can also push
//! samples themselves through [`WebRtcLocalStream::write_sample`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use tokio::sync::Notify;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::capture::{CaptureSource, SampleFeed};
use super::{
    ConnectionState, LocalStream, MediaConstraints, MediaEngine, MediaError, PeerConnection,
    PeerEvent, PeerEvents, RtcConfiguration, StreamInfo, TrackInfo, TrackKind,
};
use crate::types::{IceCandidate, SdpType, SessionDescription};

const AUDIO_CLOCK_RATE: u32 = 48_000;
const VIDEO_CLOCK_RATE: u32 = 90_000;

pub struct WebRtcEngine {
    api: Arc<API>,
    capture: Arc<dyn CaptureSource>,
}

impl WebRtcEngine {
    pub fn new(capture: Arc<dyn CaptureSource>) -> Result<Self, MediaError> {
        let mut media_engine = webrtc::api::media_engine::MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api: Arc::new(api),
            capture,
        })
    }
}

fn rtc_configuration(config: &RtcConfiguration) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: config
            .ice_servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone().unwrap_or_default(),
                credential: s.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

fn connection_state(state: RTCPeerConnectionState) -> ConnectionState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => ConnectionState::New,
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription, MediaError> {
    let converted = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
    };
    converted.map_err(|e| MediaError::DescriptionRejected(e.to_string()))
}

/// Register the engine callbacks of `pc`, translating them into `events`.
fn wire_callbacks(pc: &RTCPeerConnection, events: PeerEvents) {
    let sink = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = sink.clone();
        Box::pin(async move {
            // `None` marks the end of gathering.
            let Some(candidate) = candidate else {
                debug!("ICE gathering complete");
                return;
            };
            match candidate.to_json() {
                Ok(init) => sink.emit(PeerEvent::LocalCandidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_m_line_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                })),
                Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
            }
        })
    }));

    // Audio and video arrive as separate tracks of one stream; report the
    // stream with every track seen so far.
    let remote_streams: Arc<Mutex<HashMap<String, StreamInfo>>> = Arc::default();
    let sink = events.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let kind = match track.kind() {
                RTPCodecType::Audio => Some(TrackKind::Audio),
                RTPCodecType::Video => Some(TrackKind::Video),
                _ => None,
            };
            if let Some(kind) = kind {
                let stream_id = track.stream_id();
                let info = TrackInfo {
                    id: track.id(),
                    kind,
                };
                info!("Remote {:?} track {} on stream {}", kind, info.id, stream_id);

                if let Ok(mut streams) = remote_streams.lock() {
                    let entry = streams.entry(stream_id.clone()).or_insert(StreamInfo {
                        id: stream_id,
                        tracks: Vec::new(),
                    });
                    entry.tracks.push(info);
                    sink.emit(PeerEvent::RemoteStream(entry.clone()));
                }
            }
            Box::pin(async {})
        },
    ));

    let sink = events;
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        debug!("Peer connection state: {}", state);
        sink.emit(PeerEvent::StateChanged(connection_state(state)));
        Box::pin(async {})
    }));
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    type Connection = WebRtcConnection;
    type Stream = WebRtcLocalStream;

    async fn create_peer_connection(
        &self,
        config: &RtcConfiguration,
        events: PeerEvents,
    ) -> Result<WebRtcConnection, MediaError> {
        let pc = self
            .api
            .new_peer_connection(rtc_configuration(config))
            .await
            .map_err(|e| MediaError::Connection(e.to_string()))?;
        wire_callbacks(&pc, events);
        Ok(WebRtcConnection { pc: Arc::new(pc) })
    }

    async fn capture_local_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<WebRtcLocalStream, MediaError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaError::DeviceUnavailable(
                "neither audio nor video requested".to_string(),
            ));
        }

        let stream_id = format!("peercall-{:08x}", rand::random::<u32>());
        let audio = constraints.audio.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: AUDIO_CLOCK_RATE,
                    channels: 2,
                    ..Default::default()
                },
                "audio".to_owned(),
                stream_id.clone(),
            ))
        });
        let video = constraints.video.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: VIDEO_CLOCK_RATE,
                    ..Default::default()
                },
                "video".to_owned(),
                stream_id.clone(),
            ))
        });

        // Open every device before anything runs, so a missing one fails
        // the capture as a whole.
        let mut feeds = Vec::new();
        if audio.is_some() {
            feeds.push((TrackKind::Audio, self.capture.open(TrackKind::Audio)?));
        }
        if video.is_some() {
            feeds.push((TrackKind::Video, self.capture.open(TrackKind::Video)?));
        }

        let stream = WebRtcLocalStream {
            id: stream_id,
            audio,
            video,
            live: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(Notify::new()),
        };
        for (kind, feed) in feeds {
            spawn_sample_pump(stream.clone(), kind, feed, Arc::clone(&self.capture));
        }
        info!("Captured local stream {}", stream.id);
        Ok(stream)
    }

    async fn attach_local_stream(
        &self,
        connection: &WebRtcConnection,
        stream: &WebRtcLocalStream,
    ) -> Result<(), MediaError> {
        for track in stream.tracks() {
            let sender = connection
                .pc
                .add_track(Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;

            // RTCP has to be read for the interceptors to work.
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }
        Ok(())
    }
}

pub struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for WebRtcConnection {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        let offer = self.pc.create_offer(None).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let answer = self.pc.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(|e| MediaError::DescriptionRejected(e.to_string()))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(|e| MediaError::DescriptionRejected(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| MediaError::CandidateRejected(e.to_string()))
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.pc.close().await?;
        Ok(())
    }
}

/// Write samples from `feed` into the `kind` track of `stream` until the
/// stream stops. An exhausted feed is reopened so recordings loop.
fn spawn_sample_pump(
    stream: WebRtcLocalStream,
    kind: TrackKind,
    mut feed: Box<dyn SampleFeed>,
    capture: Arc<dyn CaptureSource>,
) {
    tokio::spawn(async move {
        let mut fresh = true;
        loop {
            let sample = match feed.next_sample() {
                Ok(Some(sample)) => sample,
                Ok(None) if fresh => {
                    warn!("{:?} source of {} has no samples", kind, stream.id);
                    return;
                }
                Ok(None) => match capture.open(kind) {
                    Ok(next) => {
                        debug!("Restarting {:?} source of {}", kind, stream.id);
                        feed = next;
                        fresh = true;
                        continue;
                    }
                    Err(e) => {
                        warn!("Lost {:?} source of {}: {}", kind, stream.id, e);
                        return;
                    }
                },
                Err(e) => {
                    warn!("Lost {:?} source of {}: {}", kind, stream.id, e);
                    return;
                }
            };
            fresh = false;

            let duration = sample.duration;
            match stream.write_sample(kind, sample.data, duration).await {
                Ok(()) => {}
                Err(MediaError::Closed) => return,
                Err(e) => {
                    warn!("Failed to write {:?} sample: {}", kind, e);
                    return;
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = stream.stopped.notified() => return,
            }
        }
    });
}

#[derive(Clone)]
pub struct WebRtcLocalStream {
    id: String,
    audio: Option<Arc<TrackLocalStaticSample>>,
    video: Option<Arc<TrackLocalStaticSample>>,
    live: Arc<AtomicBool>,
    stopped: Arc<Notify>,
}

impl WebRtcLocalStream {
    fn tracks(&self) -> impl Iterator<Item = &Arc<TrackLocalStaticSample>> {
        self.audio.iter().chain(self.video.iter())
    }

    /// Push one encoded sample into the track of `kind`.
    pub async fn write_sample(
        &self,
        kind: TrackKind,
        data: Bytes,
        duration: Duration,
    ) -> Result<(), MediaError> {
        if !self.is_live() {
            return Err(MediaError::Closed);
        }
        let track = match kind {
            TrackKind::Audio => self.audio.as_ref(),
            TrackKind::Video => self.video.as_ref(),
        }
        .ok_or_else(|| MediaError::DeviceUnavailable(format!("no {:?} track", kind)))?;

        track
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LocalStream for WebRtcLocalStream {
    fn info(&self) -> StreamInfo {
        let mut tracks = Vec::new();
        if let Some(audio) = &self.audio {
            tracks.push(TrackInfo {
                id: audio.id().to_owned(),
                kind: TrackKind::Audio,
            });
        }
        if let Some(video) = &self.video {
            tracks.push(TrackInfo {
                id: video.id().to_owned(),
                kind: TrackKind::Video,
            });
        }
        StreamInfo {
            id: self.id.clone(),
            tracks,
        }
    }

    async fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            self.stopped.notify_waiters();
            info!("Stopped local stream {}", self.id);
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}
