use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::calls::media::{
    LocalStream, MediaConstraints, MediaEngine, MediaError, PeerConnection, PeerEvent,
    PeerEvents, RtcConfiguration, StreamInfo, TrackInfo, TrackKind,
};
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::types::{IceCandidate, SessionDescription};

/// Answers every request with one canned response and records what it saw.
#[derive(Debug, Default)]
pub struct MockHttpClient {
    status_code: u16,
    body: Vec<u8>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttpClient {
    pub fn new(status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code,
            body: body.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        self.requests.lock().unwrap().push(request);
        Ok(HttpResponse {
            status_code: self.status_code,
            body: self.body.clone(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct FailingMockHttpClient;

#[async_trait]
impl HttpClient for FailingMockHttpClient {
    async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        Err(anyhow::anyhow!("connection refused"))
    }
}

/// Engine operations a test can make fail or hang.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockStep {
    CreateConnection,
    Capture,
    Attach,
    CreateOffer,
    CreateAnswer,
    SetLocal,
    SetRemote,
    Close,
}

#[derive(Default)]
struct MockShared {
    connections: Mutex<Vec<MockConnection>>,
    streams: Mutex<Vec<MockStream>>,
    failing: Mutex<HashSet<MockStep>>,
    hanging: Mutex<HashSet<MockStep>>,
    slow: Mutex<HashMap<MockStep, Duration>>,
    rejected_candidates: Mutex<HashSet<String>>,
    next_id: AtomicUsize,
}

impl MockShared {
    async fn check(&self, step: MockStep) -> Result<(), MediaError> {
        let hang = self.hanging.lock().unwrap().contains(&step);
        if hang {
            std::future::pending::<()>().await;
        }
        let delay = self.slow.lock().unwrap().get(&step).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let fail = self.failing.lock().unwrap().contains(&step);
        if !fail {
            return Ok(());
        }
        Err(match step {
            MockStep::Capture => MediaError::DeviceUnavailable("camera in use".into()),
            MockStep::SetLocal | MockStep::SetRemote => {
                MediaError::DescriptionRejected("malformed sdp".into())
            }
            other => MediaError::Connection(format!("{:?} failed", other)),
        })
    }

    fn next_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// In-memory media engine. Clones share state, so a test keeps one clone
/// and hands the other to the code under test.
#[derive(Clone, Default)]
pub struct MockEngine {
    shared: Arc<MockShared>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, step: MockStep) {
        self.shared.failing.lock().unwrap().insert(step);
    }

    pub fn hang_on(&self, step: MockStep) {
        self.shared.hanging.lock().unwrap().insert(step);
    }

    /// Let `step` take `delay` before it completes.
    pub fn delay_on(&self, step: MockStep, delay: Duration) {
        self.shared.slow.lock().unwrap().insert(step, delay);
    }

    pub fn clear_faults(&self) {
        self.shared.failing.lock().unwrap().clear();
        self.shared.hanging.lock().unwrap().clear();
        self.shared.slow.lock().unwrap().clear();
    }

    pub fn reject_candidate(&self, candidate: &str) {
        self.shared
            .rejected_candidates
            .lock()
            .unwrap()
            .insert(candidate.to_owned());
    }

    /// Every connection ever created, oldest first.
    pub fn connections(&self) -> Vec<MockConnection> {
        self.shared.connections.lock().unwrap().clone()
    }

    pub fn live_connections(&self) -> usize {
        self.connections().iter().filter(|c| !c.is_closed()).count()
    }

    pub fn streams(&self) -> Vec<MockStream> {
        self.shared.streams.lock().unwrap().clone()
    }

    pub fn live_streams(&self) -> usize {
        self.streams().iter().filter(|s| s.is_live()).count()
    }

    /// A connection not tracked by the engine and wired to no controller.
    pub fn detached_connection(&self) -> MockConnection {
        MockConnection::new(self.shared.clone(), PeerEvents::new(|_| {}))
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    type Connection = MockConnection;
    type Stream = MockStream;

    async fn create_peer_connection(
        &self,
        _config: &RtcConfiguration,
        events: PeerEvents,
    ) -> Result<MockConnection, MediaError> {
        self.shared.check(MockStep::CreateConnection).await?;
        let connection = MockConnection::new(self.shared.clone(), events);
        self.shared
            .connections
            .lock()
            .unwrap()
            .push(connection.clone());
        Ok(connection)
    }

    async fn capture_local_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MockStream, MediaError> {
        self.shared.check(MockStep::Capture).await?;
        let stream = MockStream {
            inner: Arc::new(MockStreamInner {
                id: format!("local-{}", self.shared.next_id()),
                constraints: *constraints,
                live: AtomicBool::new(true),
            }),
        };
        self.shared.streams.lock().unwrap().push(stream.clone());
        Ok(stream)
    }

    async fn attach_local_stream(
        &self,
        connection: &MockConnection,
        stream: &MockStream,
    ) -> Result<(), MediaError> {
        self.shared.check(MockStep::Attach).await?;
        connection
            .inner
            .attached
            .lock()
            .unwrap()
            .push(stream.inner.id.clone());
        Ok(())
    }
}

struct MockConnectionInner {
    id: usize,
    events: PeerEvents,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    applied: Mutex<Vec<IceCandidate>>,
    attached: Mutex<Vec<String>>,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct MockConnection {
    inner: Arc<MockConnectionInner>,
    shared: Arc<MockShared>,
}

impl MockConnection {
    fn new(shared: Arc<MockShared>, events: PeerEvents) -> Self {
        Self {
            inner: Arc::new(MockConnectionInner {
                id: shared.next_id(),
                events,
                local: Mutex::new(None),
                remote: Mutex::new(None),
                applied: Mutex::new(Vec::new()),
                attached: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
            shared,
        }
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.inner.local.lock().unwrap().clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.inner.remote.lock().unwrap().clone()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.inner.applied.lock().unwrap().clone()
    }

    pub fn attached_streams(&self) -> Vec<String> {
        self.inner.attached.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Fire an engine callback as if the stack produced it.
    pub fn emit(&self, event: PeerEvent) {
        self.inner.events.emit(event);
    }

    fn remote_stream(&self) -> StreamInfo {
        let id = format!("remote-{}", self.inner.id);
        StreamInfo {
            tracks: vec![
                TrackInfo {
                    id: format!("{id}-audio"),
                    kind: TrackKind::Audio,
                },
                TrackInfo {
                    id: format!("{id}-video"),
                    kind: TrackKind::Video,
                },
            ],
            id,
        }
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        self.shared.check(MockStep::CreateOffer).await?;
        Ok(SessionDescription::offer(format!(
            "v=0\r\no=mock {} 1 IN IP4 127.0.0.1\r\ns=offer\r\n",
            self.inner.id
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        self.shared.check(MockStep::CreateAnswer).await?;
        if self.inner.remote.lock().unwrap().is_none() {
            return Err(MediaError::DescriptionRejected(
                "no remote offer to answer".into(),
            ));
        }
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=mock {} 1 IN IP4 127.0.0.1\r\ns=answer\r\n",
            self.inner.id
        )))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.shared.check(MockStep::SetLocal).await?;
        *self.inner.local.lock().unwrap() = Some(description);
        Ok(())
    }

    /// Remote media shows up as soon as the remote description is applied.
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.shared.check(MockStep::SetRemote).await?;
        *self.inner.remote.lock().unwrap() = Some(description);
        self.emit(PeerEvent::RemoteStream(self.remote_stream()));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        if self.is_closed() {
            return Err(MediaError::Closed);
        }
        if self.inner.remote.lock().unwrap().is_none() {
            return Err(MediaError::CandidateRejected(
                "remote description not set".into(),
            ));
        }
        let rejected = self
            .shared
            .rejected_candidates
            .lock()
            .unwrap()
            .contains(&candidate.candidate);
        if rejected {
            return Err(MediaError::CandidateRejected(candidate.candidate));
        }
        self.inner.applied.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.inner.remote.lock().unwrap().is_some()
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.shared.check(MockStep::Close).await?;
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockStreamInner {
    id: String,
    constraints: MediaConstraints,
    live: AtomicBool,
}

#[derive(Clone)]
pub struct MockStream {
    inner: Arc<MockStreamInner>,
}

#[async_trait]
impl LocalStream for MockStream {
    fn info(&self) -> StreamInfo {
        let id = &self.inner.id;
        let mut tracks = Vec::new();
        if self.inner.constraints.audio {
            tracks.push(TrackInfo {
                id: format!("{id}-audio"),
                kind: TrackKind::Audio,
            });
        }
        if self.inner.constraints.video {
            tracks.push(TrackInfo {
                id: format!("{id}-video"),
                kind: TrackKind::Video,
            });
        }
        StreamInfo {
            id: id.clone(),
            tracks,
        }
    }

    async fn stop(&self) {
        self.inner.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }
}
