/// Tokio-based Socket.IO transport for the peercall signaling relay.
///
/// This crate provides the `Transport` seam the core crate talks to, plus a
/// concrete implementation speaking Socket.IO over a tokio-tungstenite
/// websocket. Each `send` is one Socket.IO event whose arguments are the
/// given JSON array, and each inbound event is handed up as that array. The
/// transport knows nothing about the events themselves.
///
/// A lost link is redialed with backoff. Every successful redial reports
/// `Connected` again, so the layer above sees one `Disconnected` and one
/// `Connected` per outage.
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

mod packet;

pub use packet::{Endpoint, endpoint};
use packet::{OpenInfo, Packet};

/// An event produced by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport has (re)connected.
    Connected,
    /// An event has been received from the relay.
    MessageReceived(String),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active connection to the relay.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one text frame to the relay.
    async fn send(&self, text: &str) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Dials `url` and returns the transport along with its stream of events.
    async fn create_transport(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const EVENT_CHANNEL_CAPACITY: usize = 100;
const FRAME_MAX_SIZE: usize = 1 << 20;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// How a lost link is redialed.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Random spread applied to every delay, as a fraction of it.
    pub jitter: f64,
    /// `None` keeps trying forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter: 0.5,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before redial number `attempt`, counted from zero.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .initial_delay
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_delay);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return base;
        }
        let spread = base.as_secs_f64() * jitter;
        let offset = rand::random::<f64>() * 2.0 * spread - spread;
        Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0)).min(self.max_delay)
    }
}

/// State shared by the transport handle and the task driving the link.
struct Link {
    sink: Mutex<Option<WsSink>>,
    nsp: String,
    closed: AtomicBool,
    shutdown: Notify,
}

impl Link {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn write(&self, frame: String) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Socket is closed"))?;
        sink.send(Message::text(frame))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send error: {}", e))
    }
}

/// Socket.IO client transport
pub struct SocketIoTransport {
    link: Arc<Link>,
}

#[async_trait]
impl Transport for SocketIoTransport {
    async fn send(&self, text: &str) -> Result<(), anyhow::Error> {
        check_frame_size(text.len())?;
        debug!("--> Sending event: {} bytes", text.len());
        self.link
            .write(packet::event_frame(&self.link.nsp, text))
            .await
    }

    async fn disconnect(&self) {
        if self.link.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut sink) = self.link.sink.lock().await.take() {
            let goodbye = packet::disconnect_frame(&self.link.nsp);
            if let Err(e) = sink.send(Message::text(goodbye)).await {
                debug!("Failed to say goodbye to relay: {e}");
            }
            if let Err(e) = sink.close().await {
                debug!("WebSocket close error: {e}");
            }
        }
        self.link.shutdown.notify_one();
    }
}

fn check_frame_size(len: usize) -> Result<(), anyhow::Error> {
    if len >= FRAME_MAX_SIZE {
        return Err(anyhow::anyhow!(
            "Frame is too large (max: {}, got: {})",
            FRAME_MAX_SIZE,
            len
        ));
    }
    Ok(())
}

/// Factory for creating Socket.IO transports
#[derive(Default)]
pub struct SocketIoTransportFactory {
    reconnect: ReconnectPolicy,
}

impl SocketIoTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

#[async_trait]
impl TransportFactory for SocketIoTransportFactory {
    async fn create_transport(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let endpoint = packet::endpoint(url)?;
        let (sink, stream, open) = handshake(&endpoint).await?;
        info!("Joined relay as {}", open.sid);

        let link = Arc::new(Link {
            sink: Mutex::new(Some(sink)),
            nsp: endpoint.nsp.clone(),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        });
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Connected must be queued before the driver can report anything else.
        let _ = event_tx.send(TransportEvent::Connected).await;
        tokio::task::spawn(drive_link(
            link.clone(),
            endpoint,
            stream,
            open,
            self.reconnect.clone(),
            event_tx,
        ));

        Ok((Arc::new(SocketIoTransport { link }), event_rx))
    }
}

/// Open the websocket and join the namespace.
async fn handshake(endpoint: &Endpoint) -> Result<(WsSink, WsStream, OpenInfo), anyhow::Error> {
    info!("Dialing {}", endpoint.url);
    let (client, _response) = connect_async(endpoint.url.as_str())
        .await
        .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {}", e))?;
    let (mut sink, mut stream) = client.split();

    let open = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        let open = loop {
            match packet::parse(&next_text(&mut stream).await?)? {
                Packet::Open(open) => break open,
                other => trace!("Ignoring {:?} before open", other),
            }
        };
        sink.send(Message::text(packet::connect_frame(&endpoint.nsp)))
            .await?;
        loop {
            let text = next_text(&mut stream).await?;
            match packet::parse(&text)? {
                Packet::Connect { nsp } if nsp == endpoint.nsp => break,
                Packet::ConnectError { reason, .. } => {
                    return Err(anyhow::anyhow!("Relay refused connection: {}", reason));
                }
                Packet::Ping => sink.send(Message::text(packet::PONG)).await?,
                other => trace!("Ignoring {:?} before connect", other),
            }
        }
        Ok::<_, anyhow::Error>(open)
    })
    .await
    .map_err(|_| anyhow::anyhow!("Socket.IO handshake timed out"))??;

    Ok((sink, stream, open))
}

async fn next_text(stream: &mut WsStream) -> Result<String, anyhow::Error> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_owned()),
            Some(Ok(Message::Close(_))) | None => {
                return Err(anyhow::anyhow!("Relay closed the connection"));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(anyhow::anyhow!("WebSocket read error: {}", e)),
        }
    }
}

/// Why a connected link stopped.
#[derive(Debug, PartialEq, Eq)]
enum LinkEnd {
    /// Network or relay trouble; worth redialing.
    Lost,
    /// The relay disconnected us on purpose.
    Kicked,
    /// We disconnected.
    Closed,
    ReceiverGone,
}

async fn drive_link(
    link: Arc<Link>,
    endpoint: Endpoint,
    mut stream: WsStream,
    mut open: OpenInfo,
    policy: ReconnectPolicy,
    event_tx: mpsc::Sender<TransportEvent>,
) {
    loop {
        let end = read_pump(&link, &mut stream, &open, &event_tx).await;
        link.sink.lock().await.take();
        if end == LinkEnd::ReceiverGone {
            warn!("Event receiver dropped, closing relay link");
            return;
        }
        let _ = event_tx.send(TransportEvent::Disconnected).await;
        match end {
            LinkEnd::Closed | LinkEnd::ReceiverGone => {
                info!("Relay link closed");
                return;
            }
            LinkEnd::Kicked => {
                warn!("Relay ended the session, not reconnecting");
                return;
            }
            LinkEnd::Lost => {}
        }

        let Some((sink, new_stream, new_open)) = redial(&link, &endpoint, &policy).await else {
            return;
        };
        {
            let mut sink_guard = link.sink.lock().await;
            if link.is_closed() {
                drop(sink_guard);
                let mut sink = sink;
                let _ = sink.close().await;
                return;
            }
            *sink_guard = Some(sink);
        }
        stream = new_stream;
        open = new_open;
        info!("Rejoined relay as {}", open.sid);
        if event_tx.send(TransportEvent::Connected).await.is_err() {
            return;
        }
    }
}

/// Redial until it works, the policy gives up or the transport is closed.
async fn redial(
    link: &Link,
    endpoint: &Endpoint,
    policy: &ReconnectPolicy,
) -> Option<(WsSink, WsStream, OpenInfo)> {
    let mut attempt = 0u32;
    loop {
        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            error!("Giving up on the relay after {} attempts", attempt);
            return None;
        }
        let delay = policy.delay(attempt);
        attempt += 1;
        info!("Will attempt to reconnect in {:?} (attempt {})", delay, attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = link.shutdown.notified() => return None,
        }
        if link.is_closed() {
            return None;
        }
        match handshake(endpoint).await {
            Ok(connection) => return Some(connection),
            Err(e) => warn!("Reconnect failed: {:#}", e),
        }
    }
}

async fn read_pump(
    link: &Link,
    stream: &mut WsStream,
    open: &OpenInfo,
    event_tx: &mpsc::Sender<TransportEvent>,
) -> LinkEnd {
    let silence_limit = open.silence_limit();
    let lost = || {
        if link.is_closed() {
            LinkEnd::Closed
        } else {
            LinkEnd::Lost
        }
    };
    loop {
        let next = tokio::select! {
            next = tokio::time::timeout(silence_limit, stream.next()) => next,
            _ = link.shutdown.notified() => return LinkEnd::Closed,
        };
        let text = match next {
            Err(_) => {
                warn!("No ping from relay in {:?}", silence_limit);
                return lost();
            }
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(Message::Close(frame)))) => {
                trace!("Received close frame: {:?}", frame);
                return lost();
            }
            Ok(Some(Ok(other))) => {
                trace!("Ignoring non-text frame ({} bytes)", other.len());
                continue;
            }
            Ok(Some(Err(e))) => {
                error!("Error reading from websocket: {e}");
                return lost();
            }
            Ok(None) => {
                trace!("Websocket stream ended");
                return lost();
            }
        };

        match packet::parse(text.as_str()) {
            Ok(Packet::Ping) => {
                if let Err(e) = link.write(packet::PONG.to_owned()).await {
                    debug!("Failed to answer ping: {e}");
                    return lost();
                }
            }
            Ok(Packet::Event { nsp, payload }) if nsp == link.nsp => {
                debug!("<-- Received event: {} bytes", payload.len());
                if event_tx
                    .send(TransportEvent::MessageReceived(payload.to_owned()))
                    .await
                    .is_err()
                {
                    return LinkEnd::ReceiverGone;
                }
            }
            Ok(Packet::Disconnect { nsp }) if nsp == link.nsp => return LinkEnd::Kicked,
            Ok(Packet::Close) => return lost(),
            Ok(other) => trace!("Ignoring {:?}", other),
            Err(e) => warn!("Malformed packet from relay: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    type ServerWs = WebSocketStream<TcpStream>;

    #[test]
    fn test_frame_size_limit() {
        assert!(check_frame_size(16).is_ok());
        assert!(check_frame_size(FRAME_MAX_SIZE - 1).is_ok());
        assert!(check_frame_size(FRAME_MAX_SIZE).is_err());
    }

    #[test]
    fn test_reconnect_delay_backs_off_to_cap() {
        let policy = ReconnectPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        let delays: Vec<u64> = (0..5).map(|n| policy.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(5));

        let jittered = ReconnectPolicy::default();
        for attempt in 0..10 {
            let delay = jittered.delay(attempt);
            assert!(delay <= jittered.max_delay);
        }
        assert!(jittered.delay(0) >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_dial_failure_is_reported() {
        let factory = SocketIoTransportFactory::new();
        // Port 9 (discard) on localhost is not a websocket endpoint.
        let result = factory.create_transport("http://127.0.0.1:9?uuid=a").await;
        assert!(result.is_err());
        assert!(factory.create_transport("relay.example").await.is_err());
    }

    async fn read_text(ws: &mut ServerWs) -> String {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_owned(),
                Some(Ok(_)) => {}
                other => panic!("client went away: {:?}", other),
            }
        }
    }

    /// Accept one client and run the relay side of the handshake.
    async fn accept_session(listener: &TcpListener, answer: &str) -> ServerWs {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        ws.send(Message::text(
            r#"0{"sid":"eio-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        ))
        .await
        .unwrap();
        assert_eq!(read_text(&mut ws).await, "40");
        ws.send(Message::text(answer.to_owned())).await.unwrap();
        ws
    }

    fn quick_reconnect() -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            jitter: 0.0,
            max_attempts: Some(5),
        }
    }

    #[tokio::test]
    async fn test_events_flow_and_lost_link_is_redialed() {
        let _ = env_logger::builder().is_test(true).try_init();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let relay = tokio::spawn(async move {
            let mut ws = accept_session(&listener, r#"40{"sid":"s-1"}"#).await;
            ws.send(Message::text("2")).await.unwrap();
            assert_eq!(read_text(&mut ws).await, "3");
            ws.send(Message::text(r#"42["incomingCall",{"from":"A","to":"B"}]"#))
                .await
                .unwrap();
            assert_eq!(
                read_text(&mut ws).await,
                r#"42["callAccepted",{"from":"A","to":"B"}]"#
            );
            // Drop the link without a goodbye.
            drop(ws);

            let mut ws = accept_session(&listener, r#"40{"sid":"s-2"}"#).await;
            assert_eq!(read_text(&mut ws).await, r#"42["endCall",{"to":"A"}]"#);
            assert_eq!(read_text(&mut ws).await, "41");
        });

        let factory = SocketIoTransportFactory::new().with_reconnect(quick_reconnect());
        let (transport, mut events) = factory
            .create_transport(&format!("http://{addr}?uuid=B"))
            .await
            .unwrap();

        assert_eq!(events.recv().await, Some(TransportEvent::Connected));
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::MessageReceived(
                r#"["incomingCall",{"from":"A","to":"B"}]"#.into()
            ))
        );
        transport
            .send(r#"["callAccepted",{"from":"A","to":"B"}]"#)
            .await
            .unwrap();

        assert_eq!(events.recv().await, Some(TransportEvent::Disconnected));
        assert_eq!(events.recv().await, Some(TransportEvent::Connected));
        transport.send(r#"["endCall",{"to":"A"}]"#).await.unwrap();

        transport.disconnect().await;
        assert!(transport.send(r#"["endCall",{"to":"A"}]"#).await.is_err());
        assert_eq!(events.recv().await, Some(TransportEvent::Disconnected));
        assert_eq!(events.recv().await, None);
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_handshake_fails_the_dial() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let relay = tokio::spawn(async move {
            let _ws = accept_session(&listener, r#"44{"message":"Not authorized"}"#).await;
        });

        let err = SocketIoTransportFactory::new()
            .create_transport(&format!("ws://{addr}/"))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("Not authorized"));
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_relay_disconnect_is_not_redialed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let relay = tokio::spawn(async move {
            let mut ws = accept_session(&listener, r#"40{"sid":"s-1"}"#).await;
            ws.send(Message::text("41")).await.unwrap();
            // Nobody dials again.
            let redial = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
            assert!(redial.is_err());
        });

        let (_transport, mut events) = SocketIoTransportFactory::new()
            .with_reconnect(quick_reconnect())
            .create_transport(&format!("http://{addr}"))
            .await
            .unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Connected));
        assert_eq!(events.recv().await, Some(TransportEvent::Disconnected));
        assert_eq!(events.recv().await, None);
        relay.await.unwrap();
    }
}
