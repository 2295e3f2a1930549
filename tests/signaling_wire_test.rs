use async_trait::async_trait;
use peercall::signaling::{
    CallRequest, CandidatePayload, EventKind, SignalingChannel, SignalingError, SignalingMessage,
    relay_url,
};
use peercall::transport::{Transport, TransportEvent};
use peercall::types::events::SignalingStatus;
use peercall::types::{IceCandidate, Identity};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Default)]
struct Capture {
    frames: Mutex<Vec<String>>,
}

#[async_trait]
impl Transport for Capture {
    async fn send(&self, text: &str) -> Result<(), anyhow::Error> {
        self.frames.lock().unwrap().push(text.to_owned());
        Ok(())
    }

    async fn disconnect(&self) {}
}

fn id(s: &str) -> Identity {
    s.parse().unwrap()
}

/// Event arguments as the Socket.IO relay delivers them, one per inbound event.
fn relay_frames() -> Vec<(EventKind, Value)> {
    vec![
        (
            EventKind::IncomingCall,
            json!(["incomingCall", {"from": "A", "to": "B", "fromUsername": "Alice"}]),
        ),
        (
            EventKind::CallAccepted,
            json!(["callAccepted", {"from": "A", "to": "B"}]),
        ),
        (
            EventKind::CallDeclined,
            json!(["callDeclined", {"message": "busy"}]),
        ),
        (
            EventKind::Offer,
            json!(["offer", {"from": "A", "to": "B", "offer": {"type": "offer", "sdp": "v=0\r\n"}}]),
        ),
        (
            EventKind::Answer,
            json!(["answer", {"answer": {"type": "answer", "sdp": "v=0\r\n"}, "to": "A", "from": "B"}]),
        ),
        (
            EventKind::Candidate,
            json!(["candidate", {"candidate": {"candidate": "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host", "sdpMid": "0", "sdpMLineIndex": 0}}]),
        ),
        (EventKind::CallEnded, json!(["callEnded", {}])),
    ]
}

#[test]
fn every_inbound_event_decodes_to_its_kind() {
    for (kind, frame) in relay_frames() {
        let message = SignalingMessage::decode(&frame.to_string()).unwrap();
        assert_eq!(message.kind(), kind, "frame {frame}");
        assert!(kind.is_inbound());
    }
}

#[test]
fn encoded_frames_keep_the_wire_names() {
    for kind in EventKind::ALL {
        assert_eq!(EventKind::from_tag(kind.tag_name()), Some(kind));
    }
    let frame = SignalingMessage::Candidate(CandidatePayload {
        to: Some(id("B")),
        from: Some(id("A")),
        candidate: IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host")
            .with_sdp_mid("0")
            .with_sdp_m_line_index(0),
    })
    .encode()
    .unwrap();
    let v: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(v[0], "candidate");
    assert_eq!(v[1]["to"], "B");
    assert_eq!(v[1]["from"], "A");
    assert_eq!(v[1]["candidate"]["sdpMLineIndex"], 0);
}

#[test]
fn bad_frames_are_reported_not_panicked_on() {
    assert!(matches!(
        SignalingMessage::decode("not json"),
        Err(SignalingError::InvalidFrame(_))
    ));
    assert!(matches!(
        SignalingMessage::decode(r#"[{"event":"offer"}]"#),
        Err(SignalingError::MissingEventName)
    ));
    assert!(matches!(
        SignalingMessage::decode(r#"["ping"]"#),
        Err(SignalingError::UnknownEvent(_))
    ));
    assert!(matches!(
        SignalingMessage::decode(r#"["answer",{"to":"A"}]"#),
        Err(SignalingError::MalformedPayload { .. })
    ));
}

#[test]
fn relay_url_carries_identity() {
    assert_eq!(
        relay_url("wss://relay.example", &id("alice")),
        "wss://relay.example?uuid=alice"
    );
    assert_eq!(
        relay_url("http://localhost:3000/calls?v=2", &id("alice")),
        "http://localhost:3000/calls?v=2&uuid=alice"
    );
}

#[tokio::test]
async fn channel_routes_relay_frames_to_subscribers() {
    let _ = env_logger::builder().is_test(true).try_init();
    let transport = Arc::new(Capture::default());
    let mut channel = SignalingChannel::new(transport.clone());

    let seen: Arc<Mutex<Vec<EventKind>>> = Arc::default();
    for kind in EventKind::ALL.into_iter().filter(EventKind::is_inbound) {
        let seen = seen.clone();
        channel.subscribe(kind, move |message| seen.lock().unwrap().push(message.kind()));
    }
    let links: Arc<Mutex<Vec<SignalingStatus>>> = Arc::default();
    {
        let links = links.clone();
        channel.on_link(move |status| links.lock().unwrap().push(status));
    }
    let channel = Arc::new(channel);

    let (tx, rx) = mpsc::channel(32);
    let pump = tokio::spawn(channel.clone().run(rx));
    tx.send(TransportEvent::Connected).await.unwrap();
    tx.send(TransportEvent::MessageReceived("garbage".into()))
        .await
        .unwrap();
    for (_, frame) in relay_frames() {
        tx.send(TransportEvent::MessageReceived(frame.to_string()))
            .await
            .unwrap();
    }
    drop(tx);
    pump.await.unwrap();

    let expected: Vec<EventKind> = relay_frames().into_iter().map(|(k, _)| k).collect();
    assert_eq!(*seen.lock().unwrap(), expected);
    assert_eq!(
        *links.lock().unwrap(),
        vec![SignalingStatus::Connected, SignalingStatus::Disconnected]
    );

    channel
        .send(&SignalingMessage::CallUser(CallRequest::new(
            id("A"),
            id("B"),
            Some("Alice".into()),
        )))
        .await
        .unwrap();
    let frames = transport.frames.lock().unwrap().clone();
    let v: Value = serde_json::from_str(&frames[0]).unwrap();
    assert_eq!(v, json!(["callUser", {"to": "B", "from": "A", "fromUsername": "Alice"}]));
}
