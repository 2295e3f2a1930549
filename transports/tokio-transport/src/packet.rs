//! Engine.IO v4 text packets and the Socket.IO v5 packets inside them.
//!
//! Only what a websocket-only client needs: the `open` handshake, ping/pong,
//! close, and the Socket.IO CONNECT, DISCONNECT and EVENT packets.

use anyhow::anyhow;
use serde::Deserialize;
use std::time::Duration;

pub const PONG: &str = "3";

const ENGINE_IO_PATH: &str = "/socket.io/";
const ENGINE_IO_QUERY: &str = "EIO=4&transport=websocket";
const DEFAULT_NAMESPACE: &str = "/";

/// Payload of the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    pub ping_interval: u64,
    pub ping_timeout: u64,
}

impl OpenInfo {
    /// How long the server may stay silent before the link counts as lost.
    pub fn silence_limit(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet<'a> {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Connect { nsp: &'a str },
    Disconnect { nsp: &'a str },
    /// `payload` is the JSON array `["name", ...args]`.
    Event { nsp: &'a str, payload: &'a str },
    ConnectError { nsp: &'a str, reason: &'a str },
    /// Packets a websocket client has no use for (upgrade, noop, binary, acks).
    Other(&'a str),
}

pub fn parse(frame: &str) -> Result<Packet<'_>, anyhow::Error> {
    let mut chars = frame.chars();
    let packet = match chars.next() {
        Some('0') => Packet::Open(
            serde_json::from_str(&frame[1..]).map_err(|e| anyhow!("bad open packet: {}", e))?,
        ),
        Some('1') => Packet::Close,
        Some('2') => Packet::Ping,
        Some('3') => Packet::Pong,
        Some('4') => parse_socket_packet(&frame[1..])?,
        Some(_) => Packet::Other(frame),
        None => return Err(anyhow!("empty packet")),
    };
    Ok(packet)
}

fn parse_socket_packet(packet: &str) -> Result<Packet<'_>, anyhow::Error> {
    let Some(kind) = packet.chars().next() else {
        return Err(anyhow!("empty socket.io packet"));
    };
    let (nsp, data) = split_namespace(&packet[kind.len_utf8()..]);
    Ok(match kind {
        '0' => Packet::Connect { nsp },
        '1' => Packet::Disconnect { nsp },
        '2' => {
            // An ack id may sit between the namespace and the arguments.
            let payload = data.trim_start_matches(|c: char| c.is_ascii_digit());
            if !payload.starts_with('[') {
                return Err(anyhow!("event without arguments: {}", packet));
            }
            Packet::Event { nsp, payload }
        }
        '4' => Packet::ConnectError { nsp, reason: data },
        _ => Packet::Other(packet),
    })
}

fn split_namespace(rest: &str) -> (&str, &str) {
    if !rest.starts_with('/') {
        return (DEFAULT_NAMESPACE, rest);
    }
    match rest.find(',') {
        Some(i) => (&rest[..i], &rest[i + 1..]),
        None => (rest, ""),
    }
}

fn with_namespace(kind: &str, nsp: &str, data: &str) -> String {
    if nsp == DEFAULT_NAMESPACE {
        format!("4{kind}{data}")
    } else {
        format!("4{kind}{nsp},{data}")
    }
}

pub fn connect_frame(nsp: &str) -> String {
    with_namespace("0", nsp, "")
}

pub fn disconnect_frame(nsp: &str) -> String {
    with_namespace("1", nsp, "")
}

pub fn event_frame(nsp: &str, payload: &str) -> String {
    with_namespace("2", nsp, payload)
}

/// Where to open the websocket and which namespace to join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub nsp: String,
}

/// Resolve a relay URL the way socket.io clients read it: the path names
/// the namespace and the query travels with the handshake.
pub fn endpoint(relay_url: &str) -> Result<Endpoint, anyhow::Error> {
    let (scheme, rest) = relay_url
        .split_once("://")
        .ok_or_else(|| anyhow!("relay URL has no scheme: {}", relay_url))?;
    let scheme = match scheme {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(anyhow!("unsupported relay scheme: {}", other)),
    };
    let (location, query) = match rest.split_once('?') {
        Some((location, query)) => (location, Some(query)),
        None => (rest, None),
    };
    let (host, path) = match location.split_once('/') {
        Some((host, path)) => (host, path.trim_matches('/')),
        None => (location, ""),
    };
    if host.is_empty() {
        return Err(anyhow!("relay URL has no host: {}", relay_url));
    }

    let nsp = if path.is_empty() || path == "socket.io" {
        DEFAULT_NAMESPACE.to_string()
    } else {
        format!("/{path}")
    };
    let mut url = format!("{scheme}://{host}{ENGINE_IO_PATH}?{ENGINE_IO_QUERY}");
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('&');
        url.push_str(query);
    }
    Ok(Endpoint { url, nsp })
}
