//! Signaling transport adapter.
//!
//! Wraps a raw text transport with a typed dispatch table: handlers are
//! subscribed per [`EventKind`] before the channel starts pumping, and every
//! decoded frame is handed to the handlers of its kind.

use super::error::SignalingError;
use super::event::EventKind;
use super::message::SignalingMessage;
use crate::transport::{Transport, TransportEvent};
use crate::types::events::SignalingStatus;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

type SignalHandler = Box<dyn Fn(SignalingMessage) + Send + Sync>;
type LinkHandler = Box<dyn Fn(SignalingStatus) + Send + Sync>;

pub struct SignalingChannel {
    transport: Arc<dyn Transport>,
    handlers: HashMap<EventKind, Vec<SignalHandler>>,
    link_handlers: Vec<LinkHandler>,
}

impl SignalingChannel {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            handlers: HashMap::new(),
            link_handlers: Vec::new(),
        }
    }

    /// Register `handler` for every inbound message of `kind`.
    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F)
    where
        F: Fn(SignalingMessage) + Send + Sync + 'static,
    {
        if !kind.is_inbound() {
            warn!("Subscribing to {kind}, which the relay never delivers");
        }
        self.handlers
            .entry(kind)
            .or_default()
            .push(Box::new(handler));
    }

    /// Register `handler` for link status changes.
    pub fn on_link<F>(&mut self, handler: F)
    where
        F: Fn(SignalingStatus) + Send + Sync + 'static,
    {
        self.link_handlers.push(Box::new(handler));
    }

    pub async fn send(&self, message: &SignalingMessage) -> Result<(), SignalingError> {
        let frame = message.encode()?;
        debug!("--> {}", message.kind());
        self.transport.send(&frame).await?;
        Ok(())
    }

    /// Decode one frame and run the handlers for its kind.
    /// Returns how many handlers ran.
    pub fn dispatch_frame(&self, frame: &str) -> usize {
        let message = match SignalingMessage::decode(frame) {
            Ok(m) => m,
            Err(SignalingError::UnknownEvent(name)) => {
                debug!("Ignoring unknown signaling event '{name}'");
                return 0;
            }
            Err(e) => {
                warn!("Dropping signaling frame: {e}");
                return 0;
            }
        };

        let kind = message.kind();
        debug!("<-- {kind}");
        let Some(handlers) = self.handlers.get(&kind) else {
            debug!("No subscriber for {kind}");
            return 0;
        };
        for handler in handlers {
            handler(message.clone());
        }
        handlers.len()
    }

    fn notify_link(&self, status: SignalingStatus) {
        for handler in &self.link_handlers {
            handler(status);
        }
    }

    /// Pump transport events until the transport goes away.
    ///
    /// A closed event stream counts as a disconnect even if the transport
    /// never said so.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        let mut reported_disconnect = false;
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected => {
                    info!("Signaling link up");
                    reported_disconnect = false;
                    self.notify_link(SignalingStatus::Connected);
                }
                TransportEvent::MessageReceived(frame) => {
                    self.dispatch_frame(&frame);
                }
                TransportEvent::Disconnected => {
                    warn!("Signaling link lost");
                    reported_disconnect = true;
                    self.notify_link(SignalingStatus::Disconnected);
                }
            }
        }
        if !reported_disconnect {
            warn!("Signaling event stream closed");
            self.notify_link(SignalingStatus::Disconnected);
        }
    }

    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
    }
}
