//! Identity session: everything that lives while one identity is active.
//!
//! Starting a session fetches contacts, dials the relay, wires the signaling
//! dispatch table into the call controller and spawns the controller task.
//! Ending it (explicitly or by dropping it) always runs call cleanup.

use std::sync::Arc;

use log::{info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::calls::media::{MediaEngine, SurfaceWatch};
use crate::calls::{CallController, CallHandle, ControllerInput};
use crate::config::ClientConfig;
use crate::directory::{ContactDirectory, load_contacts};
use crate::signaling::{EventKind, SignalingChannel, relay_url};
use crate::transport::{Transport, TransportFactory};
use crate::types::events::{ContactsLoaded, EventBus, FailureKind, SignalingStatus};
use crate::types::{Contact, Identity};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to signaling relay: {0}")]
    Connect(#[source] anyhow::Error),
}

/// What a session is built from.
pub struct SessionDeps<E: MediaEngine> {
    pub engine: E,
    pub transport_factory: Arc<dyn TransportFactory>,
    pub directory: Arc<dyn ContactDirectory>,
    pub bus: Arc<EventBus>,
}

pub struct IdentitySession {
    identity: Identity,
    contacts: Vec<Contact>,
    handle: CallHandle,
    surfaces: SurfaceWatch,
    bus: Arc<EventBus>,
    transport: Arc<dyn Transport>,
    controller_task: Option<JoinHandle<()>>,
    channel_task: Option<JoinHandle<()>>,
}

impl IdentitySession {
    pub async fn start<E: MediaEngine>(
        identity: Identity,
        config: &ClientConfig,
        deps: SessionDeps<E>,
    ) -> Result<Self, SessionError> {
        let SessionDeps {
            engine,
            transport_factory,
            directory,
            bus,
        } = deps;

        let contacts = load_contacts(directory.as_ref(), &identity).await;
        info!("Loaded {} contacts for {}", contacts.len(), identity);
        EventBus::publish(
            &bus.contacts,
            ContactsLoaded {
                identity: identity.clone(),
                contacts: contacts.clone(),
            },
        );

        let url = relay_url(&config.relay_url, &identity);
        info!("Connecting to signaling relay at {}", url);
        let (transport, events) = match transport_factory.create_transport(&url).await {
            Ok(pair) => pair,
            Err(e) => {
                bus.failure(FailureKind::Transport, e.to_string());
                return Err(SessionError::Connect(e));
            }
        };

        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let mut channel = SignalingChannel::new(transport.clone());
        for kind in EventKind::ALL.into_iter().filter(EventKind::is_inbound) {
            let inputs = inputs_tx.clone();
            channel.subscribe(kind, move |message| {
                let _ = inputs.send(ControllerInput::Signal(message));
            });
        }
        {
            let inputs = inputs_tx.clone();
            let bus = bus.clone();
            channel.on_link(move |status| {
                EventBus::publish(&bus.signaling, status);
                let input = match status {
                    SignalingStatus::Connected => ControllerInput::LinkUp,
                    SignalingStatus::Disconnected => ControllerInput::LinkDown,
                };
                let _ = inputs.send(input);
            });
        }
        let channel = Arc::new(channel);

        let controller = CallController::with_inputs(
            identity.clone(),
            config.call_config(),
            engine,
            channel.clone(),
            bus.clone(),
            inputs_tx,
            inputs_rx,
        );
        let handle = controller.handle();
        let surfaces = controller.surfaces().watch();

        let controller_task = tokio::spawn(controller.run());
        let channel_task = tokio::spawn(channel.run(events));

        Ok(Self {
            identity,
            contacts,
            handle,
            surfaces,
            bus,
            transport,
            controller_task: Some(controller_task),
            channel_task: Some(channel_task),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn handle(&self) -> CallHandle {
        self.handle.clone()
    }

    pub fn surfaces(&self) -> SurfaceWatch {
        self.surfaces.clone()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Clean up any call, stop the controller and close the relay link.
    pub async fn shutdown(mut self) {
        info!("Ending session for {}", self.identity);
        let _ = self.handle.shutdown();
        if let Some(task) = self.controller_task.take()
            && let Err(e) = task.await
        {
            warn!("Call controller task failed: {}", e);
        }
        self.transport.disconnect().await;
        if let Some(task) = self.channel_task.take() {
            task.abort();
        }
    }
}

impl Drop for IdentitySession {
    fn drop(&mut self) {
        // The controller runs cleanup before it exits.
        if self.controller_task.is_some() {
            let _ = self.handle.shutdown();
        }
    }
}
