//! Call lifecycle controller.
//!
//! One task owns every piece of call state: the phase, the single
//! [`Negotiator`] (and with it the peer connection), early ICE candidates and
//! the surfaces. Signaling messages, engine callbacks and user commands all
//! arrive as [`ControllerInput`]s on one channel and are handled in order.
//!
//! Engine steps are awaited in place. While a step is in flight the
//! controller keeps reading its input: ordinary input is deferred until the
//! step finishes, while input that tears the call down abandons the step so
//! a hung negotiation can always be cleaned up. `end_this_call` only asks the
//! peer to hang up, so it waits for the step like any other input.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use super::candidates::{CandidateOutcome, DrainReport};
use super::error::CallError;
use super::media::{
    ConnectionState, MediaConstraints, MediaEngine, MediaSurfaces, PeerEvent, PeerEvents,
    RtcConfiguration,
};
use super::negotiator::{Negotiator, Role};
use super::state::{CallPhase, NegotiationState, PhaseTransition};
use crate::signaling::{
    AnswerPayload, CallDeclined, CallRequest, CandidatePayload, EndCallPayload, OfferPayload,
    SignalingChannel, SignalingMessage,
};
use crate::types::events::{
    CallPhaseChanged, DeclineNotice, EventBus, FailureKind, IncomingCall, NegotiationStateChanged,
};
use crate::types::{Contact, IceCandidate, Identity};

/// Remote candidates kept while no call exists.
const EARLY_CANDIDATE_LIMIT: usize = 64;
const BUSY_MESSAGE: &str = "busy";
const DECLINED_MESSAGE: &str = "declined";

/// User intent from the presentation layer.
#[derive(Debug, Clone)]
pub enum CallCommand {
    CallUser(Contact),
    /// Ask the remote side to end the call.
    EndThisCall,
    /// Tear the call down locally.
    EndCall,
    AcceptIncoming,
    DeclineIncoming,
    Shutdown,
}

#[derive(Debug)]
pub enum ControllerInput {
    Signal(SignalingMessage),
    /// Engine callback for the negotiator created as `generation`.
    Peer {
        generation: u64,
        event: PeerEvent,
    },
    Command(CallCommand),
    LinkUp,
    LinkDown,
}

impl ControllerInput {
    /// Input that abandons an in-flight engine step.
    fn interrupts_step(&self) -> bool {
        matches!(
            self,
            Self::Command(CallCommand::EndCall | CallCommand::Shutdown)
                | Self::Signal(SignalingMessage::CallEnded(_))
                | Self::LinkDown
        )
    }
}

#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Accept `incomingCall` without asking the presentation layer.
    pub auto_accept: bool,
    /// Sent as `fromUsername`; the identity is used when unset.
    pub display_name: Option<String>,
    pub rtc: RtcConfiguration,
    pub media: MediaConstraints,
    /// Upper bound for a single engine step. `None` waits forever.
    pub step_timeout: Option<Duration>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            auto_accept: true,
            display_name: None,
            rtc: RtcConfiguration::default(),
            media: MediaConstraints::default(),
            step_timeout: None,
        }
    }
}

/// Cloneable handle the presentation layer drives the controller with.
#[derive(Debug, Clone)]
pub struct CallHandle {
    inputs: mpsc::UnboundedSender<ControllerInput>,
}

impl CallHandle {
    fn command(&self, command: CallCommand) -> Result<(), CallError> {
        self.inputs
            .send(ControllerInput::Command(command))
            .map_err(|_| CallError::ControllerStopped)
    }

    pub fn call_user(&self, contact: Contact) -> Result<(), CallError> {
        self.command(CallCommand::CallUser(contact))
    }

    pub fn end_this_call(&self) -> Result<(), CallError> {
        self.command(CallCommand::EndThisCall)
    }

    pub fn end_call(&self) -> Result<(), CallError> {
        self.command(CallCommand::EndCall)
    }

    pub fn accept_incoming(&self) -> Result<(), CallError> {
        self.command(CallCommand::AcceptIncoming)
    }

    pub fn decline_incoming(&self) -> Result<(), CallError> {
        self.command(CallCommand::DeclineIncoming)
    }

    pub fn shutdown(&self) -> Result<(), CallError> {
        self.command(CallCommand::Shutdown)
    }
}

/// Await `step`, reading input meanwhile.
///
/// Returns `None` if input arrived that ends the call; that input is deferred
/// behind everything that came before it so it is handled next, in order.
async fn guard_step<T, F>(
    inputs: &mut mpsc::UnboundedReceiver<ControllerInput>,
    deferred: &mut VecDeque<ControllerInput>,
    step: F,
) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::pin!(step);
    loop {
        tokio::select! {
            biased;
            result = &mut step => return Some(result),
            input = inputs.recv() => {
                let input = input?;
                let interrupts = input.interrupts_step();
                deferred.push_back(input);
                if interrupts {
                    return None;
                }
            }
        }
    }
}

pub struct CallController<E: MediaEngine> {
    identity: Identity,
    config: CallConfig,
    engine: E,
    channel: Arc<SignalingChannel>,
    bus: Arc<EventBus>,
    surfaces: MediaSurfaces,
    phase: CallPhase,
    negotiator: Option<Negotiator<E>>,
    /// Bumped for every negotiator; engine events carry the value they were
    /// created with.
    generation: u64,
    early_candidates: VecDeque<(Option<Identity>, IceCandidate)>,
    /// An `incomingCall` waiting for accept/decline.
    pending_incoming: Option<CallRequest>,
    inputs_tx: mpsc::UnboundedSender<ControllerInput>,
    inputs: mpsc::UnboundedReceiver<ControllerInput>,
    deferred: VecDeque<ControllerInput>,
}

impl<E: MediaEngine> CallController<E> {
    pub fn new(
        identity: Identity,
        config: CallConfig,
        engine: E,
        channel: Arc<SignalingChannel>,
        bus: Arc<EventBus>,
    ) -> Self {
        let (inputs_tx, inputs) = mpsc::unbounded_channel();
        Self::with_inputs(identity, config, engine, channel, bus, inputs_tx, inputs)
    }

    /// Build around an input channel created beforehand, so signaling
    /// handlers can hold a sender before the channel is shared.
    pub fn with_inputs(
        identity: Identity,
        config: CallConfig,
        engine: E,
        channel: Arc<SignalingChannel>,
        bus: Arc<EventBus>,
        inputs_tx: mpsc::UnboundedSender<ControllerInput>,
        inputs: mpsc::UnboundedReceiver<ControllerInput>,
    ) -> Self {
        Self {
            identity,
            config,
            engine,
            channel,
            bus,
            surfaces: MediaSurfaces::new(),
            phase: CallPhase::NoCall,
            negotiator: None,
            generation: 0,
            early_candidates: VecDeque::new(),
            pending_incoming: None,
            inputs_tx,
            inputs,
            deferred: VecDeque::new(),
        }
    }

    pub fn handle(&self) -> CallHandle {
        CallHandle {
            inputs: self.inputs_tx.clone(),
        }
    }

    /// Raw input sender, for wiring signaling into the controller.
    pub fn input_sender(&self) -> mpsc::UnboundedSender<ControllerInput> {
        self.inputs_tx.clone()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn surfaces(&self) -> &MediaSurfaces {
        &self.surfaces
    }

    pub fn phase(&self) -> &CallPhase {
        &self.phase
    }

    pub fn negotiation_state(&self) -> Option<NegotiationState> {
        self.negotiator.as_ref().map(|n| n.state())
    }

    /// Remote party of the live negotiation, once its description arrived.
    pub fn remote_party(&self) -> Option<&Identity> {
        self.negotiator.as_ref().and_then(|n| n.remote_party())
    }

    pub fn has_connection(&self) -> bool {
        self.negotiator.as_ref().is_some_and(|n| n.has_connection())
    }

    pub fn pending_candidates(&self) -> usize {
        self.negotiator
            .as_ref()
            .map_or(0, |n| n.pending_candidates())
    }

    pub fn early_candidates(&self) -> usize {
        self.early_candidates.len()
    }

    /// Process input until shutdown. Cleanup runs on the way out.
    pub async fn run(mut self) {
        info!("Call controller for {} started", self.identity);
        loop {
            let input = match self.deferred.pop_front() {
                Some(input) => input,
                None => match self.inputs.recv().await {
                    Some(input) => input,
                    None => break,
                },
            };
            if !self.handle_input(input).await {
                break;
            }
        }
        self.cleanup().await;
        info!("Call controller for {} stopped", self.identity);
    }

    /// Handle whatever is queued right now without waiting for more.
    #[cfg(test)]
    pub(crate) async fn process_queued(&mut self) -> bool {
        loop {
            let input = match self.deferred.pop_front() {
                Some(input) => input,
                None => match self.inputs.try_recv() {
                    Ok(input) => input,
                    Err(_) => return true,
                },
            };
            if !self.handle_input(input).await {
                return false;
            }
        }
    }

    /// Handle one input. Returns `false` once the controller should stop.
    pub async fn handle_input(&mut self, input: ControllerInput) -> bool {
        match input {
            ControllerInput::Signal(message) => self.handle_signal(message).await,
            ControllerInput::Peer { generation, event } => {
                self.handle_peer_event(generation, event).await
            }
            ControllerInput::Command(CallCommand::Shutdown) => {
                info!("Shutdown requested");
                self.cleanup().await;
                return false;
            }
            ControllerInput::Command(command) => self.handle_command(command).await,
            ControllerInput::LinkUp => debug!("Signaling link up"),
            ControllerInput::LinkDown => self.handle_link_down().await,
        }
        true
    }

    async fn handle_signal(&mut self, message: SignalingMessage) {
        match message {
            SignalingMessage::IncomingCall(request) => self.on_incoming_call(request).await,
            SignalingMessage::CallAccepted(request) => self.on_call_accepted(request).await,
            SignalingMessage::CallDeclined(declined) => self.on_call_declined(declined).await,
            SignalingMessage::Offer(offer) => self.on_offer(offer).await,
            SignalingMessage::Answer(answer) => self.on_answer(answer).await,
            SignalingMessage::Candidate(candidate) => self.on_candidate(candidate).await,
            SignalingMessage::CallEnded(_) => {
                info!("Remote side ended the call");
                self.cleanup().await;
            }
            other @ (SignalingMessage::CallUser(_) | SignalingMessage::EndCall(_)) => {
                warn!("Ignoring {} from the relay", other.kind());
            }
        }
    }

    async fn handle_command(&mut self, command: CallCommand) {
        match command {
            CallCommand::CallUser(contact) => self.call_user(contact).await,
            CallCommand::EndThisCall => self.end_this_call().await,
            CallCommand::EndCall => {
                info!("Ending call");
                self.cleanup().await;
            }
            CallCommand::AcceptIncoming => self.accept_incoming().await,
            CallCommand::DeclineIncoming => self.decline_incoming().await,
            CallCommand::Shutdown => {}
        }
    }

    async fn handle_link_down(&mut self) {
        if self.negotiator.is_some() || !self.phase.is_idle() {
            warn!("Signaling link lost during a call, cleaning up");
            self.bus
                .failure(FailureKind::Transport, "signaling link lost during call");
        }
        self.cleanup().await;
    }

    // Commands

    async fn call_user(&mut self, contact: Contact) {
        if contact.identity == self.identity {
            warn!("Refusing to call ourselves");
            return;
        }
        if let Some(peer) = self.phase.peer() {
            warn!("{}", CallError::Busy(peer.clone()));
            return;
        }

        let from_username = self
            .config
            .display_name
            .clone()
            .unwrap_or_else(|| self.identity.to_string());
        let request = CallRequest::new(
            self.identity.clone(),
            contact.identity.clone(),
            Some(from_username),
        );
        info!("Calling {} ({})", contact.display_name, contact.identity);
        if self.send(SignalingMessage::CallUser(request)).await {
            self.transition_phase(PhaseTransition::Dial(contact.identity));
        }
    }

    async fn end_this_call(&mut self) {
        let to = self
            .negotiator
            .as_ref()
            .map(|n| n.remote_party().unwrap_or(n.target()).clone())
            .or_else(|| self.phase.peer().cloned());
        let Some(to) = to else {
            warn!("Cannot end call: {}", CallError::NoActiveCall);
            return;
        };
        info!("Asking {} to end the call", to);
        self.send(SignalingMessage::EndCall(EndCallPayload { to }))
            .await;
    }

    async fn accept_incoming(&mut self) {
        let Some(request) = self.pending_incoming.take() else {
            warn!("No incoming call to accept");
            return;
        };
        info!("Accepting call from {}", request.from);
        self.send(SignalingMessage::CallAccepted(request)).await;
    }

    async fn decline_incoming(&mut self) {
        let Some(request) = self.pending_incoming.take() else {
            warn!("No incoming call to decline");
            return;
        };
        info!("Declining call from {}", request.from);
        self.send(SignalingMessage::CallDeclined(CallDeclined::for_request(
            &request,
            DECLINED_MESSAGE,
        )))
        .await;
        self.cleanup().await;
    }

    // Signaling

    async fn on_incoming_call(&mut self, request: CallRequest) {
        let caller = request.from.clone();
        if caller == self.identity {
            debug!("Ignoring incomingCall from ourselves");
            return;
        }

        if self.phase.is_idle() && self.negotiator.is_none() {
            info!("Incoming call from {}", caller);
            self.transition_phase(PhaseTransition::Ring(caller.clone()));
            EventBus::publish(
                &self.bus.incoming_call,
                IncomingCall {
                    from: caller,
                    from_display_name: request.from_username.clone(),
                    auto_accepted: self.config.auto_accept,
                },
            );
            if self.config.auto_accept {
                self.send(SignalingMessage::CallAccepted(request)).await;
            } else {
                self.pending_incoming = Some(request);
            }
        } else if matches!(&self.phase, CallPhase::RingingOut { callee } if *callee == caller) {
            // Both sides called each other; accepting lets the offer glare
            // rule pick who negotiates.
            info!("{} called us while we were calling them, accepting", caller);
            self.send(SignalingMessage::CallAccepted(request)).await;
        } else if self.phase.peer() == Some(&caller) {
            debug!("Duplicate incomingCall from {}", caller);
        } else {
            info!("Busy, declining call from {}", caller);
            self.send(SignalingMessage::CallDeclined(CallDeclined::for_request(
                &request,
                BUSY_MESSAGE,
            )))
            .await;
        }
    }

    async fn on_call_accepted(&mut self, request: CallRequest) {
        let remote = request.counterpart(&self.identity).clone();
        if let Some(negotiator) = &self.negotiator {
            if *negotiator.target() == remote {
                debug!("Duplicate callAccepted from {}", remote);
            } else {
                warn!(
                    "Rejecting callAccepted from {} while in a call with {}",
                    remote,
                    negotiator.target()
                );
            }
            return;
        }
        if !matches!(&self.phase, CallPhase::RingingOut { callee } if *callee == remote) {
            warn!("Ignoring unsolicited callAccepted from {}", remote);
            return;
        }

        info!("{} accepted our call", remote);
        self.start_offerer(remote).await;
    }

    async fn on_call_declined(&mut self, declined: CallDeclined) {
        if !matches!(self.phase, CallPhase::RingingOut { .. }) || self.negotiator.is_some() {
            warn!("Ignoring callDeclined outside of an outgoing call");
            return;
        }
        // Declines without the echoed request are taken as meant for us.
        if let (Some(by), Some(callee)) = (declined.declined_by(), self.phase.peer()) {
            if by != callee.as_str() {
                warn!("Ignoring callDeclined from {} while ringing {}", by, callee);
                return;
            }
        }
        info!(
            "Call declined: {}",
            declined.message.as_deref().unwrap_or("no reason given")
        );
        EventBus::publish(
            &self.bus.call_declined,
            DeclineNotice {
                message: declined.message,
            },
        );
        self.cleanup().await;
    }

    async fn on_offer(&mut self, payload: OfferPayload) {
        let from = payload.from.clone();
        if from == self.identity {
            debug!("Ignoring offer from ourselves");
            return;
        }

        if let Some(negotiator) = self.negotiator.as_mut() {
            if *negotiator.target() != from {
                warn!(
                    "Rejecting offer from {} while in a call with {}",
                    from,
                    negotiator.target()
                );
                return;
            }
            let glare = negotiator.role() == Role::Offerer && !negotiator.state().is_established();
            if !glare {
                debug!("Ignoring repeated offer from {}", from);
                return;
            }
            // Offer glare: the smaller identity yields and answers.
            if self.identity > from {
                info!("Offer glare with {}, keeping our offer", from);
                return;
            }
            info!("Offer glare with {}, answering theirs", from);
            let carried = negotiator.take_pending_candidates();
            self.teardown_negotiator().await;
            self.early_candidates
                .extend(carried.into_iter().map(|c| (Some(from.clone()), c)));
        } else {
            let allowed = match &self.phase {
                CallPhase::NoCall => self.config.auto_accept,
                CallPhase::Incoming { caller } => {
                    *caller == from && self.pending_incoming.is_none()
                }
                CallPhase::RingingOut { callee } => *callee == from,
                CallPhase::InCall { .. } => false,
            };
            if !allowed {
                warn!("Rejecting unsolicited offer from {}", from);
                return;
            }
        }

        self.start_answerer(from, payload).await;
    }

    async fn on_answer(&mut self, payload: AnswerPayload) {
        let from = payload.from;
        let Some(negotiator) = self.negotiator.as_mut() else {
            warn!("Ignoring answer from {}: no call in progress", from);
            return;
        };
        if *negotiator.target() != from {
            warn!(
                "Rejecting answer from {} while in a call with {}",
                from,
                negotiator.target()
            );
            return;
        }
        if negotiator.role() != Role::Offerer || negotiator.state() != NegotiationState::OfferSent
        {
            debug!("Ignoring repeated answer from {}", from);
            return;
        }

        let step = negotiator.accept_answer(from.clone(), payload.answer);
        match guard_step(&mut self.inputs, &mut self.deferred, step).await {
            None => debug!("Applying the answer from {} was abandoned", from),
            Some(Ok(report)) => {
                self.report_drain(report);
                info!("Call with {} established", from);
                self.publish_negotiation();
            }
            Some(Err(e)) => self.report(&e),
        }
    }

    async fn on_candidate(&mut self, payload: CandidatePayload) {
        let origin = payload.from;
        if let Some(negotiator) = self.negotiator.as_mut() {
            if let Some(origin) = &origin
                && origin != negotiator.target()
            {
                warn!("Dropping ICE candidate from {}, not in a call with them", origin);
                return;
            }
            let step = negotiator.add_remote_candidate(payload.candidate);
            if let Some(CandidateOutcome::Rejected(e)) =
                guard_step(&mut self.inputs, &mut self.deferred, step).await
            {
                self.bus.failure(FailureKind::Candidate, e.to_string());
            }
            return;
        }

        if self.early_candidates.len() >= EARLY_CANDIDATE_LIMIT {
            warn!("Too many ICE candidates before any call, dropping the oldest");
            self.early_candidates.pop_front();
        }
        debug!("Holding ICE candidate until a call starts");
        self.early_candidates.push_back((origin, payload.candidate));
    }

    // Engine callbacks

    async fn handle_peer_event(&mut self, generation: u64, event: PeerEvent) {
        let Some(negotiator) = self.negotiator.as_ref() else {
            debug!("Discarding {:?}: no call in progress", event);
            return;
        };
        if generation != self.generation {
            debug!("Discarding {:?} from an earlier connection", event);
            return;
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let to = negotiator.target().clone();
                self.send(SignalingMessage::Candidate(CandidatePayload {
                    to: Some(to),
                    from: Some(self.identity.clone()),
                    candidate,
                }))
                .await;
            }
            PeerEvent::RemoteStream(stream) => {
                info!("Remote stream {} arrived", stream.id);
                self.surfaces.remote.bind(stream);
            }
            PeerEvent::StateChanged(ConnectionState::Failed) => {
                warn!("Connection to {} failed", negotiator.target());
            }
            PeerEvent::StateChanged(state) => {
                debug!("Connection to {} is {:?}", negotiator.target(), state);
            }
        }
    }

    // Negotiation

    fn peer_events(&self, generation: u64) -> PeerEvents {
        let inputs = self.inputs_tx.clone();
        PeerEvents::new(move |event| {
            let _ = inputs.send(ControllerInput::Peer { generation, event });
        })
    }

    /// Drop early candidates from anyone but `remote` and return the rest.
    fn take_early_candidates(&mut self, remote: &Identity) -> Vec<IceCandidate> {
        self.early_candidates
            .drain(..)
            .filter(|(origin, _)| origin.as_ref().is_none_or(|o| o == remote))
            .map(|(_, candidate)| candidate)
            .collect()
    }

    /// Install a fresh negotiator for `remote` and open it.
    /// Returns `false` if the call did not get past setup.
    async fn begin_negotiation(&mut self, remote: Identity, role: Role) -> bool {
        if self.negotiator.is_some() {
            self.teardown_negotiator().await;
        }
        if !matches!(&self.phase, CallPhase::InCall { remote: r } if *r == remote) {
            self.transition_phase(PhaseTransition::Connect(remote.clone()));
        }

        self.generation += 1;
        let events = self.peer_events(self.generation);
        let mut negotiator = Negotiator::new(remote.clone(), role, self.config.step_timeout);
        negotiator.preload(self.take_early_candidates(&remote));
        let negotiator = self.negotiator.insert(negotiator);

        let step = negotiator.open(
            &self.engine,
            &self.config.rtc,
            &self.config.media,
            events,
            &self.surfaces,
        );
        match guard_step(&mut self.inputs, &mut self.deferred, step).await {
            None => {
                debug!("Call setup with {} was abandoned", remote);
                false
            }
            Some(Ok(())) => {
                self.publish_negotiation();
                true
            }
            Some(Err(e)) => {
                self.report(&e);
                self.cleanup().await;
                false
            }
        }
    }

    async fn start_offerer(&mut self, remote: Identity) {
        if !self.begin_negotiation(remote.clone(), Role::Offerer).await {
            return;
        }
        let Some(negotiator) = self.negotiator.as_mut() else {
            return;
        };

        let step = negotiator.send_offer(&self.channel, &self.identity);
        match guard_step(&mut self.inputs, &mut self.deferred, step).await {
            None => debug!("Offer to {} was abandoned", remote),
            Some(Ok(())) => {
                info!("Offer sent to {}", remote);
                self.publish_negotiation();
            }
            Some(Err(e)) => self.report(&e),
        }
    }

    async fn start_answerer(&mut self, from: Identity, payload: OfferPayload) {
        self.pending_incoming = None;
        if !self.begin_negotiation(from.clone(), Role::Answerer).await {
            return;
        }
        let Some(negotiator) = self.negotiator.as_mut() else {
            return;
        };

        let step = negotiator.answer_offer(payload.offer, &self.channel, &self.identity);
        match guard_step(&mut self.inputs, &mut self.deferred, step).await {
            None => debug!("Answering {} was abandoned", from),
            Some(Ok(report)) => {
                self.report_drain(report);
                info!("Answered {}, call established", from);
                self.publish_negotiation();
            }
            Some(Err(e)) => self.report(&e),
        }
    }

    // Cleanup

    /// Close the connection and stop local capture, leaving the phase alone.
    async fn teardown_negotiator(&mut self) {
        if let Some(mut negotiator) = self.negotiator.take() {
            negotiator.close().await;
            EventBus::publish(
                &self.bus.negotiation,
                NegotiationStateChanged {
                    remote: negotiator.target().clone(),
                    state: negotiator.state(),
                    at: Utc::now(),
                },
            );
        }
        self.surfaces.clear();
    }

    /// Release everything the call holds and return to `NoCall`.
    /// Does nothing observable when there is no call.
    pub async fn cleanup(&mut self) {
        let had_call = self.negotiator.is_some() || !self.phase.is_idle();
        self.teardown_negotiator().await;
        self.early_candidates.clear();
        self.pending_incoming = None;
        self.transition_phase(PhaseTransition::Reset);
        if had_call {
            info!("Call cleaned up");
        }
    }

    // Helpers

    fn transition_phase(&mut self, transition: PhaseTransition) {
        match self.phase.apply(transition) {
            Ok(next) if next != self.phase => {
                debug!("Call phase {:?} -> {:?}", self.phase, next);
                self.phase = next;
                EventBus::publish(
                    &self.bus.call_phase,
                    CallPhaseChanged {
                        phase: self.phase.clone(),
                        at: Utc::now(),
                    },
                );
            }
            Ok(_) => {}
            Err(e) => warn!("{}", e),
        }
    }

    fn publish_negotiation(&self) {
        if let Some(negotiator) = &self.negotiator {
            EventBus::publish(
                &self.bus.negotiation,
                NegotiationStateChanged {
                    remote: negotiator.target().clone(),
                    state: negotiator.state(),
                    at: Utc::now(),
                },
            );
        }
    }

    fn report(&self, err: &CallError) {
        error!("{}", err);
        self.bus.failure(err.failure_kind(), err.to_string());
    }

    fn report_drain(&self, report: DrainReport) {
        for failure in report.failures {
            self.bus.failure(FailureKind::Candidate, failure.to_string());
        }
    }

    /// Send `message`, reporting a failure. Returns whether it went out.
    async fn send(&self, message: SignalingMessage) -> bool {
        match self.channel.send(&message).await {
            Ok(()) => true,
            Err(e) => {
                let err = CallError::from(e);
                error!("Failed to send {}: {}", message.kind(), err);
                self.bus.failure(err.failure_kind(), err.to_string());
                false
            }
        }
    }
}
