//! Session negotiator.
//!
//! Owns the single peer connection of a call together with the local
//! capture, the candidate buffer and the negotiation state. The controller
//! decides when a negotiator exists; the negotiator runs the offerer or
//! answerer protocol on it.

use super::candidates::{CandidateBuffer, CandidateOutcome, DrainReport};
use super::error::CallError;
use super::media::{
    LocalStream, MediaConstraints, MediaEngine, MediaError, MediaSurfaces, PeerConnection,
    PeerEvents, RtcConfiguration,
};
use super::state::{InvalidTransition, NegotiationState, NegotiationTransition};
use crate::signaling::{AnswerPayload, OfferPayload, SignalingChannel, SignalingMessage};
use crate::types::{IceCandidate, Identity, SessionDescription};
use log::{debug, warn};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

/// Run one engine step, failing it with [`MediaError::Timeout`] if `limit`
/// elapses first.
async fn bounded<T, F>(limit: Option<Duration>, step: &'static str, fut: F) -> Result<T, MediaError>
where
    F: Future<Output = Result<T, MediaError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| MediaError::Timeout(step))?,
        None => fut.await,
    }
}

pub struct Negotiator<E: MediaEngine> {
    /// Who this connection is for.
    target: Identity,
    /// Set once the remote side's description has been received.
    remote_party: Option<Identity>,
    role: Role,
    state: NegotiationState,
    connection: Option<E::Connection>,
    local_stream: Option<E::Stream>,
    candidates: CandidateBuffer,
    step_timeout: Option<Duration>,
}

impl<E: MediaEngine> Negotiator<E> {
    pub fn new(target: Identity, role: Role, step_timeout: Option<Duration>) -> Self {
        Self {
            target,
            remote_party: None,
            role,
            state: NegotiationState::Idle,
            connection: None,
            local_stream: None,
            candidates: CandidateBuffer::new(),
            step_timeout,
        }
    }

    pub fn target(&self) -> &Identity {
        &self.target
    }

    pub fn remote_party(&self) -> Option<&Identity> {
        self.remote_party.as_ref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn pending_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Queue candidates that arrived before this negotiator existed.
    pub fn preload(&mut self, candidates: impl IntoIterator<Item = IceCandidate>) {
        for candidate in candidates {
            self.candidates.enqueue(candidate);
        }
    }

    /// Hand over candidates still waiting for a remote description.
    pub fn take_pending_candidates(&mut self) -> Vec<IceCandidate> {
        self.candidates.take()
    }

    /// Create the peer connection, capture local media, show it on the
    /// local surface and add its tracks to the connection.
    ///
    /// Resources are stored as soon as they exist, so [`close`](Self::close)
    /// releases them even if this step fails or is abandoned half way.
    pub async fn open(
        &mut self,
        engine: &E,
        rtc: &RtcConfiguration,
        constraints: &MediaConstraints,
        events: PeerEvents,
        surfaces: &MediaSurfaces,
    ) -> Result<(), CallError> {
        let next = self.state.apply(NegotiationTransition::Open)?;
        let limit = self.step_timeout;

        let connection = bounded(
            limit,
            "peer connection creation",
            engine.create_peer_connection(rtc, events),
        )
        .await
        .map_err(CallError::Setup)?;
        let connection = self.connection.insert(connection);

        let stream = bounded(
            limit,
            "local media capture",
            engine.capture_local_media(constraints),
        )
        .await
        .map_err(CallError::Setup)?;
        surfaces.local.bind(stream.info());
        let stream = self.local_stream.insert(stream);

        bounded(
            limit,
            "attaching local media",
            engine.attach_local_stream(connection, stream),
        )
        .await
        .map_err(CallError::Setup)?;

        self.state = next;
        debug!("Negotiator for {} opened as {:?}", self.target, self.role);
        Ok(())
    }

    /// Offerer: create the offer, make it the local description and send it.
    pub async fn send_offer(
        &mut self,
        channel: &SignalingChannel,
        local: &Identity,
    ) -> Result<(), CallError> {
        let next = self.state.apply(NegotiationTransition::OfferSent)?;
        let limit = self.step_timeout;
        let connection = self.connection.as_ref().ok_or(CallError::NoActiveCall)?;

        let offer = bounded(limit, "offer creation", connection.create_offer())
            .await
            .map_err(CallError::Negotiation)?;
        bounded(
            limit,
            "setting local description",
            connection.set_local_description(offer.clone()),
        )
        .await
        .map_err(CallError::Negotiation)?;

        channel
            .send(&SignalingMessage::Offer(OfferPayload {
                from: local.clone(),
                to: self.target.clone(),
                offer,
            }))
            .await?;
        self.state = next;
        Ok(())
    }

    /// Offerer: apply the answer from `from`, then drain the candidate buffer.
    ///
    /// A rejected answer leaves the negotiator in `OfferSent`.
    pub async fn accept_answer(
        &mut self,
        from: Identity,
        answer: SessionDescription,
    ) -> Result<DrainReport, CallError> {
        if self.state != NegotiationState::OfferSent {
            return Err(InvalidTransition::new(self.state, "AcceptAnswer").into());
        }
        let limit = self.step_timeout;
        let connection = self.connection.as_ref().ok_or(CallError::NoActiveCall)?;

        bounded(
            limit,
            "setting remote description",
            connection.set_remote_description(answer),
        )
        .await
        .map_err(CallError::Negotiation)?;
        self.remote_party = Some(from);

        let report = self.candidates.drain(connection).await;
        self.state = self.state.apply(NegotiationTransition::Establish {
            pending_candidates: self.candidates.len(),
        })?;
        Ok(report)
    }

    /// Answerer: apply the offer, drain the candidate buffer, then create,
    /// set and send the answer.
    pub async fn answer_offer(
        &mut self,
        offer: SessionDescription,
        channel: &SignalingChannel,
        local: &Identity,
    ) -> Result<DrainReport, CallError> {
        let answered = self.state.apply(NegotiationTransition::AnswerSent)?;
        let limit = self.step_timeout;
        let connection = self.connection.as_ref().ok_or(CallError::NoActiveCall)?;

        bounded(
            limit,
            "setting remote description",
            connection.set_remote_description(offer),
        )
        .await
        .map_err(CallError::Negotiation)?;
        self.remote_party = Some(self.target.clone());

        let report = self.candidates.drain(connection).await;

        let answer = bounded(limit, "answer creation", connection.create_answer())
            .await
            .map_err(CallError::Negotiation)?;
        bounded(
            limit,
            "setting local description",
            connection.set_local_description(answer.clone()),
        )
        .await
        .map_err(CallError::Negotiation)?;

        channel
            .send(&SignalingMessage::Answer(AnswerPayload {
                answer,
                to: self.target.clone(),
                from: local.clone(),
            }))
            .await?;
        self.state = answered;
        self.state = self.state.apply(NegotiationTransition::Establish {
            pending_candidates: self.candidates.len(),
        })?;
        Ok(report)
    }

    /// Apply a remote candidate now or keep it for the next drain.
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> CandidateOutcome {
        match self.connection.as_ref() {
            Some(connection) => self.candidates.try_apply_or_queue(candidate, connection).await,
            None => {
                self.candidates.enqueue(candidate);
                CandidateOutcome::Queued
            }
        }
    }

    /// Stop local capture, close the connection and drop queued candidates.
    /// Safe to call more than once.
    pub async fn close(&mut self) {
        self.candidates.discard();
        if let Some(stream) = self.local_stream.take() {
            stream.stop().await;
        }
        if let Some(connection) = self.connection.take()
            && let Err(e) = bounded(self.step_timeout, "closing connection", connection.close()).await
        {
            warn!("Failed to close connection to {}: {}", self.target, e);
        }
        if let Ok(next) = self.state.apply(NegotiationTransition::Close) {
            self.state = next;
        }
        self.remote_party = None;
    }
}
