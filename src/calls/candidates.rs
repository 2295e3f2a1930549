//! ICE candidate buffer.
//!
//! Remote candidates can only be applied once the remote description is set.
//! Until then they are queued here and applied in arrival order when the
//! negotiator drains the buffer. One buffer belongs to one call.

use super::media::{MediaError, PeerConnection};
use crate::types::IceCandidate;
use log::{debug, warn};
use std::collections::VecDeque;

/// What happened to a single remote candidate.
#[derive(Debug)]
pub enum CandidateOutcome {
    Applied,
    Queued,
    /// The connection refused it. The call goes on without it.
    Rejected(MediaError),
}

/// Result of draining the buffer.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub applied: usize,
    pub failures: Vec<MediaError>,
}

#[derive(Debug, Default)]
pub struct CandidateBuffer {
    queue: VecDeque<IceCandidate>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, candidate: IceCandidate) {
        self.queue.push_back(candidate);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Apply `candidate` now if the remote description is set, queue it otherwise.
    ///
    /// A candidate never overtakes queued ones: if anything is still queued
    /// while the remote description is already set, it goes to the back of
    /// the queue and the whole queue is drained.
    pub async fn try_apply_or_queue<C>(
        &mut self,
        candidate: IceCandidate,
        connection: &C,
    ) -> CandidateOutcome
    where
        C: PeerConnection + ?Sized,
    {
        if !connection.has_remote_description().await {
            debug!("Queueing ICE candidate ({} pending)", self.queue.len() + 1);
            self.enqueue(candidate);
            return CandidateOutcome::Queued;
        }

        if !self.queue.is_empty() {
            self.enqueue(candidate);
            let mut report = self.drain(connection).await;
            return match report.failures.pop() {
                Some(e) => CandidateOutcome::Rejected(e),
                None => CandidateOutcome::Applied,
            };
        }

        match connection.add_ice_candidate(candidate).await {
            Ok(()) => CandidateOutcome::Applied,
            Err(e) => {
                warn!("Failed to apply ICE candidate: {}", e);
                CandidateOutcome::Rejected(e)
            }
        }
    }

    /// Apply every queued candidate in FIFO order, one at a time.
    ///
    /// A candidate that fails is dropped and draining continues. The buffer
    /// is empty afterwards.
    pub async fn drain<C>(&mut self, connection: &C) -> DrainReport
    where
        C: PeerConnection + ?Sized,
    {
        let mut report = DrainReport::default();
        while let Some(candidate) = self.queue.pop_front() {
            match connection.add_ice_candidate(candidate).await {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    warn!("Dropping queued ICE candidate: {}", e);
                    report.failures.push(e);
                }
            }
        }
        if report.applied + report.failures.len() > 0 {
            debug!(
                "Drained ICE candidates: {} applied, {} dropped",
                report.applied,
                report.failures.len()
            );
        }
        report
    }

    /// Hand over everything still queued, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<IceCandidate> {
        self.queue.drain(..).collect()
    }

    /// Throw away everything queued.
    pub fn discard(&mut self) {
        if !self.queue.is_empty() {
            debug!("Discarding {} queued ICE candidates", self.queue.len());
            self.queue.clear();
        }
    }
}
