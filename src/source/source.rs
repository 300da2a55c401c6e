//! Sending-side sequence registry.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, oneshot};
use tracing::{debug, warn};

use crate::core::{RmStore, SequenceFault, StoreError};
use crate::protocol::{Identifier, SequenceAcknowledgement};

use super::sequence::{SequencePolicy, SourceSequence};

/// Resolution of a pending CreateSequence exchange: the granted identifier
/// and lifetime.
pub type CreateResolution = (Identifier, Option<Duration>);

/// A pending CreateSequence exchange awaiting its response.
struct PendingCreate {
    /// Completes when the matching CreateSequenceResponse arrives.
    waiter: oneshot::Sender<CreateResolution>,
    /// Identifier offered for a reverse sequence, if any.
    offer: Option<Identifier>,
}

/// Sending-side role: owns every outbound sequence of one endpoint.
///
/// The registry is an instance owned by the
/// [`RmEndpoint`](crate::endpoint::RmEndpoint); there is no process-wide
/// sequence map. Each sequence carries its own lock so unrelated traffic
/// never serializes.
pub struct Source {
    /// Live sequences keyed by identifier string.
    sequences: RwLock<HashMap<String, Arc<Mutex<SourceSequence>>>>,
    /// CreateSequence exchanges awaiting a response, oldest first.
    pending_creates: Mutex<VecDeque<PendingCreate>>,
    /// Identifier of the sequence new outbound traffic rides on.
    current: Mutex<Option<Identifier>>,
    /// Policy applied to newly created sequences.
    policy: SequencePolicy,
    /// Durable mirror of sequence state.
    store: Arc<dyn RmStore>,
}

impl Source {
    /// Create a source with the given policy and store.
    pub fn new(policy: SequencePolicy, store: Arc<dyn RmStore>) -> Self {
        Self {
            sequences: RwLock::new(HashMap::new()),
            pending_creates: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
            policy,
            store,
        }
    }

    /// Register a pending CreateSequence exchange.
    ///
    /// The returned receiver resolves when the matching
    /// CreateSequenceResponse is dispatched to [`Source::complete_create`].
    pub async fn register_pending_create(
        &self,
        offer: Option<Identifier>,
    ) -> oneshot::Receiver<CreateResolution> {
        let (tx, rx) = oneshot::channel();
        self.pending_creates
            .lock()
            .await
            .push_back(PendingCreate { waiter: tx, offer });
        rx
    }

    /// Bind a CreateSequenceResponse to the oldest pending create.
    ///
    /// Creates and establishes the sequence, mirrors it to the store, and
    /// resolves the waiter. Returns the new sequence and the offer the
    /// original request carried (the caller registers the offered
    /// identifier as an inbound sequence when the response accepted it).
    pub async fn complete_create(
        &self,
        identifier: Identifier,
        expires: Option<Duration>,
    ) -> Result<(Arc<Mutex<SourceSequence>>, Option<Identifier>), SequenceFault> {
        let pending = self.pending_creates.lock().await.pop_front();
        let Some(pending) = pending else {
            // A response nobody asked for is a peer protocol violation.
            warn!(identifier = %identifier, "create response without pending create");
            return Err(SequenceFault::UnknownSequence(identifier));
        };

        let mut sequence = SourceSequence::new(identifier.clone(), self.policy.clone());
        sequence.establish();
        if let Some(lifetime) = expires {
            sequence.set_expiry(lifetime);
        }
        if let Err(e) = self.store.create_source_sequence(&sequence.snapshot()) {
            warn!(identifier = %identifier, error = %e, "store rejected source sequence");
        }

        let arc = Arc::new(Mutex::new(sequence));
        self.sequences
            .write()
            .await
            .insert(identifier.as_str().to_owned(), arc.clone());

        let mut current = self.current.lock().await;
        if current.is_none() {
            *current = Some(identifier.clone());
        }
        drop(current);

        debug!(identifier = %identifier, "source sequence established");
        // The waiter may have given up; the sequence stays usable either way.
        let _ = pending.waiter.send((identifier, expires));
        Ok((arc, pending.offer))
    }

    /// Accept an offer made by this endpoint's peer.
    ///
    /// Creates an established sequence using the offered identifier, bound
    /// to `offered_for` (the inbound sequence the offer arrived on) for
    /// response correlation.
    pub async fn accept_offer(
        &self,
        offered: Identifier,
        offered_for: Identifier,
    ) -> Result<Arc<Mutex<SourceSequence>>, StoreError> {
        let mut sequence =
            SourceSequence::offered(offered.clone(), offered_for, self.policy.clone());
        sequence.establish();
        self.store.create_source_sequence(&sequence.snapshot())?;

        let arc = Arc::new(Mutex::new(sequence));
        self.sequences
            .write()
            .await
            .insert(offered.as_str().to_owned(), arc.clone());
        debug!(identifier = %offered, "offered sequence accepted");
        Ok(arc)
    }

    /// Look up a sequence by identifier.
    pub async fn sequence(&self, identifier: &Identifier) -> Option<Arc<Mutex<SourceSequence>>> {
        self.sequences.read().await.get(identifier.as_str()).cloned()
    }

    /// The sequence new outbound traffic should ride on, if one exists.
    pub async fn current(&self) -> Option<Arc<Mutex<SourceSequence>>> {
        let current = self.current.lock().await.clone();
        match current {
            Some(id) => self.sequence(&id).await,
            None => None,
        }
    }

    /// Update the cached acknowledgement of the matching sequence.
    ///
    /// Returns whether the sequence is now fully acknowledged (closed and
    /// contiguously covered), which makes it eligible for termination.
    pub async fn process_acknowledgement(
        &self,
        ack: &SequenceAcknowledgement,
    ) -> Result<bool, SequenceFault> {
        let sequence = self
            .sequence(ack.identifier())
            .await
            .ok_or_else(|| SequenceFault::UnknownSequence(ack.identifier().clone()))?;
        let mut guard = sequence.lock().await;
        if let Some(highest) = ack.highest() {
            if highest > guard.current_message_number() {
                return Err(SequenceFault::InvalidAcknowledgement {
                    identifier: ack.identifier().clone(),
                    reason: format!(
                        "acknowledged up to {highest} but only {} messages sent",
                        guard.current_message_number()
                    ),
                });
            }
        }
        guard.set_acknowledged(ack.ranges().to_vec());
        debug!(
            identifier = %ack.identifier(),
            ranges = ack.range_count(),
            "acknowledgement processed"
        );
        Ok(guard.all_acknowledged())
    }

    /// Remove a sequence from the registry and the store.
    ///
    /// The sequence object transitions to `Terminated` so stale handles
    /// fault instead of numbering new messages.
    pub async fn remove(&self, identifier: &Identifier) -> Option<Arc<Mutex<SourceSequence>>> {
        let removed = self.sequences.write().await.remove(identifier.as_str());
        if let Some(sequence) = &removed {
            sequence.lock().await.terminate();
            if let Err(e) = self.store.remove_source_sequence(identifier.as_str()) {
                warn!(identifier = %identifier, error = %e, "store removal failed");
            }
            let mut current = self.current.lock().await;
            if current.as_ref() == Some(identifier) {
                *current = None;
            }
        }
        removed
    }

    /// Number of live sequences.
    pub async fn sequence_count(&self) -> usize {
        self.sequences.read().await.len()
    }
}
