//! Receiving-side sequence registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::core::{RmStore, SequenceFault, StoreError};
use crate::protocol::{
    EndpointReference, Identifier, SequenceAcknowledgement, SequenceType,
};

use super::sequence::{AcknowledgeOutcome, DestinationSequence};

/// Receiving-side role: owns every inbound sequence of one endpoint.
///
/// Like [`Source`](crate::source::Source), the registry is an instance
/// owned by the endpoint; no process-wide state, one lock per sequence.
pub struct Destination {
    /// Live sequences keyed by identifier string.
    sequences: RwLock<HashMap<String, Arc<Mutex<DestinationSequence>>>>,
    /// Durable mirror of sequence state.
    store: Arc<dyn RmStore>,
}

impl Destination {
    /// Create a destination backed by the given store.
    pub fn new(store: Arc<dyn RmStore>) -> Self {
        Self {
            sequences: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Accept a CreateSequence request.
    ///
    /// Allocates a fresh identifier, registers the sequence, and mirrors
    /// it to the store. A store failure aborts the create so the peer
    /// receives a CreateSequenceRefused fault instead of a sequence that
    /// would not survive recovery.
    pub async fn create_sequence(
        &self,
        acks_to: EndpointReference,
        expires: Option<Duration>,
        correlation_id: Option<String>,
    ) -> Result<Identifier, StoreError> {
        let identifier = Identifier::generate();
        let mut sequence = DestinationSequence::new(identifier.clone(), acks_to);
        if let Some(lifetime) = expires {
            sequence.set_expiry(lifetime);
        }
        if let Some(correlation) = correlation_id {
            sequence.set_correlation_id(correlation);
        }
        self.store.create_destination_sequence(&sequence.snapshot())?;
        sequence.establish();

        self.sequences
            .write()
            .await
            .insert(identifier.as_str().to_owned(), Arc::new(Mutex::new(sequence)));
        debug!(identifier = %identifier, "destination sequence created");
        Ok(identifier)
    }

    /// Register a sequence offered by this endpoint and accepted by the
    /// peer, using the offered identifier.
    pub async fn register_offered(
        &self,
        identifier: Identifier,
        acks_to: EndpointReference,
    ) -> Result<(), StoreError> {
        let mut sequence = DestinationSequence::new(identifier.clone(), acks_to);
        self.store.create_destination_sequence(&sequence.snapshot())?;
        sequence.establish();
        self.sequences
            .write()
            .await
            .insert(identifier.as_str().to_owned(), Arc::new(Mutex::new(sequence)));
        debug!(identifier = %identifier, "offered sequence registered");
        Ok(())
    }

    /// Accept an inbound application message (the hot path).
    ///
    /// An unknown identifier faults and MUST NOT create a phantom entry.
    pub async fn acknowledge(
        &self,
        sequence_type: &SequenceType,
        reply_to: Option<&EndpointReference>,
    ) -> Result<AcknowledgeOutcome, SequenceFault> {
        let sequence = self
            .sequence(&sequence_type.identifier)
            .await
            .ok_or_else(|| SequenceFault::UnknownSequence(sequence_type.identifier.clone()))?;
        let mut guard = sequence.lock().await;
        let outcome = guard.acknowledge(
            sequence_type.message_number,
            sequence_type.last_message,
            reply_to,
        )?;
        debug!(
            identifier = %sequence_type.identifier,
            message_number = sequence_type.message_number,
            duplicate = outcome.duplicate,
            "message acknowledged"
        );
        Ok(outcome)
    }

    /// Current acknowledgement for a sequence, for AckRequested replies.
    ///
    /// Always returns the full current state, whether or not anything
    /// changed since the last acknowledgement was sent.
    pub async fn acknowledgement_for(
        &self,
        identifier: &Identifier,
    ) -> Result<SequenceAcknowledgement, SequenceFault> {
        let sequence = self
            .sequence(identifier)
            .await
            .ok_or_else(|| SequenceFault::UnknownSequence(identifier.clone()))?;
        let guard = sequence.lock().await;
        Ok(guard.acknowledgement().clone())
    }

    /// Acknowledgements eligible to piggyback on a message to `target`.
    pub async fn acknowledgements_for_target(
        &self,
        target: &EndpointReference,
    ) -> Vec<SequenceAcknowledgement> {
        let sequences: Vec<_> = self.sequences.read().await.values().cloned().collect();
        let mut acks = Vec::new();
        for sequence in sequences {
            let guard = sequence.lock().await;
            if guard.acks_to() == target && !guard.acknowledgement().is_empty() {
                acks.push(guard.acknowledgement().clone());
            }
        }
        acks
    }

    /// Terminate a sequence: remove it from the registry and the store.
    ///
    /// Subsequent acknowledges against the identifier fault.
    pub async fn terminate(&self, identifier: &Identifier) -> Result<(), SequenceFault> {
        let removed = self.sequences.write().await.remove(identifier.as_str());
        let Some(sequence) = removed else {
            return Err(SequenceFault::UnknownSequence(identifier.clone()));
        };
        let mut guard = sequence.lock().await;
        guard.begin_terminating();
        guard.terminate();
        drop(guard);
        if let Err(e) = self.store.remove_destination_sequence(identifier.as_str()) {
            warn!(identifier = %identifier, error = %e, "store removal failed");
        }
        debug!(identifier = %identifier, "destination sequence terminated");
        Ok(())
    }

    /// Look up a sequence by identifier.
    pub async fn sequence(
        &self,
        identifier: &Identifier,
    ) -> Option<Arc<Mutex<DestinationSequence>>> {
        self.sequences.read().await.get(identifier.as_str()).cloned()
    }

    /// Find the sequence created by a given exchange, if any.
    pub async fn find_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Option<Arc<Mutex<DestinationSequence>>> {
        let sequences: Vec<_> = self.sequences.read().await.values().cloned().collect();
        for sequence in sequences {
            if sequence.lock().await.correlation_id() == Some(correlation_id) {
                return Some(sequence);
            }
        }
        None
    }

    /// Number of live sequences.
    pub async fn sequence_count(&self) -> usize {
        self.sequences.read().await.len()
    }
}
