//! Durable store implementations.
//!
//! The [`RmStore`](crate::core::RmStore) collaborator mirrors sequence
//! lifecycle events to persistent storage so sequences can be recovered
//! after a restart. [`NullStore`] keeps everything purely in memory;
//! [`InMemoryStore`] is the reference implementation used in tests.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::core::{RmStore, StoreError};
use crate::protocol::{AckRange, EndpointReference, Identifier};

/// Durable snapshot of a source sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSequenceRecord {
    /// Sequence identifier.
    pub identifier: Identifier,
    /// Number of the most recently allocated message.
    pub current_message_number: u64,
    /// Whether the last message has been numbered.
    pub last_message: bool,
    /// Ranges the destination has acknowledged.
    pub acknowledged: Vec<AckRange>,
}

/// Durable snapshot of a destination sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationSequenceRecord {
    /// Sequence identifier.
    pub identifier: Identifier,
    /// Address acknowledgements are sent to.
    pub acks_to: EndpointReference,
    /// Message numbers received so far.
    pub acknowledged: Vec<AckRange>,
    /// Final message number, if known.
    pub last_message_number: Option<u64>,
}

/// Store that persists nothing.
///
/// Valid wherever durability is not required; every operation succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl RmStore for NullStore {
    fn create_source_sequence(&self, _record: &SourceSequenceRecord) -> Result<(), StoreError> {
        Ok(())
    }

    fn remove_source_sequence(&self, _identifier: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn create_destination_sequence(
        &self,
        _record: &DestinationSequenceRecord,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    fn remove_destination_sequence(&self, _identifier: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Hash-map-backed store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    source: Mutex<HashMap<String, SourceSequenceRecord>>,
    destination: Mutex<HashMap<String, DestinationSequenceRecord>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored source sequences.
    pub fn source_count(&self) -> usize {
        self.source.lock().expect("store lock poisoned").len()
    }

    /// Number of stored destination sequences.
    pub fn destination_count(&self) -> usize {
        self.destination.lock().expect("store lock poisoned").len()
    }

    /// Stored source record for an identifier, if present.
    pub fn source_record(&self, identifier: &str) -> Option<SourceSequenceRecord> {
        self.source
            .lock()
            .expect("store lock poisoned")
            .get(identifier)
            .cloned()
    }

    /// Stored destination record for an identifier, if present.
    pub fn destination_record(&self, identifier: &str) -> Option<DestinationSequenceRecord> {
        self.destination
            .lock()
            .expect("store lock poisoned")
            .get(identifier)
            .cloned()
    }
}

impl RmStore for InMemoryStore {
    fn create_source_sequence(&self, record: &SourceSequenceRecord) -> Result<(), StoreError> {
        self.source
            .lock()
            .expect("store lock poisoned")
            .insert(record.identifier.as_str().to_owned(), record.clone());
        Ok(())
    }

    fn remove_source_sequence(&self, identifier: &str) -> Result<(), StoreError> {
        self.source
            .lock()
            .expect("store lock poisoned")
            .remove(identifier);
        Ok(())
    }

    fn create_destination_sequence(
        &self,
        record: &DestinationSequenceRecord,
    ) -> Result<(), StoreError> {
        self.destination
            .lock()
            .expect("store lock poisoned")
            .insert(record.identifier.as_str().to_owned(), record.clone());
        Ok(())
    }

    fn remove_destination_sequence(&self, identifier: &str) -> Result<(), StoreError> {
        self.destination
            .lock()
            .expect("store lock poisoned")
            .remove(identifier);
        Ok(())
    }
}
