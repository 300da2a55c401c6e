//! Per-sequence pending-entry sets and the resend scan.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::protocol::{EndpointReference, Identifier, SequenceAcknowledgement};

use super::entry::{PendingEntry, RetransmitProfile};

/// A message due for resend, cloned out of the pending set so the send
/// happens without holding any queue lock.
#[derive(Debug, Clone)]
pub struct ResendCandidate {
    /// Sequence the message belongs to.
    pub identifier: Identifier,
    /// Message number within the sequence.
    pub message_number: u64,
    /// Encoded message bytes.
    pub payload: Vec<u8>,
    /// Resend target address.
    pub target: EndpointReference,
    /// Resends already attempted.
    pub attempts: u32,
}

/// A message whose retry budget ran out.
///
/// Fatal for the message, non-fatal for the sequence: the entry is
/// dropped and reported, the sequence keeps running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Sequence the message belonged to.
    pub identifier: Identifier,
    /// Message number within the sequence.
    pub message_number: u64,
    /// Total send attempts made.
    pub attempts: u32,
}

/// Tracks unacknowledged outbound messages and drives timed resends.
///
/// Pending entries are partitioned per sequence, each partition behind
/// its own lock. The background scan snapshots the partition map and then
/// locks one partition at a time, so it never stalls unrelated sequences.
pub struct RetransmissionQueue {
    /// Pending entries keyed by sequence identifier string.
    entries: RwLock<HashMap<String, Arc<Mutex<Vec<PendingEntry>>>>>,
    /// Timing profile for new entries and backoff.
    profile: RetransmitProfile,
}

impl RetransmissionQueue {
    /// Create a queue with the given timing profile.
    pub fn new(profile: RetransmitProfile) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            profile,
        }
    }

    /// The queue's timing profile.
    pub fn profile(&self) -> &RetransmitProfile {
        &self.profile
    }

    /// Track an unacknowledged outbound message.
    ///
    /// Registering the same message number twice is a no-op; the original
    /// timer keeps running.
    pub async fn register(
        &self,
        identifier: &Identifier,
        message_number: u64,
        payload: Vec<u8>,
        target: EndpointReference,
    ) {
        let partition = self.partition(identifier).await;
        let mut entries = partition.lock().await;
        if entries.iter().any(|e| e.message_number == message_number) {
            return;
        }
        entries.push(PendingEntry::new(
            message_number,
            payload,
            target,
            self.profile.initial_rto,
        ));
        debug!(
            identifier = %identifier,
            message_number,
            pending = entries.len(),
            "message registered for retransmission"
        );
    }

    /// Release every entry covered by an acknowledgement.
    ///
    /// Returns the released message numbers. Reprocessing an
    /// already-applied acknowledgement releases nothing and is not an
    /// error.
    pub async fn process_acknowledgement(&self, ack: &SequenceAcknowledgement) -> Vec<u64> {
        let Some(partition) = self.existing_partition(ack.identifier()).await else {
            return Vec::new();
        };
        let mut entries = partition.lock().await;
        let mut released = Vec::new();
        entries.retain(|entry| {
            if ack.covers(entry.message_number) {
                released.push(entry.message_number);
                false
            } else {
                true
            }
        });
        let now_empty = entries.is_empty();
        drop(entries);
        if now_empty {
            self.drop_partition_if_empty(ack.identifier()).await;
        }
        if !released.is_empty() {
            debug!(
                identifier = %ack.identifier(),
                released = released.len(),
                "acknowledged entries released"
            );
        }
        released
    }

    /// Number of unacknowledged messages for a sequence.
    pub async fn count_unacknowledged(&self, identifier: &Identifier) -> u64 {
        match self.existing_partition(identifier).await {
            Some(partition) => partition.lock().await.len() as u64,
            None => 0,
        }
    }

    /// Entries whose resend timeout has elapsed and whose retry budget
    /// remains, at a given time.
    pub async fn due_at(&self, now: Instant) -> Vec<ResendCandidate> {
        let snapshot = self.snapshot().await;
        let mut due = Vec::new();
        for (identifier, partition) in snapshot {
            let entries = partition.lock().await;
            for entry in entries.iter() {
                if entry.needs_resend_at(now) && !entry.exhausted(&self.profile) {
                    due.push(ResendCandidate {
                        identifier: Identifier::new(identifier.clone()),
                        message_number: entry.message_number,
                        payload: entry.payload.clone(),
                        target: entry.target.clone(),
                        attempts: entry.retransmit_count,
                    });
                }
            }
        }
        due
    }

    /// Record that a candidate was resent, applying backoff.
    pub async fn mark_retransmitted(
        &self,
        identifier: &Identifier,
        message_number: u64,
        now: Instant,
    ) {
        let Some(partition) = self.existing_partition(identifier).await else {
            return;
        };
        let mut entries = partition.lock().await;
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.message_number == message_number)
        {
            entry.retransmitted_at(now, &self.profile);
        }
    }

    /// Remove and report every entry whose retry budget is spent.
    pub async fn drain_exhausted(&self) -> Vec<DeliveryFailure> {
        let snapshot = self.snapshot().await;
        let mut failures = Vec::new();
        for (identifier, partition) in snapshot {
            let mut entries = partition.lock().await;
            entries.retain(|entry| {
                if entry.exhausted(&self.profile) {
                    failures.push(DeliveryFailure {
                        identifier: Identifier::new(identifier.clone()),
                        message_number: entry.message_number,
                        // The initial send plus every resend.
                        attempts: entry.retransmit_count + 1,
                    });
                    false
                } else {
                    true
                }
            });
        }
        for failure in &failures {
            warn!(
                identifier = %failure.identifier,
                message_number = failure.message_number,
                attempts = failure.attempts,
                "delivery failed, retry budget exhausted"
            );
        }
        failures
    }

    /// Drop every pending entry of a sequence (terminate/abandon).
    ///
    /// Returns how many entries were cancelled. No resend happens after
    /// cancellation.
    pub async fn cancel_sequence(&self, identifier: &Identifier) -> usize {
        let removed = self.entries.write().await.remove(identifier.as_str());
        match removed {
            Some(partition) => {
                let count = partition.lock().await.len();
                if count > 0 {
                    debug!(identifier = %identifier, cancelled = count, "pending resends cancelled");
                }
                count
            }
            None => 0,
        }
    }

    /// Whether any sequence has pending entries.
    pub async fn has_pending(&self) -> bool {
        let snapshot = self.snapshot().await;
        for (_, partition) in snapshot {
            if !partition.lock().await.is_empty() {
                return true;
            }
        }
        false
    }

    /// Partition for a sequence, created on first use.
    async fn partition(&self, identifier: &Identifier) -> Arc<Mutex<Vec<PendingEntry>>> {
        if let Some(existing) = self.existing_partition(identifier).await {
            return existing;
        }
        self.entries
            .write()
            .await
            .entry(identifier.as_str().to_owned())
            .or_default()
            .clone()
    }

    async fn existing_partition(
        &self,
        identifier: &Identifier,
    ) -> Option<Arc<Mutex<Vec<PendingEntry>>>> {
        self.entries.read().await.get(identifier.as_str()).cloned()
    }

    async fn drop_partition_if_empty(&self, identifier: &Identifier) {
        let mut entries = self.entries.write().await;
        if let Some(partition) = entries.get(identifier.as_str()) {
            if partition.lock().await.is_empty() {
                entries.remove(identifier.as_str());
            }
        }
    }

    /// Snapshot of the partition map; locks are taken per partition
    /// afterwards, never while holding the map lock for the whole scan.
    async fn snapshot(&self) -> Vec<(String, Arc<Mutex<Vec<PendingEntry>>>)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl Default for RetransmissionQueue {
    fn default() -> Self {
        Self::new(RetransmitProfile::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn queue() -> RetransmissionQueue {
        RetransmissionQueue::new(RetransmitProfile {
            initial_rto: Duration::from_millis(100),
            max_rto: Duration::from_millis(400),
            backoff_multiplier: 2,
            max_retransmits: 2,
        })
    }

    fn target() -> EndpointReference {
        EndpointReference::new("http://example.org/app")
    }

    #[tokio::test]
    async fn test_register_and_count() {
        let q = queue();
        let id = Identifier::new("urn:test:s1");
        q.register(&id, 1, b"m1".to_vec(), target()).await;
        q.register(&id, 2, b"m2".to_vec(), target()).await;
        // Duplicate registration is a no-op.
        q.register(&id, 2, b"m2".to_vec(), target()).await;
        assert_eq!(q.count_unacknowledged(&id).await, 2);
        assert!(q.has_pending().await);
    }

    #[tokio::test]
    async fn test_acknowledged_entry_is_not_resent() {
        let q = queue();
        let id = Identifier::new("urn:test:s1");
        q.register(&id, 7, b"m7".to_vec(), target()).await;

        let mut ack = SequenceAcknowledgement::new(id.clone());
        ack.insert(7);
        assert_eq!(q.process_acknowledgement(&ack).await, vec![7]);

        // Even far past the RTO, the next scan finds nothing.
        let later = Instant::now() + Duration::from_secs(3600);
        assert!(q.due_at(later).await.is_empty());
        assert_eq!(q.count_unacknowledged(&id).await, 0);
    }

    #[tokio::test]
    async fn test_reprocessing_acknowledgement_is_noop() {
        let q = queue();
        let id = Identifier::new("urn:test:s1");
        q.register(&id, 1, b"m1".to_vec(), target()).await;

        let mut ack = SequenceAcknowledgement::new(id.clone());
        ack.insert(1);
        assert_eq!(q.process_acknowledgement(&ack).await, vec![1]);
        assert!(q.process_acknowledgement(&ack).await.is_empty());
    }

    #[tokio::test]
    async fn test_partial_acknowledgement_keeps_gaps() {
        let q = queue();
        let id = Identifier::new("urn:test:s1");
        for n in 1..=4 {
            q.register(&id, n, vec![n as u8], target()).await;
        }
        let mut ack = SequenceAcknowledgement::new(id.clone());
        ack.insert(1);
        ack.insert(2);
        ack.insert(4);
        let mut released = q.process_acknowledgement(&ack).await;
        released.sort_unstable();
        assert_eq!(released, vec![1, 2, 4]);
        assert_eq!(q.count_unacknowledged(&id).await, 1);
    }

    #[tokio::test]
    async fn test_due_respects_rto_and_backoff() {
        let q = queue();
        let id = Identifier::new("urn:test:s1");
        q.register(&id, 1, b"m1".to_vec(), target()).await;
        let start = Instant::now();

        assert!(q.due_at(start).await.is_empty());

        let due = q.due_at(start + Duration::from_millis(150)).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].message_number, 1);
        assert_eq!(due[0].attempts, 0);

        let resend_time = start + Duration::from_millis(150);
        q.mark_retransmitted(&id, 1, resend_time).await;

        // Backed off to 200ms: not due again until then.
        assert!(q.due_at(resend_time + Duration::from_millis(150)).await.is_empty());
        assert_eq!(q.due_at(resend_time + Duration::from_millis(250)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_entries_are_drained_once() {
        let q = queue();
        let id = Identifier::new("urn:test:s1");
        q.register(&id, 1, b"m1".to_vec(), target()).await;
        let now = Instant::now();
        q.mark_retransmitted(&id, 1, now).await;
        q.mark_retransmitted(&id, 1, now).await;

        // Budget of 2 resends spent: no longer due, reported once.
        assert!(q.due_at(now + Duration::from_secs(3600)).await.is_empty());
        let failures = q.drain_exhausted().await;
        assert_eq!(
            failures,
            vec![DeliveryFailure {
                identifier: id.clone(),
                message_number: 1,
                attempts: 3,
            }]
        );
        assert!(q.drain_exhausted().await.is_empty());
        assert_eq!(q.count_unacknowledged(&id).await, 0);
    }

    #[tokio::test]
    async fn test_cancel_sequence_drops_everything() {
        let q = queue();
        let id = Identifier::new("urn:test:s1");
        let other = Identifier::new("urn:test:s2");
        q.register(&id, 1, b"m1".to_vec(), target()).await;
        q.register(&id, 2, b"m2".to_vec(), target()).await;
        q.register(&other, 1, b"m1".to_vec(), target()).await;

        assert_eq!(q.cancel_sequence(&id).await, 2);
        assert_eq!(q.count_unacknowledged(&id).await, 0);
        assert_eq!(q.count_unacknowledged(&other).await, 1);

        let later = Instant::now() + Duration::from_secs(3600);
        let due = q.due_at(later).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].identifier, other);
    }
}
