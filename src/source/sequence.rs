//! Per-sequence state for the sending side.

use std::time::{Duration, Instant};

use crate::core::SequenceFault;
use crate::core::constants::MAX_MESSAGE_NUMBER;
use crate::protocol::{
    AckRange, EndpointReference, Identifier, SequenceAcknowledgement, SequenceType,
};

/// Default cap on unacknowledged messages before a sequence self-closes.
pub const DEFAULT_MAX_UNACKNOWLEDGED: u64 = 64;

/// Source-side sequence lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// CreateSequence sent (or offered), awaiting establishment.
    Requested,
    /// Sequence is live and numbering messages.
    Established,
    /// Last message sent, awaiting full acknowledgement.
    Closing,
    /// Sequence terminated; no further use permitted.
    Terminated,
}

/// Limits that force a sequence to self-terminate.
///
/// Any limit left unset means "unbounded". Reaching a limit marks the next
/// allocated message as the sequence's last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequencePolicy {
    /// Maximum messages in one sequence.
    pub max_sequence_length: Option<u64>,
    /// Maximum disjoint acknowledgement ranges tolerated (too many gaps).
    pub max_ack_ranges: Option<usize>,
    /// Maximum unacknowledged messages in flight.
    pub max_unacknowledged: Option<u64>,
    /// Sequence lifetime from establishment.
    pub expiry: Option<Duration>,
}

impl SequencePolicy {
    /// Policy with every limit unset.
    pub fn unlimited() -> Self {
        Self::default()
    }
}

/// Sending-side state of one sequence.
///
/// Owned exclusively by one [`Source`](super::Source); the registry wraps
/// each instance in its own lock, so the struct itself stays lock-free
/// and directly testable.
#[derive(Debug, Clone)]
pub struct SourceSequence {
    /// Sequence identifier.
    identifier: Identifier,
    /// Number of the most recently allocated message (0 before the first).
    current_message_number: u64,
    /// Whether the last message of this sequence has been numbered.
    last_message: bool,
    /// Ranges the destination has acknowledged, as last reported.
    acknowledgement: SequenceAcknowledgement,
    /// Hard expiry deadline, if the sequence has a bounded lifetime.
    expires_at: Option<Instant>,
    /// Inbound sequence this one was offered into, for response sequences.
    offered_for: Option<Identifier>,
    /// First non-anonymous peer address observed; used for out-of-band sends.
    target: Option<EndpointReference>,
    /// Termination policy limits.
    policy: SequencePolicy,
    /// Lifecycle state.
    state: SourceState,
}

impl SourceSequence {
    /// Create a sequence in the `Requested` state.
    pub fn new(identifier: Identifier, policy: SequencePolicy) -> Self {
        Self {
            acknowledgement: SequenceAcknowledgement::new(identifier.clone()),
            identifier,
            current_message_number: 0,
            last_message: false,
            expires_at: None,
            offered_for: None,
            target: None,
            policy,
            state: SourceState::Requested,
        }
    }

    /// Create a sequence that was offered into an inbound sequence.
    ///
    /// Responses correlated to the final message of `offered_for` close
    /// this sequence.
    pub fn offered(identifier: Identifier, offered_for: Identifier, policy: SequencePolicy) -> Self {
        let mut seq = Self::new(identifier, policy);
        seq.offered_for = Some(offered_for);
        seq
    }

    /// Transition to `Established` once the create exchange completed.
    pub fn establish(&mut self) {
        if self.state == SourceState::Requested {
            self.state = SourceState::Established;
            if let Some(lifetime) = self.policy.expiry {
                self.expires_at = Some(Instant::now() + lifetime);
            }
        }
    }

    /// Allocate the next message number.
    ///
    /// `correlated` is the inbound sequence header this outbound message
    /// responds to, if any; `unacked` is the current unacknowledged count
    /// reported by the retransmission queue. Both feed the last-message
    /// check evaluated after the increment.
    ///
    /// # Panics
    ///
    /// Panics if the last message has already been numbered. Callers must
    /// stop allocating once a sequence is closed; continuing is a contract
    /// violation, not a recoverable condition.
    pub fn next_message_number(
        &mut self,
        correlated: Option<&SequenceType>,
        unacked: u64,
    ) -> Result<u64, SequenceFault> {
        assert!(
            !self.last_message,
            "message number requested after last message on {}",
            self.identifier
        );
        if self.state == SourceState::Terminated {
            return Err(SequenceFault::SequenceTerminated(self.identifier.clone()));
        }
        if self.is_expired() {
            return Err(SequenceFault::SequenceExpired(self.identifier.clone()));
        }
        if self.current_message_number >= MAX_MESSAGE_NUMBER {
            return Err(SequenceFault::MessageNumberRollover(self.identifier.clone()));
        }

        self.current_message_number += 1;
        self.check_last_message(correlated, unacked);
        if self.last_message {
            self.state = SourceState::Closing;
        }
        Ok(self.current_message_number)
    }

    /// Allocate a number and build the sequence header in one step.
    pub fn next_message(
        &mut self,
        correlated: Option<&SequenceType>,
        unacked: u64,
    ) -> Result<SequenceType, SequenceFault> {
        let message_number = self.next_message_number(correlated, unacked)?;
        Ok(SequenceType {
            identifier: self.identifier.clone(),
            message_number,
            last_message: self.last_message,
        })
    }

    /// Evaluate whether the message just numbered must be the last.
    fn check_last_message(&mut self, correlated: Option<&SequenceType>, unacked: u64) {
        if let Some(inbound) = correlated {
            if inbound.last_message && self.offered_for.as_ref() == Some(&inbound.identifier) {
                self.last_message = true;
                return;
            }
        }
        let policy = &self.policy;
        let length_reached = policy
            .max_sequence_length
            .is_some_and(|max| self.current_message_number >= max);
        let too_many_gaps = policy
            .max_ack_ranges
            .is_some_and(|max| self.acknowledgement.range_count() > max);
        // The message being numbered counts against the in-flight cap.
        let too_many_unacked = policy
            .max_unacknowledged
            .is_some_and(|max| unacked.saturating_add(1) >= max);
        if length_reached || too_many_gaps || too_many_unacked {
            self.last_message = true;
        }
    }

    /// Replace the cached acknowledgement with ranges from the peer.
    ///
    /// Reprocessing an already-seen acknowledgement is a no-op.
    pub fn set_acknowledged(&mut self, ranges: Vec<AckRange>) {
        self.acknowledgement =
            SequenceAcknowledgement::with_ranges(self.identifier.clone(), ranges);
    }

    /// Whether the sequence is closed and every message is acknowledged.
    ///
    /// True only for full contiguous coverage: the last message is set and
    /// the acknowledgement is the single range `[1, current]`.
    pub fn all_acknowledged(&self) -> bool {
        self.last_message && self.acknowledgement.covers_through(self.current_message_number)
    }

    /// Record the peer address for out-of-band sends.
    ///
    /// Only the first non-anonymous address observed is kept.
    pub fn observe_target(&mut self, address: &EndpointReference) {
        if self.target.is_none() && !address.is_anonymous() {
            self.target = Some(address.clone());
        }
    }

    /// Mark the sequence terminated.
    pub fn terminate(&mut self) {
        self.state = SourceState::Terminated;
    }

    /// Whether the expiry deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Whether the expiry deadline has passed at a given time.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now > deadline)
    }

    /// Override the expiry deadline (e.g. granted by the destination).
    pub fn set_expiry(&mut self, lifetime: Duration) {
        self.expires_at = Some(Instant::now() + lifetime);
    }

    /// Sequence identifier.
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Number of the most recently allocated message.
    pub fn current_message_number(&self) -> u64 {
        self.current_message_number
    }

    /// Whether the last message has been numbered.
    pub fn is_last_message(&self) -> bool {
        self.last_message
    }

    /// Cached acknowledgement state.
    pub fn acknowledgement(&self) -> &SequenceAcknowledgement {
        &self.acknowledgement
    }

    /// Inbound sequence this one was offered into, if any.
    pub fn offered_for(&self) -> Option<&Identifier> {
        self.offered_for.as_ref()
    }

    /// Peer address for out-of-band sends, if one was ever observed.
    pub fn target(&self) -> Option<&EndpointReference> {
        self.target.as_ref()
    }

    /// Lifecycle state.
    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Snapshot for the durable store.
    pub fn snapshot(&self) -> crate::store::SourceSequenceRecord {
        crate::store::SourceSequenceRecord {
            identifier: self.identifier.clone(),
            current_message_number: self.current_message_number,
            last_message: self.last_message,
            acknowledged: self.acknowledgement.ranges().to_vec(),
        }
    }
}
