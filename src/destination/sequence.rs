//! Per-sequence state for the receiving side.

use std::time::{Duration, Instant};

use crate::core::SequenceFault;
use crate::protocol::{EndpointReference, Identifier, SequenceAcknowledgement};

/// Destination-side sequence lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationState {
    /// CreateSequence accepted, registration in progress.
    Creating,
    /// Sequence is live and accepting messages.
    Established,
    /// TerminateSequence processing has begun.
    Terminating,
    /// Sequence terminated; further messages fault.
    Terminated,
}

/// Result of accepting one inbound message number.
///
/// `needs_ack_flush` is the explicit liveness signal: the last message of
/// the sequence is known and the acknowledgement cannot ride a reply on
/// the current exchange, so the orchestration layer must push it to the
/// acksTo address out-of-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcknowledgeOutcome {
    /// The message number that was acknowledged.
    pub message_number: u64,
    /// Whether the number was already covered (retransmitted duplicate).
    pub duplicate: bool,
    /// Whether an out-of-band acknowledgement send is required.
    pub needs_ack_flush: bool,
}

/// Receiving-side state of one sequence.
///
/// Owned exclusively by one [`Destination`](super::Destination); the
/// registry wraps each instance in its own lock.
#[derive(Debug, Clone)]
pub struct DestinationSequence {
    /// Sequence identifier.
    identifier: Identifier,
    /// Message numbers received so far.
    acknowledgement: SequenceAcknowledgement,
    /// Final message number, once the last-message marker has been seen.
    last_message_number: Option<u64>,
    /// Where acknowledgements for this sequence are sent.
    acks_to: EndpointReference,
    /// Correlation token of the exchange that created the sequence.
    correlation_id: Option<String>,
    /// Hard expiry deadline, if the sequence has a bounded lifetime.
    expires_at: Option<Instant>,
    /// Lifecycle state.
    state: DestinationState,
}

impl DestinationSequence {
    /// Create a sequence in the `Creating` state.
    pub fn new(identifier: Identifier, acks_to: EndpointReference) -> Self {
        Self {
            acknowledgement: SequenceAcknowledgement::new(identifier.clone()),
            identifier,
            last_message_number: None,
            acks_to,
            correlation_id: None,
            expires_at: None,
            state: DestinationState::Creating,
        }
    }

    /// Transition to `Established` once registration completed.
    pub fn establish(&mut self) {
        if self.state == DestinationState::Creating {
            self.state = DestinationState::Established;
        }
    }

    /// Accept an inbound message number.
    ///
    /// Out-of-order arrival creates a disjoint range until the gaps fill;
    /// an already-covered number is reported as a duplicate, not an error.
    /// `reply_to` is the address a reply to the current exchange would go
    /// to, used to decide whether the acknowledgement can piggyback.
    pub fn acknowledge(
        &mut self,
        message_number: u64,
        last_message: bool,
        reply_to: Option<&EndpointReference>,
    ) -> Result<AcknowledgeOutcome, SequenceFault> {
        match self.state {
            DestinationState::Terminating | DestinationState::Terminated => {
                return Err(SequenceFault::SequenceTerminated(self.identifier.clone()));
            }
            DestinationState::Creating | DestinationState::Established => {}
        }
        if self.is_expired() {
            return Err(SequenceFault::SequenceExpired(self.identifier.clone()));
        }
        if let Some(last) = self.last_message_number {
            if message_number > last {
                return Err(SequenceFault::LastMessageNumberExceeded {
                    identifier: self.identifier.clone(),
                    last,
                    got: message_number,
                });
            }
        }

        let duplicate = !self.acknowledgement.insert(message_number);
        if last_message {
            self.last_message_number = Some(message_number);
        }

        // Piggyback when the reply of this exchange already flows to the
        // acksTo address (or both sides use the back-channel).
        let piggyback = match reply_to {
            Some(reply) => *reply == self.acks_to,
            None => self.acks_to.is_anonymous(),
        };
        let needs_ack_flush = self.last_message_number.is_some() && !piggyback;

        Ok(AcknowledgeOutcome {
            message_number,
            duplicate,
            needs_ack_flush,
        })
    }

    /// Record the final message number of the sequence.
    pub fn set_last_message_number(&mut self, n: u64) {
        self.last_message_number = Some(n);
    }

    /// Begin termination; subsequent acknowledges fault.
    pub fn begin_terminating(&mut self) {
        self.state = DestinationState::Terminating;
    }

    /// Mark the sequence terminated.
    pub fn terminate(&mut self) {
        self.state = DestinationState::Terminated;
    }

    /// Current acknowledgement state.
    pub fn acknowledgement(&self) -> &SequenceAcknowledgement {
        &self.acknowledgement
    }

    /// Whether every message through the last one has been received.
    pub fn is_complete(&self) -> bool {
        self.last_message_number
            .is_some_and(|last| self.acknowledgement.covers_through(last))
    }

    /// Sequence identifier.
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Address acknowledgements are sent to.
    pub fn acks_to(&self) -> &EndpointReference {
        &self.acks_to
    }

    /// Final message number, if known.
    pub fn last_message_number(&self) -> Option<u64> {
        self.last_message_number
    }

    /// Correlation token of the creating exchange.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Attach the correlation token of the creating exchange.
    pub fn set_correlation_id(&mut self, correlation_id: impl Into<String>) {
        self.correlation_id = Some(correlation_id.into());
    }

    /// Bound the sequence lifetime.
    pub fn set_expiry(&mut self, lifetime: Duration) {
        self.expires_at = Some(Instant::now() + lifetime);
    }

    /// Whether the expiry deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Whether the expiry deadline has passed at a given time.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now > deadline)
    }

    /// Lifecycle state.
    pub fn state(&self) -> DestinationState {
        self.state
    }

    /// Snapshot for the durable store.
    pub fn snapshot(&self) -> crate::store::DestinationSequenceRecord {
        crate::store::DestinationSequenceRecord {
            identifier: self.identifier.clone(),
            acks_to: self.acks_to.clone(),
            acknowledged: self.acknowledgement.ranges().to_vec(),
            last_message_number: self.last_message_number,
        }
    }
}
