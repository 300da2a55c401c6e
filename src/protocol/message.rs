//! Protocol message union and action-URI dispatch.
//!
//! Inbound routing is an enum match over these variants rather than any
//! runtime handler-chain surgery; unrecognized actions are rejected as
//! protocol faults.

use std::time::Duration;

use crate::core::SequenceFault;
use crate::core::constants::{
    ACTION_ACK_REQUESTED, ACTION_CREATE_SEQUENCE, ACTION_CREATE_SEQUENCE_RESPONSE,
    ACTION_LAST_MESSAGE, ACTION_SEQUENCE_ACKNOWLEDGEMENT, ACTION_SEQUENCE_FAULT,
    ACTION_TERMINATE_SEQUENCE,
};

use super::types::{EndpointReference, Identifier, SequenceAcknowledgement, SequenceType};

/// A reliable-messaging protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RmMessage {
    /// Request to create a new sequence (destination role handles this).
    CreateSequence {
        /// Where acknowledgements for the new sequence should be sent.
        acks_to: EndpointReference,
        /// Optional offered identifier for a reverse (response) sequence.
        offer: Option<Identifier>,
        /// Requested sequence lifetime.
        expires: Option<Duration>,
    },

    /// Accepts a CreateSequence request, naming the new sequence.
    CreateSequenceResponse {
        /// Identifier allocated by the destination.
        identifier: Identifier,
        /// Present when an offered reverse sequence was accepted; carries
        /// the address acknowledgements for it should be sent to.
        accept: Option<EndpointReference>,
        /// Granted sequence lifetime.
        expires: Option<Duration>,
    },

    /// Terminates a sequence whose messages are all acknowledged.
    TerminateSequence {
        /// Sequence to terminate.
        identifier: Identifier,
    },

    /// Standalone acknowledgement of received message numbers.
    SequenceAcknowledgement(SequenceAcknowledgement),

    /// Demands the current acknowledgement state for a sequence.
    AckRequested {
        /// Sequence whose acknowledgement is requested.
        identifier: Identifier,
    },

    /// Protocol fault surfaced to the peer.
    Fault {
        /// WS-RM fault subcode.
        code: String,
        /// Human-readable cause.
        reason: String,
    },

    /// Application message stamped with a sequence header.
    Application {
        /// Sequence header for the payload.
        sequence: SequenceType,
        /// Piggybacked acknowledgements for reverse sequences.
        acks: Vec<SequenceAcknowledgement>,
        /// Where replies to this exchange will be sent.
        reply_to: Option<EndpointReference>,
        /// Opaque application payload.
        payload: Vec<u8>,
    },
}

impl RmMessage {
    /// The WS-Addressing action URI for this message.
    ///
    /// Application messages carry the application's own action and return
    /// `None`, except for the final message of a sequence which uses the
    /// protocol's LastMessage action.
    pub fn action(&self) -> Option<&'static str> {
        match self {
            Self::CreateSequence { .. } => Some(ACTION_CREATE_SEQUENCE),
            Self::CreateSequenceResponse { .. } => Some(ACTION_CREATE_SEQUENCE_RESPONSE),
            Self::TerminateSequence { .. } => Some(ACTION_TERMINATE_SEQUENCE),
            Self::SequenceAcknowledgement(_) => Some(ACTION_SEQUENCE_ACKNOWLEDGEMENT),
            Self::AckRequested { .. } => Some(ACTION_ACK_REQUESTED),
            Self::Fault { .. } => Some(ACTION_SEQUENCE_FAULT),
            Self::Application { sequence, .. } if sequence.last_message => {
                Some(ACTION_LAST_MESSAGE)
            }
            Self::Application { .. } => None,
        }
    }

    /// The sequence identifier the message refers to, where one exists.
    pub fn identifier(&self) -> Option<&Identifier> {
        match self {
            Self::CreateSequence { .. } | Self::Fault { .. } => None,
            Self::CreateSequenceResponse { identifier, .. }
            | Self::TerminateSequence { identifier }
            | Self::AckRequested { identifier } => Some(identifier),
            Self::SequenceAcknowledgement(ack) => Some(ack.identifier()),
            Self::Application { sequence, .. } => Some(&sequence.identifier),
        }
    }

    /// Whether this is an application message (the sequenced hot path).
    pub fn is_application(&self) -> bool {
        matches!(self, Self::Application { .. })
    }

    /// Build the wire fault message for a [`SequenceFault`].
    pub fn fault_of(fault: &SequenceFault) -> Self {
        Self::Fault {
            code: fault.fault_code().to_owned(),
            reason: fault.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_mapping() {
        let create = RmMessage::CreateSequence {
            acks_to: EndpointReference::anonymous(),
            offer: None,
            expires: None,
        };
        assert_eq!(create.action(), Some(ACTION_CREATE_SEQUENCE));

        let terminate = RmMessage::TerminateSequence {
            identifier: Identifier::new("urn:test:s1"),
        };
        assert_eq!(terminate.action(), Some(ACTION_TERMINATE_SEQUENCE));
    }

    #[test]
    fn test_last_application_message_uses_last_message_action() {
        let msg = RmMessage::Application {
            sequence: SequenceType::new(Identifier::new("urn:test:s1"), 4).last(),
            acks: Vec::new(),
            reply_to: None,
            payload: b"bye".to_vec(),
        };
        assert_eq!(msg.action(), Some(ACTION_LAST_MESSAGE));

        let plain = RmMessage::Application {
            sequence: SequenceType::new(Identifier::new("urn:test:s1"), 1),
            acks: Vec::new(),
            reply_to: None,
            payload: b"hi".to_vec(),
        };
        assert_eq!(plain.action(), None);
    }

    #[test]
    fn test_identifier_extraction() {
        let id = Identifier::new("urn:test:s1");
        let ack = RmMessage::SequenceAcknowledgement(SequenceAcknowledgement::new(id.clone()));
        assert_eq!(ack.identifier(), Some(&id));

        let create = RmMessage::CreateSequence {
            acks_to: EndpointReference::anonymous(),
            offer: None,
            expires: None,
        };
        assert_eq!(create.identifier(), None);
    }

    #[test]
    fn test_fault_of_carries_code() {
        let fault = SequenceFault::UnknownSequence(Identifier::new("urn:test:s1"));
        let msg = RmMessage::fault_of(&fault);
        match msg {
            RmMessage::Fault { code, reason } => {
                assert_eq!(code, "wsrm:UnknownSequence");
                assert!(reason.contains("urn:test:s1"));
            }
            other => panic!("expected fault message, got {other:?}"),
        }
    }
}
