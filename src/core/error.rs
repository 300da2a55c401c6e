//! Error types for the reliable-messaging core.

use thiserror::Error;

use super::constants;
use crate::protocol::Identifier;

/// Protocol-level sequence faults.
///
/// These correspond to WS-RM fault subcodes and are always surfaced to the
/// remote peer as a fault response, never silently absorbed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SequenceFault {
    /// The referenced sequence identifier is not known to this endpoint.
    #[error("unknown sequence: {0}")]
    UnknownSequence(Identifier),

    /// The sequence has already been terminated.
    #[error("sequence terminated: {0}")]
    SequenceTerminated(Identifier),

    /// The sequence expired; no further message numbers may be allocated.
    #[error("sequence expired: {0}")]
    SequenceExpired(Identifier),

    /// A message number beyond the recorded last message was received.
    #[error("message number {got} exceeds last message number {last} on {identifier}")]
    LastMessageNumberExceeded {
        /// Sequence the message arrived on.
        identifier: Identifier,
        /// Recorded last message number.
        last: u64,
        /// Offending message number.
        got: u64,
    },

    /// The message number space of the sequence is exhausted.
    #[error("message number rollover on {0}")]
    MessageNumberRollover(Identifier),

    /// An acknowledgement violated the range invariants.
    #[error("invalid acknowledgement on {identifier}: {reason}")]
    InvalidAcknowledgement {
        /// Sequence the acknowledgement referenced.
        identifier: Identifier,
        /// Human-readable cause.
        reason: String,
    },

    /// The destination declined to create a sequence.
    #[error("create sequence refused: {0}")]
    CreateSequenceRefused(String),

    /// The action URI is not recognized by this endpoint.
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    /// An out-of-band send was required but no target address is known.
    #[error("no target address known for sequence {0}")]
    MissingTarget(Identifier),
}

impl SequenceFault {
    /// The WS-RM fault subcode for this fault.
    pub fn fault_code(&self) -> &'static str {
        match self {
            Self::UnknownSequence(_) => constants::FAULT_CODE_UNKNOWN_SEQUENCE,
            Self::SequenceTerminated(_) | Self::SequenceExpired(_) | Self::MissingTarget(_) => {
                constants::FAULT_CODE_SEQUENCE_TERMINATED
            }
            Self::LastMessageNumberExceeded { .. } => {
                constants::FAULT_CODE_LAST_MESSAGE_NUMBER_EXCEEDED
            }
            Self::MessageNumberRollover(_) => constants::FAULT_CODE_MESSAGE_NUMBER_ROLLOVER,
            Self::InvalidAcknowledgement { .. } => {
                constants::FAULT_CODE_INVALID_ACKNOWLEDGEMENT
            }
            Self::CreateSequenceRefused(_) => constants::FAULT_CODE_CREATE_SEQUENCE_REFUSED,
            Self::UnsupportedAction(_) => constants::FAULT_CODE_ACTION_NOT_SUPPORTED,
        }
    }
}

/// Errors reported by a [`Transport`](super::Transport) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The send was attempted but the channel reported failure.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The target address could not be resolved or reached.
    #[error("target unreachable: {0}")]
    Unreachable(String),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while encoding a protocol message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The message payload exceeds what the codec can frame.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Maximum the codec supports.
        max: usize,
    },
}

/// Errors produced while decoding a protocol message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input data is shorter than required.
    #[error("message too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum bytes required.
        expected: usize,
        /// Actual bytes available.
        actual: usize,
    },

    /// The message type tag is not recognized.
    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Message content is structurally invalid.
    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

/// Errors reported by an [`RmStore`](super::RmStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store rejected or failed the operation.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Top-level reliable-messaging errors.
#[derive(Debug, Error)]
pub enum RmError {
    /// Protocol fault to be surfaced to the peer.
    #[error("sequence fault: {0}")]
    Fault(#[from] SequenceFault),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Encode error.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Decode error.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Durable store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The endpoint has been shut down.
    #[error("endpoint shut down")]
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_codes() {
        let id = Identifier::new("urn:test:1");
        assert_eq!(
            SequenceFault::UnknownSequence(id.clone()).fault_code(),
            constants::FAULT_CODE_UNKNOWN_SEQUENCE
        );
        assert_eq!(
            SequenceFault::CreateSequenceRefused("busy".into()).fault_code(),
            constants::FAULT_CODE_CREATE_SEQUENCE_REFUSED
        );
        assert_eq!(
            SequenceFault::MessageNumberRollover(id).fault_code(),
            constants::FAULT_CODE_MESSAGE_NUMBER_ROLLOVER
        );
    }

    #[test]
    fn test_fault_display_names_identifier() {
        let fault = SequenceFault::UnknownSequence(Identifier::new("urn:test:42"));
        assert!(fault.to_string().contains("urn:test:42"));
    }
}
