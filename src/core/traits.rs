//! Collaborator traits for the reliable-messaging core.
//!
//! The core never talks to a network or a wire format directly: delivery
//! goes through [`Transport`], (de)serialization through [`ProtocolCodec`],
//! and durability through [`RmStore`]. A no-op store is a valid
//! implementation; pure in-memory operation is supported.

use std::future::Future;

use super::error::{DecodeError, EncodeError, StoreError, TransportError};
use crate::protocol::{EndpointReference, RmMessage};
use crate::store::{DestinationSequenceRecord, SourceSequenceRecord};

/// One-way message channel to a remote endpoint.
///
/// The inbound direction is not part of this trait: the surrounding
/// messaging layer delivers received bytes to
/// [`RmEndpoint::on_wire`](crate::endpoint::RmEndpoint::on_wire).
///
/// # Requirements
///
/// - `send` MUST NOT retry internally; retransmission is owned by the
///   reliable-messaging layer.
/// - A returned `Ok(())` means the message was handed to the channel, not
///   that the peer received it.
pub trait Transport: Send + Sync + 'static {
    /// Send an encoded message to the given target address.
    fn send(
        &self,
        message: &[u8],
        target: &EndpointReference,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Encoder/decoder between protocol structures and wire bytes.
///
/// The SOAP/XML envelope codec of a full web-services stack implements
/// this trait externally; [`BinaryCodec`](crate::protocol::BinaryCodec)
/// is the compact built-in implementation.
pub trait ProtocolCodec: Send + Sync {
    /// Encode a protocol message to wire bytes.
    fn encode(&self, message: &RmMessage) -> Result<Vec<u8>, EncodeError>;

    /// Decode wire bytes into a protocol message.
    fn decode(&self, data: &[u8]) -> Result<RmMessage, DecodeError>;
}

/// Optional durable store for sequence state.
///
/// Implementations are called while the sequence registries mutate, so
/// they should be fast; slow backends belong behind their own queue.
pub trait RmStore: Send + Sync {
    /// Persist a newly created source sequence.
    fn create_source_sequence(&self, record: &SourceSequenceRecord) -> Result<(), StoreError>;

    /// Remove a terminated source sequence.
    fn remove_source_sequence(&self, identifier: &str) -> Result<(), StoreError>;

    /// Persist a newly created destination sequence.
    fn create_destination_sequence(
        &self,
        record: &DestinationSequenceRecord,
    ) -> Result<(), StoreError>;

    /// Remove a terminated destination sequence.
    fn remove_destination_sequence(&self, identifier: &str) -> Result<(), StoreError>;
}
