//! Outbound protocol-message sender.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::core::{DecodeError, ProtocolCodec, RmError, SequenceFault, Transport};
use crate::protocol::{EndpointReference, Identifier, RmMessage, SequenceAcknowledgement};

/// Sends protocol messages through the transport on behalf of an
/// endpoint: create requests, out-of-band acknowledgements, terminations,
/// and raw resends of already-encoded application messages.
pub struct Proxy<T: Transport> {
    transport: Arc<T>,
    codec: Arc<dyn ProtocolCodec>,
}

impl<T: Transport> Proxy<T> {
    /// Create a proxy over a transport and codec.
    pub fn new(transport: Arc<T>, codec: Arc<dyn ProtocolCodec>) -> Self {
        Self { transport, codec }
    }

    /// Encode a message with the endpoint's codec.
    pub fn encode(&self, message: &RmMessage) -> Result<Vec<u8>, RmError> {
        Ok(self.codec.encode(message)?)
    }

    /// Decode inbound bytes with the endpoint's codec.
    pub fn decode(&self, data: &[u8]) -> Result<RmMessage, DecodeError> {
        self.codec.decode(data)
    }

    /// Encode and send a protocol message.
    pub async fn send_message(
        &self,
        message: &RmMessage,
        target: &EndpointReference,
    ) -> Result<(), RmError> {
        let bytes = self.codec.encode(message)?;
        self.transport.send(&bytes, target).await?;
        Ok(())
    }

    /// Send already-encoded bytes (first send or resend).
    pub async fn send_raw(
        &self,
        payload: &[u8],
        target: &EndpointReference,
    ) -> Result<(), RmError> {
        self.transport.send(payload, target).await?;
        Ok(())
    }

    /// Send a CreateSequence request.
    pub async fn create_sequence(
        &self,
        acks_to: EndpointReference,
        offer: Option<Identifier>,
        expires: Option<Duration>,
        target: &EndpointReference,
    ) -> Result<(), RmError> {
        debug!(target = %target, offered = offer.is_some(), "sending create sequence");
        self.send_message(
            &RmMessage::CreateSequence {
                acks_to,
                offer,
                expires,
            },
            target,
        )
        .await
    }

    /// Send a TerminateSequence for a fully acknowledged sequence.
    pub async fn terminate_sequence(
        &self,
        identifier: Identifier,
        target: &EndpointReference,
    ) -> Result<(), RmError> {
        debug!(identifier = %identifier, target = %target, "sending terminate sequence");
        self.send_message(&RmMessage::TerminateSequence { identifier }, target)
            .await
    }

    /// Send an out-of-band acknowledgement to a sequence's acksTo address.
    pub async fn acknowledge(
        &self,
        acknowledgement: &SequenceAcknowledgement,
        target: &EndpointReference,
    ) -> Result<(), RmError> {
        debug!(
            identifier = %acknowledgement.identifier(),
            target = %target,
            "sending acknowledgement"
        );
        self.send_message(
            &RmMessage::SequenceAcknowledgement(acknowledgement.clone()),
            target,
        )
        .await
    }

    /// Demand the current acknowledgement state for a sequence.
    pub async fn ack_requested(
        &self,
        identifier: Identifier,
        target: &EndpointReference,
    ) -> Result<(), RmError> {
        debug!(identifier = %identifier, target = %target, "sending ack request");
        self.send_message(&RmMessage::AckRequested { identifier }, target)
            .await
    }

    /// Send a protocol fault to the peer.
    pub async fn fault(
        &self,
        fault: &SequenceFault,
        target: &EndpointReference,
    ) -> Result<(), RmError> {
        self.send_message(&RmMessage::fault_of(fault), target).await
    }
}

impl<T: Transport> Clone for Proxy<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            codec: self.codec.clone(),
        }
    }
}
