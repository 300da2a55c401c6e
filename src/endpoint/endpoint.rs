//! Endpoint state machine and protocol-action dispatch.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::core::{ProtocolCodec, RmError, RmStore, SequenceFault, Transport};
use crate::destination::Destination;
use crate::protocol::{
    EndpointReference, Identifier, RmMessage, SequenceAcknowledgement, SequenceType,
};
use crate::retransmit::RetransmissionQueue;
use crate::source::{Source, SourceSequence};

use super::config::RmConfig;
use super::proxy::Proxy;

/// Event emitted by an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RmEvent {
    /// A sequence completed its create exchange (either role).
    SequenceEstablished {
        /// The new sequence.
        identifier: Identifier,
    },

    /// A sequence was terminated and removed.
    SequenceTerminated {
        /// The terminated sequence.
        identifier: Identifier,
    },

    /// An inbound application message was accepted.
    MessageReceived {
        /// Sequence the message arrived on.
        identifier: Identifier,
        /// Message number within the sequence.
        message_number: u64,
        /// Application payload.
        payload: Vec<u8>,
        /// Whether the number was already covered (retransmitted duplicate).
        duplicate: bool,
    },

    /// An acknowledgement was pushed out-of-band to a sequence's acksTo.
    AcknowledgementFlushed {
        /// Sequence the acknowledgement covered.
        identifier: Identifier,
    },

    /// A message exhausted its retry budget.
    ///
    /// Fatal for the message, not for the sequence.
    DeliveryFailed {
        /// Sequence the message belonged to.
        identifier: Identifier,
        /// The undeliverable message number.
        message_number: u64,
        /// Total send attempts made.
        attempts: u32,
    },
}

/// A reliable-messaging endpoint.
///
/// Pairs one application endpoint with one [`Source`], one
/// [`Destination`], and one [`Proxy`]. Inbound protocol messages are
/// dispatched through [`RmEndpoint::on_message`] (or
/// [`RmEndpoint::on_wire`] for raw bytes); outbound application traffic
/// enters through [`RmEndpoint::send`].
///
/// # Example
///
/// ```ignore
/// let (endpoint, mut events) = RmEndpoint::start(
///     RmConfig::default(),
///     transport,
///     Arc::new(BinaryCodec::new()),
///     Arc::new(NullStore),
/// );
///
/// // Outbound: stamped, sent, and tracked until acknowledged.
/// endpoint.send(b"order #17", &peer).await?;
///
/// // Inbound: the messaging layer hands received bytes back in.
/// if let Some(reply) = endpoint.on_wire(&received).await? {
///     transport.send(&reply, &peer).await?;
/// }
///
/// while let Some(event) = events.recv().await {
///     match event {
///         RmEvent::MessageReceived { payload, .. } => { /* deliver */ }
///         RmEvent::DeliveryFailed { message_number, .. } => { /* report */ }
///         _ => {}
///     }
/// }
/// ```
pub struct RmEndpoint<T: Transport> {
    /// Endpoint configuration.
    config: RmConfig,

    /// Sending-side role.
    source: Arc<Source>,

    /// Receiving-side role.
    destination: Arc<Destination>,

    /// Unacknowledged-message tracking.
    queue: Arc<RetransmissionQueue>,

    /// Outbound protocol-message sender.
    proxy: Proxy<T>,

    /// Event stream to the application.
    event_tx: mpsc::Sender<RmEvent>,

    /// Stops the background resend task.
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl<T: Transport> RmEndpoint<T> {
    /// Activate an endpoint and spawn its background resend task.
    ///
    /// Must be called within a tokio runtime. Returns the endpoint and
    /// the event stream; dropping the receiver silently discards events.
    pub fn start(
        config: RmConfig,
        transport: T,
        codec: Arc<dyn ProtocolCodec>,
        store: Arc<dyn RmStore>,
    ) -> (Self, mpsc::Receiver<RmEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let source = Arc::new(Source::new(config.policy.clone(), store.clone()));
        let destination = Arc::new(Destination::new(store));
        let queue = Arc::new(RetransmissionQueue::new(config.profile));
        let proxy = Proxy::new(Arc::new(transport), codec);

        let task_queue = queue.clone();
        let task_proxy = proxy.clone();
        let task_events = event_tx.clone();
        let scan_interval = config.resend_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scan_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        resend_pass(&task_queue, &task_proxy, &task_events).await;
                    }
                }
            }
            debug!("resend task stopped");
        });

        info!(local = %config.local_address, "reliable-messaging endpoint started");
        let endpoint = Self {
            config,
            source,
            destination,
            queue,
            proxy,
            event_tx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        };
        (endpoint, event_rx)
    }

    /// Send an application payload reliably to `target`.
    ///
    /// Establishes a sequence on first use (completing only once the
    /// matching CreateSequenceResponse has been dispatched back in),
    /// stamps the payload with the next message number, piggybacks any
    /// acknowledgements owed to `target`, and registers the encoded
    /// message for retransmission. Returns the allocated message number.
    pub async fn send(
        &self,
        payload: &[u8],
        target: &EndpointReference,
    ) -> Result<u64, RmError> {
        self.send_correlated(payload, target, None).await
    }

    /// Send a payload that responds to an inbound sequenced message.
    ///
    /// When the outbound sequence was offered into the inbound one and
    /// `correlated` carries the last-message marker, this response closes
    /// the outbound sequence.
    pub async fn send_correlated(
        &self,
        payload: &[u8],
        target: &EndpointReference,
        correlated: Option<&SequenceType>,
    ) -> Result<u64, RmError> {
        let sequence = self.ensure_sequence(target).await?;
        let identifier = sequence.lock().await.identifier().clone();
        let unacked = self.queue.count_unacknowledged(&identifier).await;

        let header = {
            let mut guard = sequence.lock().await;
            guard.observe_target(target);
            guard.next_message(correlated, unacked)?
        };

        let acks = self.destination.acknowledgements_for_target(target).await;
        let message = RmMessage::Application {
            sequence: header.clone(),
            acks,
            reply_to: Some(self.config.local_address.clone()),
            payload: payload.to_vec(),
        };
        let bytes = self.proxy.encode(&message)?;
        self.proxy.send_raw(&bytes, target).await?;
        self.queue
            .register(&header.identifier, header.message_number, bytes, target.clone())
            .await;
        debug!(
            identifier = %header.identifier,
            message_number = header.message_number,
            last = header.last_message,
            "application message sent"
        );
        Ok(header.message_number)
    }

    /// Dispatch an inbound protocol message.
    ///
    /// Returns the reply the caller's messaging layer should carry back
    /// on the current exchange, if any. Protocol faults raised by the
    /// handlers become fault replies; other errors propagate.
    pub async fn on_message(&self, message: RmMessage) -> Result<Option<RmMessage>, RmError> {
        match self.dispatch(message).await {
            Ok(reply) => Ok(reply),
            Err(RmError::Fault(fault)) => {
                warn!(code = fault.fault_code(), "protocol fault: {fault}");
                Ok(Some(RmMessage::fault_of(&fault)))
            }
            Err(other) => Err(other),
        }
    }

    /// Decode and dispatch inbound wire bytes.
    ///
    /// The encoded reply, if any, should be carried back on the current
    /// exchange. Undecodable input produces an encoded fault reply.
    pub async fn on_wire(&self, data: &[u8]) -> Result<Option<Vec<u8>>, RmError> {
        let message = match self.proxy.decode(data) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "undecodable inbound message");
                let fault = SequenceFault::UnsupportedAction(e.to_string());
                return Ok(Some(self.proxy.encode(&RmMessage::fault_of(&fault))?));
            }
        };
        match self.on_message(message).await? {
            Some(reply) => Ok(Some(self.proxy.encode(&reply)?)),
            None => Ok(None),
        }
    }

    /// Terminate a source sequence explicitly.
    ///
    /// Cancels pending retransmissions, sends TerminateSequence to the
    /// sequence's target (falling back to the configured default peer),
    /// and removes the sequence. Faults with `MissingTarget` when no
    /// address is known.
    pub async fn terminate(&self, identifier: &Identifier) -> Result<(), RmError> {
        self.terminate_source_sequence(identifier).await
    }

    /// Ask the peer to resend the acknowledgement state for a sequence.
    ///
    /// Useful while closing: the source learns the final coverage even
    /// when no further application traffic would carry it back.
    pub async fn request_acknowledgement(&self, identifier: &Identifier) -> Result<(), RmError> {
        let sequence = self
            .source
            .sequence(identifier)
            .await
            .ok_or_else(|| SequenceFault::UnknownSequence(identifier.clone()))?;
        let target = sequence.lock().await.target().cloned();
        let target = target
            .or_else(|| self.config.default_peer.clone())
            .ok_or_else(|| SequenceFault::MissingTarget(identifier.clone()))?;
        self.proxy.ack_requested(identifier.clone(), &target).await
    }

    /// Stop the background resend task.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
    }

    /// The sending-side role.
    pub fn source(&self) -> &Arc<Source> {
        &self.source
    }

    /// The receiving-side role.
    pub fn destination(&self) -> &Arc<Destination> {
        &self.destination
    }

    /// The retransmission queue.
    pub fn queue(&self) -> &Arc<RetransmissionQueue> {
        &self.queue
    }

    /// The endpoint configuration.
    pub fn config(&self) -> &RmConfig {
        &self.config
    }

    /// Route one protocol message to its handler.
    async fn dispatch(&self, message: RmMessage) -> Result<Option<RmMessage>, RmError> {
        match message {
            RmMessage::CreateSequence {
                acks_to,
                offer,
                expires,
            } => self.on_create_sequence(acks_to, offer, expires).await,

            RmMessage::CreateSequenceResponse {
                identifier,
                accept,
                expires,
            } => {
                let (_, offer) = self.source.complete_create(identifier.clone(), expires).await?;
                if let Some(offered) = offer {
                    match accept {
                        Some(accept_addr) => {
                            if let Err(e) =
                                self.destination.register_offered(offered, accept_addr).await
                            {
                                warn!(error = %e, "offered sequence registration failed");
                            }
                        }
                        None => debug!(identifier = %identifier, "offer not accepted"),
                    }
                }
                self.emit(RmEvent::SequenceEstablished { identifier }).await;
                Ok(None)
            }

            RmMessage::TerminateSequence { identifier } => {
                self.destination.terminate(&identifier).await?;
                self.emit(RmEvent::SequenceTerminated { identifier }).await;
                Ok(None)
            }

            RmMessage::SequenceAcknowledgement(ack) => {
                self.process_acknowledgement(&ack).await?;
                Ok(None)
            }

            RmMessage::AckRequested { identifier } => {
                // Always resend the full current state, changed or not.
                let ack = self.destination.acknowledgement_for(&identifier).await?;
                Ok(Some(RmMessage::SequenceAcknowledgement(ack)))
            }

            RmMessage::Fault { code, reason } => {
                warn!(code = %code, reason = %reason, "fault received from peer");
                Ok(None)
            }

            RmMessage::Application {
                sequence,
                acks,
                reply_to,
                payload,
            } => {
                for ack in &acks {
                    self.process_acknowledgement(ack).await?;
                }
                let outcome = self
                    .destination
                    .acknowledge(&sequence, reply_to.as_ref())
                    .await?;
                self.emit(RmEvent::MessageReceived {
                    identifier: sequence.identifier.clone(),
                    message_number: sequence.message_number,
                    payload,
                    duplicate: outcome.duplicate,
                })
                .await;
                if outcome.needs_ack_flush {
                    self.flush_acknowledgement(&sequence.identifier).await?;
                }
                Ok(None)
            }
        }
    }

    /// Destination-role CreateSequence handling.
    async fn on_create_sequence(
        &self,
        acks_to: EndpointReference,
        offer: Option<Identifier>,
        expires: Option<std::time::Duration>,
    ) -> Result<Option<RmMessage>, RmError> {
        let identifier = match self
            .destination
            .create_sequence(acks_to, expires, None)
            .await
        {
            Ok(identifier) => identifier,
            Err(e) => {
                warn!(error = %e, "create sequence refused");
                return Err(SequenceFault::CreateSequenceRefused(e.to_string()).into());
            }
        };

        let accept = match offer {
            Some(offered) => match self
                .source
                .accept_offer(offered.clone(), identifier.clone())
                .await
            {
                Ok(_) => Some(self.config.local_address.clone()),
                Err(e) => {
                    warn!(identifier = %offered, error = %e, "offer declined");
                    None
                }
            },
            None => None,
        };

        self.emit(RmEvent::SequenceEstablished {
            identifier: identifier.clone(),
        })
        .await;
        Ok(Some(RmMessage::CreateSequenceResponse {
            identifier,
            accept,
            expires,
        }))
    }

    /// Source-role acknowledgement handling, shared by the standalone
    /// action and piggybacked acknowledgements.
    async fn process_acknowledgement(
        &self,
        ack: &SequenceAcknowledgement,
    ) -> Result<(), RmError> {
        self.queue.process_acknowledgement(ack).await;
        let fully_acknowledged = self.source.process_acknowledgement(ack).await?;
        if fully_acknowledged {
            self.terminate_source_sequence(ack.identifier()).await?;
        }
        Ok(())
    }

    /// Terminate a fully acknowledged (or abandoned) source sequence.
    async fn terminate_source_sequence(&self, identifier: &Identifier) -> Result<(), RmError> {
        let sequence = self
            .source
            .sequence(identifier)
            .await
            .ok_or_else(|| SequenceFault::UnknownSequence(identifier.clone()))?;
        let target = sequence.lock().await.target().cloned();
        let target = target
            .or_else(|| self.config.default_peer.clone())
            .ok_or_else(|| SequenceFault::MissingTarget(identifier.clone()))?;

        self.queue.cancel_sequence(identifier).await;
        self.proxy
            .terminate_sequence(identifier.clone(), &target)
            .await?;
        self.source.remove(identifier).await;
        info!(identifier = %identifier, "source sequence terminated");
        self.emit(RmEvent::SequenceTerminated {
            identifier: identifier.clone(),
        })
        .await;
        Ok(())
    }

    /// Push a sequence's acknowledgement to its acksTo address.
    async fn flush_acknowledgement(&self, identifier: &Identifier) -> Result<(), RmError> {
        let sequence = self
            .destination
            .sequence(identifier)
            .await
            .ok_or_else(|| SequenceFault::UnknownSequence(identifier.clone()))?;
        let (ack, acks_to) = {
            let guard = sequence.lock().await;
            (guard.acknowledgement().clone(), guard.acks_to().clone())
        };
        self.proxy.acknowledge(&ack, &acks_to).await?;
        self.emit(RmEvent::AcknowledgementFlushed {
            identifier: identifier.clone(),
        })
        .await;
        Ok(())
    }

    /// The sequence outbound traffic rides on, creating one if needed.
    async fn ensure_sequence(
        &self,
        target: &EndpointReference,
    ) -> Result<Arc<Mutex<SourceSequence>>, RmError> {
        if let Some(sequence) = self.source.current().await {
            return Ok(sequence);
        }
        let waiter = self.source.register_pending_create(None).await;
        self.proxy
            .create_sequence(
                self.config.local_address.clone(),
                None,
                self.config.policy.expiry,
                target,
            )
            .await?;
        let (identifier, _) = waiter.await.map_err(|_| RmError::Shutdown)?;
        self.source
            .sequence(&identifier)
            .await
            .ok_or_else(|| RmError::Fault(SequenceFault::UnknownSequence(identifier)))
    }

    /// Emit an event; the stream is advisory and may be unconsumed.
    async fn emit(&self, event: RmEvent) {
        let _ = self.event_tx.send(event).await;
    }
}

/// One pass of the background resend scan.
async fn resend_pass<T: Transport>(
    queue: &RetransmissionQueue,
    proxy: &Proxy<T>,
    events: &mpsc::Sender<RmEvent>,
) {
    let now = Instant::now();
    for candidate in queue.due_at(now).await {
        match proxy.send_raw(&candidate.payload, &candidate.target).await {
            Ok(()) => debug!(
                identifier = %candidate.identifier,
                message_number = candidate.message_number,
                attempt = candidate.attempts + 1,
                "message retransmitted"
            ),
            Err(e) => warn!(
                identifier = %candidate.identifier,
                message_number = candidate.message_number,
                error = %e,
                "retransmission send failed"
            ),
        }
        // A failed send still consumed an attempt; back off either way.
        queue
            .mark_retransmitted(&candidate.identifier, candidate.message_number, Instant::now())
            .await;
    }
    for failure in queue.drain_exhausted().await {
        let _ = events
            .send(RmEvent::DeliveryFailed {
                identifier: failure.identifier,
                message_number: failure.message_number,
                attempts: failure.attempts,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use crate::core::TransportError;
    use crate::protocol::BinaryCodec;
    use crate::retransmit::RetransmitProfile;
    use crate::source::SequencePolicy;
    use crate::store::{InMemoryStore, NullStore};

    use super::super::config::RmConfigBuilder;

    /// Captures every send for inspection; shared between the test and
    /// the endpoint through the inner Arc.
    #[derive(Clone, Default)]
    struct MockTransport {
        sent: Arc<StdMutex<Vec<(Vec<u8>, EndpointReference)>>>,
    }

    impl MockTransport {
        fn captured(&self) -> Vec<(Vec<u8>, EndpointReference)> {
            self.sent.lock().unwrap().clone()
        }

        fn decoded(&self) -> Vec<RmMessage> {
            let codec = BinaryCodec::new();
            self.captured()
                .iter()
                .map(|(bytes, _)| codec.decode(bytes).unwrap())
                .collect()
        }

        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl Transport for MockTransport {
        fn send(
            &self,
            message: &[u8],
            target: &EndpointReference,
        ) -> impl Future<Output = Result<(), TransportError>> + Send {
            let message = message.to_vec();
            let target = target.clone();
            let sent = self.sent.clone();
            async move {
                sent.lock().unwrap().push((message, target));
                Ok(())
            }
        }
    }

    fn start(config: RmConfig) -> (RmEndpoint<MockTransport>, mpsc::Receiver<RmEvent>, MockTransport) {
        let transport = MockTransport::default();
        let (endpoint, events) = RmEndpoint::start(
            config,
            transport.clone(),
            Arc::new(BinaryCodec::new()),
            Arc::new(NullStore),
        );
        (endpoint, events, transport)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met within 2s");
    }

    fn peer() -> EndpointReference {
        EndpointReference::new("http://example.org/app")
    }

    #[tokio::test]
    async fn test_create_sequence_yields_response() {
        let (endpoint, mut events, _) = start(RmConfig::default());
        let reply = endpoint
            .on_message(RmMessage::CreateSequence {
                acks_to: EndpointReference::new("http://example.org/acks"),
                offer: None,
                expires: None,
            })
            .await
            .unwrap();

        let identifier = match reply {
            Some(RmMessage::CreateSequenceResponse { identifier, accept, .. }) => {
                assert!(accept.is_none());
                identifier
            }
            other => panic!("expected create response, got {other:?}"),
        };
        assert_eq!(endpoint.destination().sequence_count().await, 1);
        assert_eq!(
            events.recv().await,
            Some(RmEvent::SequenceEstablished { identifier })
        );
    }

    #[tokio::test]
    async fn test_create_sequence_with_offer_accepts_reverse_sequence() {
        let (endpoint, _events, _) = start(RmConfig::default());
        let offered = Identifier::new("urn:test:offered");
        let reply = endpoint
            .on_message(RmMessage::CreateSequence {
                acks_to: EndpointReference::anonymous(),
                offer: Some(offered.clone()),
                expires: None,
            })
            .await
            .unwrap();

        match reply {
            Some(RmMessage::CreateSequenceResponse { identifier, accept, .. }) => {
                assert!(accept.is_some());
                let reverse = endpoint
                    .source()
                    .sequence(&offered)
                    .await
                    .expect("offered sequence accepted");
                assert_eq!(
                    reverse.lock().await.offered_for(),
                    Some(&identifier)
                );
            }
            other => panic!("expected create response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_establishes_sequence_and_tracks_message() {
        let (endpoint, _events, transport) = start(RmConfig::default());
        let endpoint = Arc::new(endpoint);

        let send_task = {
            let endpoint = endpoint.clone();
            tokio::spawn(async move { endpoint.send(b"first", &peer()).await })
        };

        // The endpoint first asks the peer to create a sequence.
        wait_until(|| transport.count() >= 1).await;
        assert!(matches!(
            transport.decoded()[0],
            RmMessage::CreateSequence { .. }
        ));

        // Play the destination's part: grant an identifier.
        let granted = Identifier::new("urn:test:granted");
        endpoint
            .on_message(RmMessage::CreateSequenceResponse {
                identifier: granted.clone(),
                accept: None,
                expires: None,
            })
            .await
            .unwrap();

        let number = tokio::time::timeout(Duration::from_secs(2), send_task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(number, 1);

        // The application message went out and is tracked until acked.
        wait_until(|| transport.count() >= 2).await;
        match &transport.decoded()[1] {
            RmMessage::Application { sequence, .. } => {
                assert_eq!(sequence.identifier, granted);
                assert_eq!(sequence.message_number, 1);
            }
            other => panic!("expected application message, got {other:?}"),
        }
        assert_eq!(endpoint.queue().count_unacknowledged(&granted).await, 1);
    }

    #[tokio::test]
    async fn test_full_acknowledgement_terminates_sequence() {
        let config = RmConfig {
            policy: SequencePolicy {
                max_sequence_length: Some(1),
                ..SequencePolicy::default()
            },
            ..RmConfig::default()
        };
        let (endpoint, mut events, transport) = start(config);
        let endpoint = Arc::new(endpoint);

        let send_task = {
            let endpoint = endpoint.clone();
            tokio::spawn(async move { endpoint.send(b"only", &peer()).await })
        };
        wait_until(|| transport.count() >= 1).await;
        let granted = Identifier::new("urn:test:granted");
        endpoint
            .on_message(RmMessage::CreateSequenceResponse {
                identifier: granted.clone(),
                accept: None,
                expires: None,
            })
            .await
            .unwrap();
        send_task.await.unwrap().unwrap();

        // Acknowledge message 1: the sequence closes and terminates.
        let mut ack = SequenceAcknowledgement::new(granted.clone());
        ack.insert(1);
        endpoint
            .on_message(RmMessage::SequenceAcknowledgement(ack))
            .await
            .unwrap();

        assert_eq!(endpoint.source().sequence_count().await, 0);
        assert_eq!(endpoint.queue().count_unacknowledged(&granted).await, 0);
        let decoded = transport.decoded();
        assert!(
            decoded
                .iter()
                .any(|m| matches!(m, RmMessage::TerminateSequence { identifier } if *identifier == granted)),
            "terminate sequence not sent: {decoded:?}"
        );

        // Events: established, then terminated.
        let mut saw_terminated = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(200), events.recv()).await
        {
            if matches!(event, RmEvent::SequenceTerminated { .. }) {
                saw_terminated = true;
                break;
            }
        }
        assert!(saw_terminated);
    }

    #[tokio::test]
    async fn test_application_messages_flow_and_flush() {
        let (endpoint, mut events, transport) = start(RmConfig::default());
        let acks_to = EndpointReference::new("http://example.org/acks");
        let reply = endpoint
            .on_message(RmMessage::CreateSequence {
                acks_to: acks_to.clone(),
                offer: None,
                expires: None,
            })
            .await
            .unwrap();
        let identifier = match reply {
            Some(RmMessage::CreateSequenceResponse { identifier, .. }) => identifier,
            other => panic!("expected create response, got {other:?}"),
        };
        let _ = events.recv().await; // established

        // Out-of-order arrival; no reply flows to acksTo, so the last
        // message forces an out-of-band acknowledgement.
        for (n, last) in [(2, false), (1, false), (3, true)] {
            let mut sequence = SequenceType::new(identifier.clone(), n);
            sequence.last_message = last;
            endpoint
                .on_message(RmMessage::Application {
                    sequence,
                    acks: Vec::new(),
                    reply_to: None,
                    payload: format!("m{n}").into_bytes(),
                })
                .await
                .unwrap();
        }

        let received: Vec<_> = [
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
        ]
        .into_iter()
        .filter_map(|event| match event {
            RmEvent::MessageReceived { message_number, duplicate, .. } => {
                Some((message_number, duplicate))
            }
            _ => None,
        })
        .collect();
        assert_eq!(received, vec![(2, false), (1, false), (3, false)]);

        // The flush went to the acksTo address with full coverage.
        wait_until(|| transport.count() >= 1).await;
        let (bytes, target) = transport.captured().remove(0);
        assert_eq!(target, acks_to);
        match BinaryCodec::new().decode(&bytes).unwrap() {
            RmMessage::SequenceAcknowledgement(ack) => {
                assert!(ack.covers_through(3));
            }
            other => panic!("expected acknowledgement, got {other:?}"),
        }
        assert_eq!(
            events.recv().await,
            Some(RmEvent::AcknowledgementFlushed { identifier: identifier.clone() })
        );

        // A retransmitted duplicate is reported as such.
        endpoint
            .on_message(RmMessage::Application {
                sequence: SequenceType::new(identifier, 2),
                acks: Vec::new(),
                reply_to: None,
                payload: b"m2".to_vec(),
            })
            .await
            .unwrap();
        loop {
            match events.recv().await.unwrap() {
                RmEvent::MessageReceived { message_number, duplicate, .. } => {
                    assert_eq!(message_number, 2);
                    assert!(duplicate);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_ack_requested_replies_with_current_state() {
        let (endpoint, _events, _) = start(RmConfig::default());
        let reply = endpoint
            .on_message(RmMessage::CreateSequence {
                acks_to: EndpointReference::anonymous(),
                offer: None,
                expires: None,
            })
            .await
            .unwrap();
        let identifier = match reply {
            Some(RmMessage::CreateSequenceResponse { identifier, .. }) => identifier,
            other => panic!("expected create response, got {other:?}"),
        };

        // Nothing received yet: the reply still carries the (empty) state.
        let reply = endpoint
            .on_message(RmMessage::AckRequested { identifier: identifier.clone() })
            .await
            .unwrap();
        match reply {
            Some(RmMessage::SequenceAcknowledgement(ack)) => assert!(ack.is_empty()),
            other => panic!("expected acknowledgement, got {other:?}"),
        }

        endpoint
            .on_message(RmMessage::Application {
                sequence: SequenceType::new(identifier.clone(), 1),
                acks: Vec::new(),
                reply_to: None,
                payload: b"m1".to_vec(),
            })
            .await
            .unwrap();
        let reply = endpoint
            .on_message(RmMessage::AckRequested { identifier })
            .await
            .unwrap();
        match reply {
            Some(RmMessage::SequenceAcknowledgement(ack)) => assert!(ack.covers(1)),
            other => panic!("expected acknowledgement, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_sequence_becomes_fault_reply() {
        let (endpoint, _events, _) = start(RmConfig::default());
        let reply = endpoint
            .on_message(RmMessage::AckRequested {
                identifier: Identifier::new("urn:test:ghost"),
            })
            .await
            .unwrap();
        match reply {
            Some(RmMessage::Fault { code, reason }) => {
                assert_eq!(code, "wsrm:UnknownSequence");
                assert!(reason.contains("urn:test:ghost"));
            }
            other => panic!("expected fault reply, got {other:?}"),
        }
        assert_eq!(endpoint.destination().sequence_count().await, 0);
    }

    #[tokio::test]
    async fn test_terminate_sequence_single_branch() {
        let (endpoint, _events, _) = start(RmConfig::default());
        let reply = endpoint
            .on_message(RmMessage::CreateSequence {
                acks_to: EndpointReference::anonymous(),
                offer: None,
                expires: None,
            })
            .await
            .unwrap();
        let identifier = match reply {
            Some(RmMessage::CreateSequenceResponse { identifier, .. }) => identifier,
            other => panic!("expected create response, got {other:?}"),
        };

        let reply = endpoint
            .on_message(RmMessage::TerminateSequence { identifier: identifier.clone() })
            .await
            .unwrap();
        assert!(reply.is_none());
        assert_eq!(endpoint.destination().sequence_count().await, 0);

        // A second terminate faults instead of being silently re-handled.
        let reply = endpoint
            .on_message(RmMessage::TerminateSequence { identifier })
            .await
            .unwrap();
        assert!(matches!(reply, Some(RmMessage::Fault { .. })));
    }

    #[tokio::test]
    async fn test_on_wire_round_trip_and_undecodable_input() {
        let (endpoint, _events, _) = start(RmConfig::default());
        let codec = BinaryCodec::new();
        let bytes = codec
            .encode(&RmMessage::CreateSequence {
                acks_to: EndpointReference::anonymous(),
                offer: None,
                expires: None,
            })
            .unwrap();
        let reply = endpoint.on_wire(&bytes).await.unwrap().expect("reply bytes");
        assert!(matches!(
            codec.decode(&reply).unwrap(),
            RmMessage::CreateSequenceResponse { .. }
        ));

        let reply = endpoint.on_wire(&[0xFF, 0x00]).await.unwrap().expect("fault bytes");
        assert!(matches!(codec.decode(&reply).unwrap(), RmMessage::Fault { .. }));
    }

    #[tokio::test]
    async fn test_resend_task_retries_until_acknowledged() {
        let config = RmConfigBuilder::new()
            .resend_interval(Duration::from_millis(20))
            .profile(RetransmitProfile {
                initial_rto: Duration::from_millis(40),
                max_rto: Duration::from_millis(40),
                backoff_multiplier: 1,
                max_retransmits: 100,
            })
            .build();
        let (endpoint, _events, transport) = start(config);
        let endpoint = Arc::new(endpoint);

        let send_task = {
            let endpoint = endpoint.clone();
            tokio::spawn(async move { endpoint.send(b"retry me", &peer()).await })
        };
        wait_until(|| transport.count() >= 1).await;
        let granted = Identifier::new("urn:test:granted");
        endpoint
            .on_message(RmMessage::CreateSequenceResponse {
                identifier: granted.clone(),
                accept: None,
                expires: None,
            })
            .await
            .unwrap();
        send_task.await.unwrap().unwrap();

        // Unacknowledged: the scan keeps resending the same bytes.
        wait_until(|| {
            transport
                .decoded()
                .iter()
                .filter(|m| matches!(m, RmMessage::Application { .. }))
                .count()
                >= 3
        })
        .await;

        // Acknowledge: resends stop once any in-flight pass drains.
        let mut ack = SequenceAcknowledgement::new(granted.clone());
        ack.insert(1);
        endpoint.queue().process_acknowledgement(&ack).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let settled = transport.count();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(transport.count(), settled);

        endpoint.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_delivery_failure() {
        let config = RmConfigBuilder::new()
            .resend_interval(Duration::from_millis(10))
            .profile(RetransmitProfile {
                initial_rto: Duration::from_millis(10),
                max_rto: Duration::from_millis(10),
                backoff_multiplier: 1,
                max_retransmits: 2,
            })
            .build();
        let (endpoint, mut events, transport) = start(config);
        let endpoint = Arc::new(endpoint);

        let send_task = {
            let endpoint = endpoint.clone();
            tokio::spawn(async move { endpoint.send(b"doomed", &peer()).await })
        };
        wait_until(|| transport.count() >= 1).await;
        let granted = Identifier::new("urn:test:granted");
        endpoint
            .on_message(RmMessage::CreateSequenceResponse {
                identifier: granted.clone(),
                accept: None,
                expires: None,
            })
            .await
            .unwrap();
        send_task.await.unwrap().unwrap();

        let failure = loop {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let RmEvent::DeliveryFailed { identifier, message_number, attempts } = event {
                break (identifier, message_number, attempts);
            }
        };
        assert_eq!(failure.0, granted);
        assert_eq!(failure.1, 1);
        assert_eq!(failure.2, 3);

        // The message stays failed but the sequence itself survives.
        assert_eq!(endpoint.source().sequence_count().await, 1);
        endpoint.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_acknowledgement_targets_sequence_peer() {
        let (endpoint, _events, transport) = start(RmConfig::default());
        let endpoint = Arc::new(endpoint);

        let send_task = {
            let endpoint = endpoint.clone();
            tokio::spawn(async move { endpoint.send(b"first", &peer()).await })
        };
        wait_until(|| transport.count() >= 1).await;
        let granted = Identifier::new("urn:test:granted");
        endpoint
            .on_message(RmMessage::CreateSequenceResponse {
                identifier: granted.clone(),
                accept: None,
                expires: None,
            })
            .await
            .unwrap();
        send_task.await.unwrap().unwrap();

        endpoint.request_acknowledgement(&granted).await.unwrap();
        let decoded = transport.decoded();
        assert!(
            decoded
                .iter()
                .any(|m| matches!(m, RmMessage::AckRequested { identifier } if *identifier == granted))
        );

        // An unknown sequence faults instead of sending blind.
        let missing = Identifier::new("urn:test:ghost");
        assert!(matches!(
            endpoint.request_acknowledgement(&missing).await,
            Err(RmError::Fault(SequenceFault::UnknownSequence(_)))
        ));
    }

    #[tokio::test]
    async fn test_store_mirrors_destination_lifecycle() {
        let store = Arc::new(InMemoryStore::new());
        let transport = MockTransport::default();
        let (endpoint, _events) = RmEndpoint::start(
            RmConfig::default(),
            transport,
            Arc::new(BinaryCodec::new()),
            store.clone(),
        );

        let reply = endpoint
            .on_message(RmMessage::CreateSequence {
                acks_to: EndpointReference::anonymous(),
                offer: None,
                expires: None,
            })
            .await
            .unwrap();
        let identifier = match reply {
            Some(RmMessage::CreateSequenceResponse { identifier, .. }) => identifier,
            other => panic!("expected create response, got {other:?}"),
        };
        assert_eq!(store.destination_count(), 1);

        endpoint
            .on_message(RmMessage::TerminateSequence { identifier })
            .await
            .unwrap();
        assert_eq!(store.destination_count(), 0);
    }
}
