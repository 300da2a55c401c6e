//! Endpoint configuration.

use std::time::Duration;

use crate::protocol::EndpointReference;
use crate::retransmit::RetransmitProfile;
use crate::source::{DEFAULT_MAX_UNACKNOWLEDGED, SequencePolicy};

/// Default period of the background resend scan.
pub const DEFAULT_RESEND_INTERVAL: Duration = Duration::from_millis(500);

/// Default capacity of the endpoint event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Endpoint configuration.
#[derive(Debug, Clone)]
pub struct RmConfig {
    /// Address this endpoint advertises as acksTo on CreateSequence.
    pub local_address: EndpointReference,

    /// Fallback peer address for out-of-band sends when a sequence never
    /// observed a non-anonymous target.
    pub default_peer: Option<EndpointReference>,

    /// Period of the background resend scan.
    pub resend_interval: Duration,

    /// Capacity of the event channel returned by `start`.
    pub event_capacity: usize,

    /// Termination policy applied to new source sequences.
    pub policy: SequencePolicy,

    /// Retransmission timing profile.
    pub profile: RetransmitProfile,
}

impl Default for RmConfig {
    fn default() -> Self {
        Self {
            local_address: EndpointReference::anonymous(),
            default_peer: None,
            resend_interval: DEFAULT_RESEND_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            policy: SequencePolicy {
                max_unacknowledged: Some(DEFAULT_MAX_UNACKNOWLEDGED),
                ..SequencePolicy::default()
            },
            profile: RetransmitProfile::default(),
        }
    }
}

/// Builder for [`RmConfig`].
#[derive(Debug, Default)]
pub struct RmConfigBuilder {
    config: RmConfig,
}

impl RmConfigBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised acksTo address.
    pub fn local_address(mut self, address: EndpointReference) -> Self {
        self.config.local_address = address;
        self
    }

    /// Set the fallback peer address for out-of-band sends.
    pub fn default_peer(mut self, peer: EndpointReference) -> Self {
        self.config.default_peer = Some(peer);
        self
    }

    /// Set the resend scan period.
    pub fn resend_interval(mut self, interval: Duration) -> Self {
        self.config.resend_interval = interval;
        self
    }

    /// Set the event channel capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Set the sequence termination policy.
    pub fn policy(mut self, policy: SequencePolicy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Set the retransmission timing profile.
    pub fn profile(mut self, profile: RetransmitProfile) -> Self {
        self.config.profile = profile;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RmConfig {
        self.config
    }
}
