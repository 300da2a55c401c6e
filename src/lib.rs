//! # wsrm-protocol
//!
//! A WS-ReliableMessaging sequence protocol core: at-least-once delivery
//! layered over an arbitrary one-way or request/response transport. It
//! provides:
//!
//! - **Sequencing**: strictly increasing message numbers per sequence,
//!   with last-message detection and termination policies
//! - **Acknowledgement**: merged range tracking that reconstructs full
//!   coverage regardless of arrival order
//! - **Retransmission**: timed resend with exponential backoff and a
//!   bounded retry budget per message
//! - **Negotiation**: CreateSequence / CreateSequenceResponse exchange
//!   with offered reverse sequences
//!
//! Transport delivery, envelope serialization, and durable storage are
//! collaborators consumed through the traits in [`core`]; the crate holds
//! no process-wide state.
//!
//! ## Feature Flags
//!
//! - `endpoint` (default): the tokio-based orchestration layer (sequence
//!   registries, retransmission queue, [`endpoint::RmEndpoint`])
//!
//! ## Modules
//!
//! - [`core`]: constants, error taxonomy, collaborator traits
//! - [`protocol`]: identifiers, sequence headers, acknowledgement ranges,
//!   the message union, and the binary codec
//! - [`source`]: sending-side sequence state and registry
//! - [`destination`]: receiving-side sequence state and registry
//! - [`retransmit`]: unacknowledged-message tracking and resend timing
//! - [`store`]: durable store implementations
//! - [`endpoint`]: endpoint orchestration (requires `endpoint` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use wsrm_protocol::prelude::*;
//!
//! // Destination side: track out-of-order arrivals.
//! let mut sequence = DestinationSequence::new(
//!     Identifier::new("urn:uuid:example"),
//!     EndpointReference::anonymous(),
//! );
//! sequence.establish();
//!
//! for n in [3, 1, 2] {
//!     sequence.acknowledge(n, false, None).unwrap();
//! }
//! // Gaps are gone: coverage collapsed to the single range [1, 3].
//! assert!(sequence.acknowledgement().covers_through(3));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod core;

pub mod protocol;

pub mod source;

pub mod destination;

pub mod retransmit;

pub mod store;

// Endpoint orchestration (feature-gated)
#[cfg(feature = "endpoint")]
#[cfg_attr(docsrs, doc(cfg(feature = "endpoint")))]
pub mod endpoint;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;
    pub use crate::protocol::*;

    pub use crate::destination::*;
    pub use crate::retransmit::*;
    pub use crate::source::*;
    pub use crate::store::*;

    #[cfg(feature = "endpoint")]
    pub use crate::endpoint::*;
}

// Re-export commonly used items at crate root
pub use crate::core::{RmError, SequenceFault};
pub use crate::protocol::{
    AckRange, EndpointReference, Identifier, RmMessage, SequenceAcknowledgement, SequenceType,
};

#[cfg(feature = "endpoint")]
pub use crate::endpoint::{RmConfig, RmEndpoint, RmEvent};
