//! Protocol data model.
//!
//! Implements:
//! - Opaque sequence identifiers and endpoint references
//! - Per-message sequence headers (identifier, number, last-message marker)
//! - Acknowledgement range sets with merge/containment algebra
//! - The protocol message union and its action-URI mapping
//! - A compact binary codec for non-SOAP transports and tests

mod codec;
mod message;
mod types;

pub use codec::*;
pub use message::*;
pub use types::*;
