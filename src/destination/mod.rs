//! Receiving-side sequence state.
//!
//! [`DestinationSequence`] tracks accepted message-number ranges and
//! builds acknowledgements; [`Destination`] (behind the `endpoint`
//! feature) owns the registry and the create/terminate lifecycle.

mod sequence;

pub use sequence::*;

#[cfg(feature = "endpoint")]
#[allow(clippy::module_inception)]
mod destination;

#[cfg(feature = "endpoint")]
pub use destination::*;
