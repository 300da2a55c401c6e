//! Reliable-messaging endpoint orchestration.
//!
//! [`RmEndpoint`] pairs one application endpoint with a
//! [`Source`](crate::source::Source), a
//! [`Destination`](crate::destination::Destination), and a [`Proxy`]
//! for outbound protocol messages, routes inbound protocol actions, and
//! runs the background resend task.

mod config;
#[allow(clippy::module_inception)]
mod endpoint;
mod proxy;

pub use config::*;
pub use endpoint::*;
pub use proxy::*;
