//! At-least-once delivery engine.
//!
//! Every outbound sequenced message is tracked until the destination
//! acknowledges it or its retry budget runs out. [`PendingEntry`] is the
//! pure per-message timer state; [`RetransmissionQueue`] (behind the
//! `endpoint` feature) holds the per-sequence pending sets driven by the
//! endpoint's background resend task.

mod entry;

pub use entry::*;

#[cfg(feature = "endpoint")]
mod queue;

#[cfg(feature = "endpoint")]
pub use queue::*;
