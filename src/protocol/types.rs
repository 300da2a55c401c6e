//! Sequence identifiers, endpoint references, and acknowledgement ranges.

use rand::{RngCore, rngs::OsRng};

use crate::core::constants::ANONYMOUS_ADDRESS;

/// Opaque, globally unique token naming a sequence.
///
/// Immutable once created; equality and hashing are by string value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// Create an identifier from an existing token.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        let hi = u64::from_be_bytes(bytes[..8].try_into().expect("8-byte slice"));
        let lo = u64::from_be_bytes(bytes[8..].try_into().expect("8-byte slice"));
        Self(format!("urn:uuid:{hi:016x}{lo:016x}"))
    }

    /// The identifier token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Endpoint reference: the address messages for a party are sent to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointReference(String);

impl EndpointReference {
    /// Create a reference to a concrete address.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The WS-Addressing anonymous reference (transport back-channel).
    pub fn anonymous() -> Self {
        Self(ANONYMOUS_ADDRESS.to_owned())
    }

    /// Whether this is the anonymous back-channel reference.
    pub fn is_anonymous(&self) -> bool {
        self.0 == ANONYMOUS_ADDRESS
    }

    /// The address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EndpointReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointReference {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Per-message sequence header stamped on every application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceType {
    /// Sequence the message belongs to.
    pub identifier: Identifier,
    /// Message number within the sequence, starting at 1.
    pub message_number: u64,
    /// Whether this is the final message of the sequence.
    pub last_message: bool,
}

impl SequenceType {
    /// Create a sequence header.
    pub fn new(identifier: Identifier, message_number: u64) -> Self {
        Self {
            identifier,
            message_number,
            last_message: false,
        }
    }

    /// Mark this header as the final message of its sequence.
    pub fn last(mut self) -> Self {
        self.last_message = true;
        self
    }
}

/// Inclusive range of acknowledged message numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRange {
    /// Lowest message number in the range.
    pub lower: u64,
    /// Highest message number in the range.
    pub upper: u64,
}

impl AckRange {
    /// Create a range. `lower` must not exceed `upper`.
    pub fn new(lower: u64, upper: u64) -> Self {
        debug_assert!(lower <= upper, "ack range bounds out of order");
        Self { lower, upper }
    }

    /// Whether `n` falls inside this range.
    pub fn contains(&self, n: u64) -> bool {
        self.lower <= n && n <= self.upper
    }

    /// Number of message numbers covered by this range.
    pub fn width(&self) -> u64 {
        self.upper - self.lower + 1
    }
}

/// Set of message numbers a destination has received, as merged ranges.
///
/// Invariant: ranges are non-overlapping, ascending, and maximally merged;
/// `lower <= upper` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceAcknowledgement {
    identifier: Identifier,
    ranges: Vec<AckRange>,
}

impl SequenceAcknowledgement {
    /// Create an empty acknowledgement for a sequence.
    pub fn new(identifier: Identifier) -> Self {
        Self {
            identifier,
            ranges: Vec::new(),
        }
    }

    /// Create an acknowledgement from ranges received off the wire.
    ///
    /// The input is normalized: sorted, and overlapping or adjacent ranges
    /// are merged, so the invariant holds regardless of peer behavior.
    pub fn with_ranges(identifier: Identifier, mut ranges: Vec<AckRange>) -> Self {
        ranges.sort_by_key(|r| r.lower);
        let mut merged: Vec<AckRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.lower <= last.upper.saturating_add(1) => {
                    last.upper = last.upper.max(range.upper);
                }
                _ => merged.push(range),
            }
        }
        Self {
            identifier,
            ranges: merged,
        }
    }

    /// Sequence this acknowledgement refers to.
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// The acknowledged ranges, ascending and non-overlapping.
    pub fn ranges(&self) -> &[AckRange] {
        &self.ranges
    }

    /// Number of disjoint ranges (a proxy for gaps in delivery).
    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Insert a message number, merging with adjacent ranges.
    ///
    /// Returns `false` if the number was already covered; re-inserting is
    /// a no-op.
    pub fn insert(&mut self, message_number: u64) -> bool {
        debug_assert!(message_number >= 1, "message numbers start at 1");

        let mut i = 0;
        while i < self.ranges.len() && self.ranges[i].upper + 1 < message_number {
            i += 1;
        }
        if i == self.ranges.len() {
            self.ranges.push(AckRange::new(message_number, message_number));
            return true;
        }

        let range = &mut self.ranges[i];
        if range.contains(message_number) {
            return false;
        }
        if message_number + 1 == range.lower {
            // Extends the range downward; the scan guarantees a gap of at
            // least one below, so no merge with the previous range.
            range.lower = message_number;
        } else if message_number == range.upper + 1 {
            range.upper = message_number;
            if i + 1 < self.ranges.len() && self.ranges[i].upper + 1 == self.ranges[i + 1].lower {
                self.ranges[i].upper = self.ranges[i + 1].upper;
                self.ranges.remove(i + 1);
            }
        } else {
            self.ranges.insert(i, AckRange::new(message_number, message_number));
        }
        true
    }

    /// Whether `n` has been acknowledged.
    pub fn covers(&self, n: u64) -> bool {
        self.ranges.iter().any(|r| r.contains(n))
    }

    /// Whether every message number in `1..=n` is acknowledged.
    ///
    /// True only when the set has collapsed to the single range `[1, m]`
    /// with `m >= n` -- full contiguous coverage with no gaps.
    pub fn covers_through(&self, n: u64) -> bool {
        matches!(self.ranges.as_slice(), [r] if r.lower == 1 && r.upper >= n)
    }

    /// Highest acknowledged message number, if any.
    pub fn highest(&self) -> Option<u64> {
        self.ranges.last().map(|r| r.upper)
    }

    /// Total count of acknowledged message numbers.
    pub fn total_acknowledged(&self) -> u64 {
        self.ranges.iter().map(AckRange::width).sum()
    }

    /// Whether nothing has been acknowledged yet.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
