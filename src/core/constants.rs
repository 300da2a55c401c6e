//! Protocol constants.
//!
//! Namespace and action URIs are fixed by the WS-ReliableMessaging
//! February 2005 specification and MUST NOT be changed.

// =============================================================================
// NAMESPACES
// =============================================================================

/// WS-ReliableMessaging namespace.
pub const WSRM_NAMESPACE: &str = "http://schemas.xmlsoap.org/ws/2005/02/rm";

/// WS-Addressing anonymous endpoint URI.
///
/// An acksTo or replyTo carrying this address means "use the transport
/// back-channel of the current exchange".
pub const ANONYMOUS_ADDRESS: &str =
    "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";

// =============================================================================
// ACTION URIS
// =============================================================================

/// CreateSequence request action.
pub const ACTION_CREATE_SEQUENCE: &str =
    "http://schemas.xmlsoap.org/ws/2005/02/rm/CreateSequence";

/// CreateSequenceResponse action.
pub const ACTION_CREATE_SEQUENCE_RESPONSE: &str =
    "http://schemas.xmlsoap.org/ws/2005/02/rm/CreateSequenceResponse";

/// TerminateSequence action.
pub const ACTION_TERMINATE_SEQUENCE: &str =
    "http://schemas.xmlsoap.org/ws/2005/02/rm/TerminateSequence";

/// Standalone SequenceAcknowledgement action.
pub const ACTION_SEQUENCE_ACKNOWLEDGEMENT: &str =
    "http://schemas.xmlsoap.org/ws/2005/02/rm/SequenceAcknowledgement";

/// AckRequested action.
pub const ACTION_ACK_REQUESTED: &str =
    "http://schemas.xmlsoap.org/ws/2005/02/rm/AckRequested";

/// LastMessage action (application message carrying the last-message marker).
pub const ACTION_LAST_MESSAGE: &str =
    "http://schemas.xmlsoap.org/ws/2005/02/rm/LastMessage";

/// Sequence fault action.
pub const ACTION_SEQUENCE_FAULT: &str =
    "http://schemas.xmlsoap.org/ws/2005/02/rm/fault";

// =============================================================================
// FAULT CODES
// =============================================================================

/// Fault code: the referenced sequence identifier is not known.
pub const FAULT_CODE_UNKNOWN_SEQUENCE: &str = "wsrm:UnknownSequence";

/// Fault code: the sequence has been terminated.
pub const FAULT_CODE_SEQUENCE_TERMINATED: &str = "wsrm:SequenceTerminated";

/// Fault code: an acknowledgement violated the range invariants.
pub const FAULT_CODE_INVALID_ACKNOWLEDGEMENT: &str = "wsrm:InvalidAcknowledgement";

/// Fault code: the destination refused the CreateSequence request.
pub const FAULT_CODE_CREATE_SEQUENCE_REFUSED: &str = "wsrm:CreateSequenceRefused";

/// Fault code: a message number past the recorded last message was received.
pub const FAULT_CODE_LAST_MESSAGE_NUMBER_EXCEEDED: &str =
    "wsrm:LastMessageNumberExceeded";

/// Fault code: the message number space is exhausted.
pub const FAULT_CODE_MESSAGE_NUMBER_ROLLOVER: &str = "wsrm:MessageNumberRollover";

/// Fault code: the action URI is not recognized by this endpoint.
pub const FAULT_CODE_ACTION_NOT_SUPPORTED: &str = "wsa:ActionNotSupported";

// =============================================================================
// LIMITS
// =============================================================================

/// Largest assignable message number.
///
/// Allocation past this value faults with MessageNumberRollover instead of
/// wrapping.
pub const MAX_MESSAGE_NUMBER: u64 = u64::MAX - 1;
