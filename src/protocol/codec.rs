//! Compact binary codec.
//!
//! Length-prefixed little-endian framing for deployments that do not run
//! over SOAP, and for loopback testing. A SOAP/XML envelope codec lives
//! outside this crate and plugs in through the same
//! [`ProtocolCodec`](crate::core::ProtocolCodec) trait.
//!
//! Wire format:
//! ```text
//! +0  Message type (1 byte)
//! +1  Body (type-dependent; strings and payloads are LE32
//!     length-prefixed, durations are LE64 milliseconds, optional
//!     fields carry a 1-byte presence flag)
//! ```

use std::time::Duration;

use crate::core::{DecodeError, EncodeError, ProtocolCodec};

use super::message::RmMessage;
use super::types::{
    AckRange, EndpointReference, Identifier, SequenceAcknowledgement, SequenceType,
};

/// Message type: CreateSequence.
const MSG_CREATE_SEQUENCE: u8 = 0x01;
/// Message type: CreateSequenceResponse.
const MSG_CREATE_SEQUENCE_RESPONSE: u8 = 0x02;
/// Message type: TerminateSequence.
const MSG_TERMINATE_SEQUENCE: u8 = 0x03;
/// Message type: standalone SequenceAcknowledgement.
const MSG_SEQUENCE_ACKNOWLEDGEMENT: u8 = 0x04;
/// Message type: AckRequested.
const MSG_ACK_REQUESTED: u8 = 0x05;
/// Message type: sequence fault.
const MSG_FAULT: u8 = 0x06;
/// Message type: application message with sequence header.
const MSG_APPLICATION: u8 = 0x07;

/// Largest length-prefixed field the codec will frame.
pub const MAX_FIELD_SIZE: usize = u32::MAX as usize;

/// Binary [`ProtocolCodec`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl BinaryCodec {
    /// Create a codec instance.
    pub fn new() -> Self {
        Self
    }
}

impl ProtocolCodec for BinaryCodec {
    fn encode(&self, message: &RmMessage) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::with_capacity(64);
        match message {
            RmMessage::CreateSequence {
                acks_to,
                offer,
                expires,
            } => {
                buf.push(MSG_CREATE_SEQUENCE);
                put_str(&mut buf, acks_to.as_str())?;
                put_opt_str(&mut buf, offer.as_ref().map(Identifier::as_str))?;
                put_opt_duration(&mut buf, *expires);
            }
            RmMessage::CreateSequenceResponse {
                identifier,
                accept,
                expires,
            } => {
                buf.push(MSG_CREATE_SEQUENCE_RESPONSE);
                put_str(&mut buf, identifier.as_str())?;
                put_opt_str(&mut buf, accept.as_ref().map(EndpointReference::as_str))?;
                put_opt_duration(&mut buf, *expires);
            }
            RmMessage::TerminateSequence { identifier } => {
                buf.push(MSG_TERMINATE_SEQUENCE);
                put_str(&mut buf, identifier.as_str())?;
            }
            RmMessage::SequenceAcknowledgement(ack) => {
                buf.push(MSG_SEQUENCE_ACKNOWLEDGEMENT);
                put_acknowledgement(&mut buf, ack)?;
            }
            RmMessage::AckRequested { identifier } => {
                buf.push(MSG_ACK_REQUESTED);
                put_str(&mut buf, identifier.as_str())?;
            }
            RmMessage::Fault { code, reason } => {
                buf.push(MSG_FAULT);
                put_str(&mut buf, code)?;
                put_str(&mut buf, reason)?;
            }
            RmMessage::Application {
                sequence,
                acks,
                reply_to,
                payload,
            } => {
                buf.push(MSG_APPLICATION);
                put_str(&mut buf, sequence.identifier.as_str())?;
                buf.extend_from_slice(&sequence.message_number.to_le_bytes());
                buf.push(sequence.last_message as u8);
                buf.extend_from_slice(&(acks.len() as u32).to_le_bytes());
                for ack in acks {
                    put_acknowledgement(&mut buf, ack)?;
                }
                put_opt_str(&mut buf, reply_to.as_ref().map(EndpointReference::as_str))?;
                put_bytes(&mut buf, payload)?;
            }
        }
        Ok(buf)
    }

    fn decode(&self, data: &[u8]) -> Result<RmMessage, DecodeError> {
        let mut reader = Reader::new(data);
        let msg_type = reader.take_u8()?;
        let message = match msg_type {
            MSG_CREATE_SEQUENCE => RmMessage::CreateSequence {
                acks_to: EndpointReference::new(reader.take_str()?),
                offer: reader.take_opt_str()?.map(Identifier::new),
                expires: reader.take_opt_duration()?,
            },
            MSG_CREATE_SEQUENCE_RESPONSE => RmMessage::CreateSequenceResponse {
                identifier: Identifier::new(reader.take_str()?),
                accept: reader.take_opt_str()?.map(EndpointReference::new),
                expires: reader.take_opt_duration()?,
            },
            MSG_TERMINATE_SEQUENCE => RmMessage::TerminateSequence {
                identifier: Identifier::new(reader.take_str()?),
            },
            MSG_SEQUENCE_ACKNOWLEDGEMENT => {
                RmMessage::SequenceAcknowledgement(reader.take_acknowledgement()?)
            }
            MSG_ACK_REQUESTED => RmMessage::AckRequested {
                identifier: Identifier::new(reader.take_str()?),
            },
            MSG_FAULT => RmMessage::Fault {
                code: reader.take_str()?,
                reason: reader.take_str()?,
            },
            MSG_APPLICATION => {
                let identifier = Identifier::new(reader.take_str()?);
                let message_number = reader.take_u64()?;
                let last_message = reader.take_u8()? != 0;
                let ack_count = reader.take_u32()? as usize;
                let mut acks = Vec::with_capacity(ack_count.min(64));
                for _ in 0..ack_count {
                    acks.push(reader.take_acknowledgement()?);
                }
                let reply_to = reader.take_opt_str()?.map(EndpointReference::new);
                let payload = reader.take_bytes()?;
                let mut sequence = SequenceType::new(identifier, message_number);
                sequence.last_message = last_message;
                RmMessage::Application {
                    sequence,
                    acks,
                    reply_to,
                    payload,
                }
            }
            other => return Err(DecodeError::UnknownMessageType(other)),
        };
        reader.finish()?;
        Ok(message)
    }
}

fn put_bytes(buf: &mut Vec<u8>, data: &[u8]) -> Result<(), EncodeError> {
    if data.len() > MAX_FIELD_SIZE {
        return Err(EncodeError::PayloadTooLarge {
            size: data.len(),
            max: MAX_FIELD_SIZE,
        });
    }
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
    Ok(())
}

fn put_str(buf: &mut Vec<u8>, s: &str) -> Result<(), EncodeError> {
    put_bytes(buf, s.as_bytes())
}

fn put_opt_str(buf: &mut Vec<u8>, s: Option<&str>) -> Result<(), EncodeError> {
    match s {
        Some(s) => {
            buf.push(1);
            put_str(buf, s)
        }
        None => {
            buf.push(0);
            Ok(())
        }
    }
}

fn put_opt_duration(buf: &mut Vec<u8>, d: Option<Duration>) {
    match d {
        Some(d) => {
            buf.push(1);
            buf.extend_from_slice(&(d.as_millis() as u64).to_le_bytes());
        }
        None => buf.push(0),
    }
}

fn put_acknowledgement(
    buf: &mut Vec<u8>,
    ack: &SequenceAcknowledgement,
) -> Result<(), EncodeError> {
    put_str(buf, ack.identifier().as_str())?;
    buf.extend_from_slice(&(ack.ranges().len() as u32).to_le_bytes());
    for range in ack.ranges() {
        buf.extend_from_slice(&range.lower.to_le_bytes());
        buf.extend_from_slice(&range.upper.to_le_bytes());
    }
    Ok(())
}

/// Cursor over wire bytes with bounds-checked reads.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn need(&self, n: usize) -> Result<(), DecodeError> {
        if self.data.len() - self.pos < n {
            return Err(DecodeError::TooShort {
                expected: self.pos + n,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    fn take_u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        let b = self.data[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn take_u32(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        let bytes = self.data[self.pos..self.pos + 4]
            .try_into()
            .expect("4-byte slice");
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes))
    }

    fn take_u64(&mut self) -> Result<u64, DecodeError> {
        self.need(8)?;
        let bytes = self.data[self.pos..self.pos + 8]
            .try_into()
            .expect("8-byte slice");
        self.pos += 8;
        Ok(u64::from_le_bytes(bytes))
    }

    fn take_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.take_u32()? as usize;
        self.need(len)?;
        let bytes = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(bytes)
    }

    fn take_str(&mut self) -> Result<String, DecodeError> {
        let bytes = self.take_bytes()?;
        String::from_utf8(bytes).map_err(|e| DecodeError::InvalidFormat(e.to_string()))
    }

    fn take_opt_str(&mut self) -> Result<Option<String>, DecodeError> {
        match self.take_u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.take_str()?)),
            other => Err(DecodeError::InvalidFormat(format!(
                "invalid presence flag: {other}"
            ))),
        }
    }

    fn take_opt_duration(&mut self) -> Result<Option<Duration>, DecodeError> {
        match self.take_u8()? {
            0 => Ok(None),
            1 => Ok(Some(Duration::from_millis(self.take_u64()?))),
            other => Err(DecodeError::InvalidFormat(format!(
                "invalid presence flag: {other}"
            ))),
        }
    }

    fn take_acknowledgement(&mut self) -> Result<SequenceAcknowledgement, DecodeError> {
        let identifier = Identifier::new(self.take_str()?);
        let count = self.take_u32()? as usize;
        let mut ranges = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let lower = self.take_u64()?;
            let upper = self.take_u64()?;
            if lower == 0 || lower > upper {
                return Err(DecodeError::InvalidFormat(format!(
                    "invalid ack range [{lower}, {upper}]"
                )));
            }
            ranges.push(AckRange::new(lower, upper));
        }
        Ok(SequenceAcknowledgement::with_ranges(identifier, ranges))
    }

    fn finish(self) -> Result<(), DecodeError> {
        if self.pos != self.data.len() {
            return Err(DecodeError::InvalidFormat(format!(
                "{} trailing bytes after message",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}
