//! Binary wire format for status reports and acknowledgements.
//!
//! Every frame starts with a header byte naming its kind and ends with a
//! checksum byte: the XOR of every byte before it. Integers are big-endian.
//!
//! ```text
//! status: [0x01][seq:2][source id:8][status:1][count:1][count x (name:8 value:4)][checksum:1]
//! ack:    [0x11 | 0x12][seq:2][checksum:1]
//! ```
//!
//! Text slots are fixed at eight bytes, left-padded with zeros; decoding drops
//! every zero byte from the slot.

use std::{collections::BTreeMap, fmt};

use crate::{
    error::{CodecError, DecodeError, EncodeError, InvalidMessage, StateError},
    status::Status,
};

pub const STATUS_HEADER: u8 = 0x01;
pub const ACK_SUCCESS_HEADER: u8 = 0x11;
pub const ACK_ERROR_HEADER: u8 = 0x12;

/// Width of every text slot (source id, field name).
pub const TEXT_WIDTH: usize = 8;
/// Bytes taken by one field: name slot plus a 4-byte value.
pub const FIELD_CHUNK_LEN: usize = TEXT_WIDTH + 4;
pub const MAX_FIELDS: usize = u8::MAX as usize;

/// Header, sequence, source id, status, count and checksum.
pub const STATUS_MIN_LEN: usize = 1 + 2 + TEXT_WIDTH + 1 + 1 + 1;
pub const ACK_LEN: usize = 1 + 2 + 1;

/// Field set carried by a status message. Ordered by name, which is also the
/// order on the wire.
pub type Fields = BTreeMap<String, u32>;

/// The message kinds the protocol knows, each owning a set of header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    Status,
    Ack,
}

impl MessageKind {
    pub const fn headers(self) -> &'static [u8] {
        match self {
            MessageKind::Status => &[STATUS_HEADER],
            MessageKind::Ack => &[ACK_SUCCESS_HEADER, ACK_ERROR_HEADER],
        }
    }

    pub fn owns(self, header: u8) -> bool {
        self.headers().contains(&header)
    }
}

/// XOR-fold of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, byte| acc ^ byte)
}

/// Status report sent by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    sequence: u16,
    source_id: String,
    status: Status,
    fields: Fields,
}

impl StatusMessage {
    pub fn new(sequence: u16, source_id: impl Into<String>, status: Status) -> Self {
        Self {
            sequence,
            source_id: source_id.into(),
            status,
            fields: Fields::new(),
        }
    }

    /// Builds a message from a raw status byte, rejecting bytes outside the
    /// defined statuses.
    pub fn with_status_code(
        sequence: u16,
        source_id: impl Into<String>,
        code: u8,
    ) -> Result<Self, StateError> {
        Ok(Self::new(sequence, source_id, Status::try_from(code)?))
    }

    #[must_use]
    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: u32) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let count = self.fields.len();
        if count > MAX_FIELDS {
            return Err(EncodeError::FieldCount(count));
        }

        let mut frame = Vec::with_capacity(STATUS_MIN_LEN + count * FIELD_CHUNK_LEN);
        frame.push(STATUS_HEADER);
        frame.extend_from_slice(&self.sequence.to_be_bytes());
        frame.extend_from_slice(&text_slot(&self.source_id));
        frame.push(self.status.code());
        frame.push(count as u8);
        for (name, value) in &self.fields {
            if name.len() > TEXT_WIDTH {
                return Err(EncodeError::FieldName(name.clone()));
            }
            frame.extend_from_slice(&text_slot(name));
            frame.extend_from_slice(&value.to_be_bytes());
        }

        Ok(seal(frame))
    }

    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        let body = verified_body(frame, STATUS_MIN_LEN)?;

        let header = body[0];
        if !MessageKind::Status.owns(header) {
            return Err(InvalidMessage::Header(header).into());
        }

        let sequence = u16::from_be_bytes([body[1], body[2]]);
        let source_id = slot_text(&body[3..3 + TEXT_WIDTH])?;
        let code = body[11];
        let status = Status::try_from(code).map_err(|_| InvalidMessage::Status(code))?;
        let count = usize::from(body[12]);

        let chunks = &body[13..];
        let expected = count * FIELD_CHUNK_LEN;
        if chunks.len() < expected {
            return Err(DecodeError::Truncated {
                expected: STATUS_MIN_LEN + expected,
                actual: frame.len(),
            }
            .into());
        }
        if chunks.len() > expected {
            return Err(InvalidMessage::TrailingBytes(chunks.len() - expected).into());
        }

        let mut fields = Fields::new();
        for chunk in chunks.chunks_exact(FIELD_CHUNK_LEN) {
            let name = slot_text(&chunk[..TEXT_WIDTH])?;
            let value = u32::from_be_bytes([chunk[8], chunk[9], chunk[10], chunk[11]]);
            fields.insert(name, value);
        }

        Ok(Self {
            sequence,
            source_id,
            status,
            fields,
        })
    }

    /// Text pushed to listeners when this message is accepted.
    pub fn summary(&self) -> String {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(name, value)| format!("{name} | {value}"))
            .collect();
        format!("[{}] {}\n", self.source_id, fields.join("\r\n"))
    }
}

/// Narrows caller-supplied values into a field set.
pub fn fields_from_wide<I, K>(values: I) -> Result<Fields, EncodeError>
where
    I: IntoIterator<Item = (K, u64)>,
    K: Into<String>,
{
    values
        .into_iter()
        .map(|(name, value)| {
            let name = name.into();
            match u32::try_from(value) {
                Ok(narrow) => Ok((name, narrow)),
                Err(_) => Err(EncodeError::FieldValue { name, value }),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckOutcome {
    Success,
    Error,
}

/// Server reply to a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckMessage {
    outcome: AckOutcome,
    sequence: u16,
}

impl AckMessage {
    /// Validates `header` and, for error acknowledgements, that `sequence` is 0.
    pub fn new(header: u8, sequence: u16) -> Result<Self, InvalidMessage> {
        let outcome = match header {
            ACK_SUCCESS_HEADER => AckOutcome::Success,
            ACK_ERROR_HEADER if sequence == 0 => AckOutcome::Error,
            ACK_ERROR_HEADER => return Err(InvalidMessage::ErrorSequence(sequence)),
            other => return Err(InvalidMessage::Header(other)),
        };
        Ok(Self { outcome, sequence })
    }

    pub const fn success(sequence: u16) -> Self {
        Self {
            outcome: AckOutcome::Success,
            sequence,
        }
    }

    pub const fn error() -> Self {
        Self {
            outcome: AckOutcome::Error,
            sequence: 0,
        }
    }

    pub fn header(&self) -> u8 {
        match self.outcome {
            AckOutcome::Success => ACK_SUCCESS_HEADER,
            AckOutcome::Error => ACK_ERROR_HEADER,
        }
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn is_success(&self) -> bool {
        self.outcome == AckOutcome::Success
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(ACK_LEN);
        frame.push(self.header());
        frame.extend_from_slice(&self.sequence.to_be_bytes());
        seal(frame)
    }

    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        let body = verified_body(frame, ACK_LEN)?;
        if body.len() > ACK_LEN - 1 {
            return Err(InvalidMessage::TrailingBytes(body.len() + 1 - ACK_LEN).into());
        }
        let sequence = u16::from_be_bytes([body[1], body[2]]);
        Ok(Self::new(body[0], sequence)?)
    }
}

impl fmt::Display for AckMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            AckOutcome::Success => write!(f, "ok {}", self.sequence),
            AckOutcome::Error => f.write_str("err"),
        }
    }
}

fn seal(mut frame: Vec<u8>) -> Vec<u8> {
    frame.push(checksum(&frame));
    frame
}

/// Checks the minimum length and the trailing checksum, returning every byte
/// before the checksum.
fn verified_body(frame: &[u8], min_len: usize) -> Result<&[u8], CodecError> {
    if frame.len() < min_len {
        return Err(DecodeError::Truncated {
            expected: min_len,
            actual: frame.len(),
        }
        .into());
    }
    let (carried, body) = match frame.split_last() {
        Some((carried, body)) => (*carried, body),
        None => {
            return Err(DecodeError::Truncated {
                expected: min_len,
                actual: 0,
            }
            .into())
        }
    };
    let computed = checksum(body);
    if computed != carried {
        return Err(InvalidMessage::Checksum { computed, carried }.into());
    }
    Ok(body)
}

/// Keeps at most the leading `TEXT_WIDTH` bytes, never splitting a character.
fn text_slot(text: &str) -> [u8; TEXT_WIDTH] {
    let mut end = text.len().min(TEXT_WIDTH);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let kept = &text.as_bytes()[..end];
    let mut slot = [0u8; TEXT_WIDTH];
    slot[TEXT_WIDTH - kept.len()..].copy_from_slice(kept);
    slot
}

fn slot_text(slot: &[u8]) -> Result<String, InvalidMessage> {
    let kept: Vec<u8> = slot.iter().copied().filter(|byte| *byte != 0).collect();
    String::from_utf8(kept).map_err(|_| InvalidMessage::Text)
}
