use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::codec::MessageKind;

/// A value does not fit the width the wire format gives it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("sequence number {0} does not fit in 2 bytes")]
    Sequence(usize),
    #[error("{0} fields do not fit in a 1-byte count")]
    FieldCount(usize),
    #[error("field name {0:?} is longer than 8 bytes")]
    FieldName(String),
    #[error("value {value} of field {name:?} does not fit in 4 bytes")]
    FieldValue { name: String, value: u64 },
}

/// The frame ends before the bytes its layout requires.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// The frame is complete but its content is not acceptable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidMessage {
    #[error("checksum mismatch: computed {computed:#04x}, frame carries {carried:#04x}")]
    Checksum { computed: u8, carried: u8 },
    #[error("header {0:#04x} is not accepted for this message kind")]
    Header(u8),
    #[error("status byte {0:#04x} is not a defined status")]
    Status(u8),
    #[error("error acknowledgement carries nonzero sequence {0}")]
    ErrorSequence(u16),
    #[error("text field is not valid utf-8")]
    Text,
    #[error("{0} bytes follow the declared fields")]
    TrailingBytes(usize),
}

/// Failure to turn bytes (or a byte stream) into a message.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Invalid(#[from] InvalidMessage),
    #[error("stream error: {0}")]
    Io(#[from] io::Error),
}

/// An assignment that would leave a source in an undefined state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("status {0:#04x} is not allowed")]
    UnknownStatus(u8),
    #[error("source id {0:?} is longer than 8 bytes")]
    IdentifierTooLong(String),
}

/// Writing to a listener failed; the listener is dropped from the registry.
#[derive(Debug, Error)]
#[error("listener {addr} is gone: {source}")]
pub struct ListenerGone {
    pub addr: SocketAddr,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no handler registered for accepted message kind {0:?}")]
    MissingHandler(MessageKind),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Outcome of a message handler that did not succeed.
///
/// `Rejected` keeps the connection open and answers with an error
/// acknowledgement; `Io` ends the connection.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("message rejected: {0}")]
    Rejected(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("connection failed: {0}")]
    Io(#[from] io::Error),
}

impl From<CodecError> for HandlerError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(err) => HandlerError::Io(err),
            other => HandlerError::Rejected(Box::new(other)),
        }
    }
}

impl From<StateError> for HandlerError {
    fn from(err: StateError) -> Self {
        HandlerError::Rejected(Box::new(err))
    }
}

impl From<EncodeError> for HandlerError {
    fn from(err: EncodeError) -> Self {
        HandlerError::Rejected(Box::new(err))
    }
}
