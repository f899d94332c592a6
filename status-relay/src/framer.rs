//! Pulls exactly one frame off an async byte stream.
//!
//! The header byte has already been consumed by the caller (the dispatcher
//! reads it to pick a handler), so reading resumes at the first byte after it.
//! Every read is a `read_exact`: bytes arrive across as many suspensions as
//! the transport needs and none are dropped or read twice.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{
    codec::{AckMessage, FIELD_CHUNK_LEN, MessageKind, StatusMessage, TEXT_WIDTH},
    error::{CodecError, InvalidMessage},
};

/// Where a kind's variable part is announced and how large each entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// Bytes between the header and the variable part (or the checksum).
    pub prefix_len: usize,
    /// Offset of the entry count inside the prefix, if the kind has one.
    pub count_offset: Option<usize>,
    pub chunk_len: usize,
}

impl MessageKind {
    pub const fn layout(self) -> FrameLayout {
        match self {
            MessageKind::Status => FrameLayout {
                prefix_len: 2 + TEXT_WIDTH + 1 + 1,
                count_offset: Some(2 + TEXT_WIDTH + 1),
                chunk_len: FIELD_CHUNK_LEN,
            },
            MessageKind::Ack => FrameLayout {
                prefix_len: 2,
                count_offset: None,
                chunk_len: 0,
            },
        }
    }
}

/// Reads the rest of a frame of `kind` whose header byte was `header`,
/// returning the whole frame, header and checksum included.
pub async fn read_frame<R>(
    reader: &mut R,
    kind: MessageKind,
    header: u8,
) -> Result<Vec<u8>, CodecError>
where
    R: AsyncRead + Unpin,
{
    if !kind.owns(header) {
        return Err(InvalidMessage::Header(header).into());
    }

    let layout = kind.layout();
    let mut frame = vec![0u8; 1 + layout.prefix_len];
    frame[0] = header;
    reader.read_exact(&mut frame[1..]).await?;

    let count = layout
        .count_offset
        .map_or(0, |offset| usize::from(frame[1 + offset]));
    let variable = count * layout.chunk_len;

    // Variable part plus the checksum byte.
    let start = frame.len();
    frame.resize(start + variable + 1, 0);
    reader.read_exact(&mut frame[start..]).await?;

    Ok(frame)
}

impl StatusMessage {
    /// Reads and decodes one status message whose header was already read.
    pub async fn read_from<R>(reader: &mut R, header: u8) -> Result<Self, CodecError>
    where
        R: AsyncRead + Unpin,
    {
        let frame = read_frame(reader, MessageKind::Status, header).await?;
        StatusMessage::decode(&frame)
    }
}

impl AckMessage {
    /// Reads and decodes one acknowledgement whose header was already read.
    pub async fn read_from<R>(reader: &mut R, header: u8) -> Result<Self, CodecError>
    where
        R: AsyncRead + Unpin,
    {
        let frame = read_frame(reader, MessageKind::Ack, header).await?;
        AckMessage::decode(&frame)
    }
}
