use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};
use tracing::{info, warn};

use crate::codec::{AckMessage, MessageKind, StatusMessage};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Connection to the ingestion endpoint.
pub struct SourceClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl SourceClient {
    pub async fn connect(server: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(server)
            .await
            .with_context(|| format!("failed to connect to {server}"))?;
        info!("connected to {}", server);

        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Sends one status message and waits for the server's acknowledgement.
    pub async fn send(&mut self, message: &StatusMessage) -> Result<AckMessage> {
        let frame = message.encode().context("failed to encode status message")?;
        self.send_frame(&frame).await
    }

    /// Sends pre-encoded bytes and waits for the next acknowledgement.
    pub async fn send_frame(&mut self, frame: &[u8]) -> Result<AckMessage> {
        self.writer.write_all(frame).await?;
        self.writer.flush().await?;
        self.read_ack().await
    }

    async fn read_ack(&mut self) -> Result<AckMessage> {
        let header = self
            .reader
            .read_u8()
            .await
            .context("server closed the connection")?;
        if !MessageKind::Ack.owns(header) {
            bail!("unexpected response header {header:#04x}");
        }
        let ack = AckMessage::read_from(&mut self.reader, header)
            .await
            .context("response message broken")?;
        Ok(ack)
    }

    pub async fn shutdown(mut self) {
        if let Err(error) = self.writer.shutdown().await {
            warn!(?error, "failed to shutdown source writer cleanly");
        }
    }
}

/// Connection to the broadcast endpoint.
pub struct ListenerClient {
    reader: BufReader<TcpStream>,
}

impl ListenerClient {
    pub async fn connect(server: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(server)
            .await
            .with_context(|| format!("failed to connect to {server}"))?;
        info!("listening on {}", server);
        Ok(Self {
            reader: BufReader::new(stream),
        })
    }

    /// Next line sent by the server without its line ending, or `None` once
    /// the server closes the connection.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let bytes = self.reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(LINE_ENDINGS).to_string()))
    }
}
