//! Per-connection read loop that routes frames to handlers by header byte.

use std::{collections::HashMap, future::Future, io, net::SocketAddr, pin::Pin, sync::Arc};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::{
    codec::{AckMessage, MessageKind},
    error::{HandlerError, ServerError},
};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One accepted ingestion connection.
pub struct Connection {
    peer: SocketAddr,
    reader: BufReader<BoxedReader>,
    writer: BoxedWriter,
}

impl Connection {
    pub fn new<R, W>(peer: SocketAddr, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            peer,
            reader: BufReader::new(Box::new(reader)),
            writer: Box::new(writer),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn reader(&mut self) -> &mut BufReader<BoxedReader> {
        &mut self.reader
    }

    pub async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.writer.write_all(frame).await?;
        self.writer.flush().await
    }
}

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;

/// Consumes the rest of a frame whose header byte the dispatcher has read.
pub trait MessageHandler: Send + Sync {
    fn handle<'a>(&'a self, connection: &'a mut Connection, header: u8) -> HandlerFuture<'a>;
}

type CloseHook = Box<dyn Fn(SocketAddr) + Send + Sync>;

/// Routing table from message kind to handler, fixed at build time.
pub struct Dispatcher {
    routes: Vec<(MessageKind, Arc<dyn MessageHandler>)>,
    fallback: Option<Arc<dyn MessageHandler>>,
    on_close: Option<CloseHook>,
}

#[derive(Default)]
pub struct DispatcherBuilder {
    accepted: Vec<MessageKind>,
    handlers: HashMap<MessageKind, Arc<dyn MessageHandler>>,
    fallback: Option<Arc<dyn MessageHandler>>,
    on_close: Option<CloseHook>,
}

impl DispatcherBuilder {
    /// Marks `kind` as accepted; it must be given a handler before `build`.
    pub fn accept(mut self, kind: MessageKind) -> Self {
        if !self.accepted.contains(&kind) {
            self.accepted.push(kind);
        }
        self
    }

    pub fn handler<H>(mut self, kind: MessageKind, handler: H) -> Self
    where
        H: MessageHandler + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Handler for header bytes no accepted kind owns. Without one those bytes
    /// are skipped.
    pub fn fallback<H>(mut self, handler: H) -> Self
    where
        H: MessageHandler + 'static,
    {
        self.fallback = Some(Arc::new(handler));
        self
    }

    /// Called once per connection after its read loop ends.
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        self.on_close = Some(Box::new(hook));
        self
    }

    pub fn build(mut self) -> Result<Dispatcher, ServerError> {
        let mut routes = Vec::with_capacity(self.accepted.len());
        for kind in self.accepted {
            let handler = self
                .handlers
                .remove(&kind)
                .ok_or(ServerError::MissingHandler(kind))?;
            routes.push((kind, handler));
        }
        for kind in self.handlers.keys() {
            debug!(?kind, "handler registered for a kind that is not accepted");
        }
        Ok(Dispatcher {
            routes,
            fallback: self.fallback,
            on_close: self.on_close,
        })
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    fn resolve(&self, header: u8) -> Option<&Arc<dyn MessageHandler>> {
        self.routes
            .iter()
            .find(|(kind, _)| kind.owns(header))
            .map(|(_, handler)| handler)
            .or(self.fallback.as_ref())
    }

    /// Runs the read loop until the peer goes away, then fires the close hook.
    pub async fn serve(&self, mut connection: Connection) {
        let peer = connection.peer();
        match self.read_loop(&mut connection).await {
            Ok(()) => debug!(%peer, "peer closed the connection"),
            Err(err) => debug!(%peer, error = %err, "connection failed"),
        }
        if let Some(hook) = &self.on_close {
            hook(peer);
        }
    }

    async fn read_loop(&self, connection: &mut Connection) -> io::Result<()> {
        let peer = connection.peer();
        loop {
            let header = match connection.reader.read_u8().await {
                Ok(header) => header,
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(err) => return Err(err),
            };

            let Some(handler) = self.resolve(header) else {
                debug!(%peer, header = format_args!("{header:#04x}"), "skipping unowned header");
                continue;
            };

            match handler.handle(connection, header).await {
                Ok(()) => {}
                Err(HandlerError::Rejected(reason)) => {
                    warn!(%peer, error = %reason, "rejected message");
                    connection.send(&AckMessage::error().encode()).await?;
                }
                Err(HandlerError::Io(err)) => return Err(err),
            }
        }
    }
}
