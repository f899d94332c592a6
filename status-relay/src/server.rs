use std::{
    future::Future,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    codec::{AckMessage, MessageKind, StatusMessage},
    dispatcher::{Connection, Dispatcher, HandlerFuture, MessageHandler},
    error::ServerError,
    listener::ListenerRegistry,
    registry::SourceRegistry,
};

pub const DEFAULT_INGEST_PORT: u16 = 8888;
pub const DEFAULT_BROADCAST_PORT: u16 = 8889;

/// Addresses of the two endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Where sources connect and send status frames.
    pub ingestion: SocketAddr,
    /// Where listeners connect to receive summaries.
    pub broadcast: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ingestion: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_INGEST_PORT)),
            broadcast: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_BROADCAST_PORT)),
        }
    }
}

pub struct RelayServer {
    ingestion: TcpListener,
    broadcast: TcpListener,
    state: Arc<ServerState>,
}

struct ServerState {
    sources: SourceRegistry,
    listeners: ListenerRegistry,
    dispatcher: Dispatcher,
}

impl RelayServer {
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let ingestion = bind(config.ingestion).await?;
        let broadcast = bind(config.broadcast).await?;
        Self::new(ingestion, broadcast)
    }

    /// Wires the handler table; fails if an accepted kind has no handler.
    pub fn new(ingestion: TcpListener, broadcast: TcpListener) -> Result<Self, ServerError> {
        let sources = SourceRegistry::new();
        let listeners = ListenerRegistry::new();
        let dispatcher = Dispatcher::builder()
            .accept(MessageKind::Status)
            .handler(
                MessageKind::Status,
                StatusHandler {
                    sources: sources.clone(),
                    listeners: listeners.clone(),
                },
            )
            .on_close(|peer| {
                // Sources reported over this connection stay registered.
                info!(%peer, "source connection closed");
            })
            .build()?;

        Ok(Self {
            ingestion,
            broadcast,
            state: Arc::new(ServerState {
                sources,
                listeners,
                dispatcher,
            }),
        })
    }

    pub fn ingestion_addr(&self) -> std::io::Result<SocketAddr> {
        self.ingestion.local_addr()
    }

    pub fn broadcast_addr(&self) -> std::io::Result<SocketAddr> {
        self.broadcast.local_addr()
    }

    pub fn sources(&self) -> SourceRegistry {
        self.state.sources.clone()
    }

    pub fn listeners(&self) -> ListenerRegistry {
        self.state.listeners.clone()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let RelayServer {
            ingestion,
            broadcast,
            state,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    break;
                }
                accept_result = ingestion.accept() => {
                    handle_source_accept(accept_result, &state);
                }
                accept_result = broadcast.accept() => {
                    handle_listener_accept(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

fn handle_source_accept(result: std::io::Result<(TcpStream, SocketAddr)>, state: &Arc<ServerState>) {
    match result {
        Ok((stream, peer)) => spawn_source_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept source connection"),
    }
}

fn spawn_source_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<ServerState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        info!(%peer, "source connected");
        let (reader, writer) = stream.into_split();
        state
            .dispatcher
            .serve(Connection::new(peer, reader, writer))
            .await;
    });
}

fn handle_listener_accept(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<ServerState>,
) {
    match result {
        Ok((stream, peer)) => {
            let state = Arc::clone(state);
            tokio::spawn(async move {
                state.listeners.register(peer, stream, &state.sources).await;
            });
        }
        Err(err) => warn!(error = ?err, "failed to accept listener connection"),
    }
}

/// Records a status message, acknowledges it and pushes its summary to the
/// listeners.
struct StatusHandler {
    sources: SourceRegistry,
    listeners: ListenerRegistry,
}

impl MessageHandler for StatusHandler {
    fn handle<'a>(&'a self, connection: &'a mut Connection, header: u8) -> HandlerFuture<'a> {
        Box::pin(async move {
            let message = StatusMessage::read_from(connection.reader(), header).await?;
            let sequence = message.sequence();
            let summary = message.summary();
            debug!(
                peer = %connection.peer(),
                source = message.source_id(),
                sequence,
                status = %message.status(),
                "status received"
            );

            self.sources.record(message).await?;
            connection.send(&AckMessage::success(sequence).encode()).await?;

            let queued = self.listeners.broadcast(&summary).await;
            debug!(queued, "summary broadcast");
            Ok(())
        })
    }
}
