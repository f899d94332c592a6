//! Listener bookkeeping and broadcast fan-out.
//!
//! Each listener owns a writer task fed by an unbounded channel. A broadcast
//! only queues text, so a slow socket delays nobody but its own listener; a
//! failed write ends that task and drops the listener from the registry.

use std::{
    collections::BTreeMap,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{mpsc, Mutex},
};
use tracing::{debug, info};

use crate::{error::ListenerGone, registry::SourceRegistry};

pub const NO_SOURCES: &str = "No sources yet";

type ListenerId = u64;

struct ListenerEntry {
    id: ListenerId,
    outbox: mpsc::UnboundedSender<Arc<str>>,
}

#[derive(Default)]
struct RegistryState {
    listeners: Mutex<BTreeMap<SocketAddr, ListenerEntry>>,
    next_id: AtomicU64,
}

/// Connected listeners keyed by peer address.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    state: Arc<RegistryState>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener and queues the current source snapshot as its first
    /// delivery.
    ///
    /// The snapshot is taken while the registry is locked, so no broadcast can
    /// reach this listener ahead of it.
    pub async fn register<W>(&self, addr: SocketAddr, writer: W, sources: &SourceRegistry)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbox, inbox) = mpsc::unbounded_channel();

        {
            let mut listeners = self.state.listeners.lock().await;
            let snapshot = snapshot_text(&sources.summaries().await);
            // The receiver is alive until the writer task below ends.
            let _ = outbox.send(Arc::from(snapshot));
            if listeners.insert(addr, ListenerEntry { id, outbox }).is_some() {
                debug!(%addr, "replaced listener registered at the same address");
            }
        }
        info!(%addr, "listener registered");

        let registry = self.clone();
        tokio::spawn(async move {
            if let Err(gone) = deliver(addr, writer, inbox).await {
                debug!(error = %gone, "listener write failed");
                if registry.remove_registration(addr, id).await {
                    info!(%addr, "listener removed");
                }
            }
        });
    }

    /// Queues `text` for every registered listener and returns how many it
    /// was queued to. A listener whose socket has closed still counts until
    /// its writer task fails and removes it; entries whose writer has already
    /// stopped are dropped here.
    pub async fn broadcast(&self, text: &str) -> usize {
        let text: Arc<str> = Arc::from(text);
        let mut listeners = self.state.listeners.lock().await;
        let mut queued = 0;
        listeners.retain(|addr, entry| match entry.outbox.send(Arc::clone(&text)) {
            Ok(()) => {
                queued += 1;
                true
            }
            Err(_) => {
                info!(%addr, "listener removed");
                false
            }
        });
        queued
    }

    /// Removes `addr` only if it still belongs to registration `id`.
    async fn remove_registration(&self, addr: SocketAddr, id: ListenerId) -> bool {
        let mut listeners = self.state.listeners.lock().await;
        if listeners.get(&addr).is_some_and(|entry| entry.id == id) {
            listeners.remove(&addr);
            return true;
        }
        false
    }

    pub async fn contains(&self, addr: SocketAddr) -> bool {
        self.state.listeners.lock().await.contains_key(&addr)
    }

    pub async fn len(&self) -> usize {
        self.state.listeners.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.listeners.lock().await.is_empty()
    }
}

/// Newline-joined source summaries, newline-terminated.
pub fn snapshot_text(summaries: &[String]) -> String {
    if summaries.is_empty() {
        return format!("{NO_SOURCES}\n");
    }
    let mut text = summaries.join("\n");
    text.push('\n');
    text
}

async fn deliver<W>(
    addr: SocketAddr,
    mut writer: W,
    mut inbox: mpsc::UnboundedReceiver<Arc<str>>,
) -> Result<(), ListenerGone>
where
    W: AsyncWrite + Unpin,
{
    while let Some(text) = inbox.recv().await {
        write_text(&mut writer, &text)
            .await
            .map_err(|source| ListenerGone { addr, source })?;
    }
    Ok(())
}

async fn write_text<W>(writer: &mut W, text: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{AsyncBufReadExt, BufReader, DuplexStream},
        time::timeout,
    };

    use super::*;
    use crate::{codec::StatusMessage, status::Status};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn read_line(reader: &mut BufReader<DuplexStream>) -> String {
        let mut line = String::new();
        timeout(Duration::from_secs(1), reader.read_line(&mut line))
            .await
            .expect("line within timeout")
            .expect("read line");
        line
    }

    async fn wait_for_len(registry: &ListenerRegistry, expected: usize) {
        timeout(Duration::from_secs(1), async {
            while registry.len().await != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("registry size settles");
    }

    async fn connect(
        registry: &ListenerRegistry,
        sources: &SourceRegistry,
        port: u16,
    ) -> BufReader<DuplexStream> {
        let (server_side, client_side) = tokio::io::duplex(1024);
        registry.register(addr(port), server_side, sources).await;
        BufReader::new(client_side)
    }

    #[test]
    fn snapshot_text_formats() {
        assert_eq!(snapshot_text(&[]), "No sources yet\n");
        assert_eq!(
            snapshot_text(&["[a] 1 | IDLE | 5".into(), "[b] 2 | ACTIVE | 9".into()]),
            "[a] 1 | IDLE | 5\n[b] 2 | ACTIVE | 9\n"
        );
    }

    #[tokio::test]
    async fn new_listener_gets_snapshot_before_broadcasts() {
        let registry = ListenerRegistry::new();
        let sources = SourceRegistry::new();
        sources
            .record(StatusMessage::new(3, "abc", Status::Active))
            .await
            .expect("record");

        let mut client = connect(&registry, &sources, 4000).await;
        assert_eq!(registry.broadcast("[abc] \n").await, 1);

        let snapshot = read_line(&mut client).await;
        assert!(snapshot.starts_with("[abc] 3 | ACTIVE | "), "{snapshot}");
        assert_eq!(read_line(&mut client).await, "[abc] \n");
    }

    #[tokio::test]
    async fn empty_registry_snapshot() {
        let registry = ListenerRegistry::new();
        let mut client = connect(&registry, &SourceRegistry::new(), 4001).await;
        assert_eq!(read_line(&mut client).await, "No sources yet\n");
        assert!(registry.contains(addr(4001)).await);
    }

    #[tokio::test]
    async fn failed_listener_does_not_stop_the_others() {
        let registry = ListenerRegistry::new();
        let sources = SourceRegistry::new();
        let mut first = connect(&registry, &sources, 5001).await;
        let mut second = connect(&registry, &sources, 5002).await;
        let mut third = connect(&registry, &sources, 5003).await;
        for client in [&mut first, &mut second, &mut third] {
            assert_eq!(read_line(client).await, "No sources yet\n");
        }

        drop(second);
        registry.broadcast("[dev] temp | 21\n").await;

        assert_eq!(read_line(&mut first).await, "[dev] temp | 21\n");
        assert_eq!(read_line(&mut third).await, "[dev] temp | 21\n");
        wait_for_len(&registry, 2).await;
        assert!(!registry.contains(addr(5002)).await);
        assert!(registry.contains(addr(5001)).await);
        assert!(registry.contains(addr(5003)).await);

        registry.broadcast("[dev] temp | 22\n").await;
        assert_eq!(read_line(&mut first).await, "[dev] temp | 22\n");
        assert_eq!(read_line(&mut third).await, "[dev] temp | 22\n");
    }

    #[tokio::test]
    async fn listener_closed_before_snapshot_is_removed() {
        let registry = ListenerRegistry::new();
        let (server_side, client_side) = tokio::io::duplex(64);
        drop(client_side);

        registry
            .register(addr(6000), server_side, &SourceRegistry::new())
            .await;
        wait_for_len(&registry, 0).await;
        assert!(registry.is_empty().await);
        assert_eq!(registry.broadcast("late\n").await, 0);
    }

    #[tokio::test]
    async fn stale_writer_does_not_remove_newer_registration() {
        let registry = ListenerRegistry::new();
        let sources = SourceRegistry::new();

        let (old_side, old_client) = tokio::io::duplex(64);
        registry.register(addr(7000), old_side, &sources).await;
        let mut fresh = connect(&registry, &sources, 7000).await;
        drop(old_client);

        assert_eq!(read_line(&mut fresh).await, "No sources yet\n");
        registry.broadcast("still here\n").await;
        assert_eq!(read_line(&mut fresh).await, "still here\n");
        assert!(registry.contains(addr(7000)).await);
    }
}
