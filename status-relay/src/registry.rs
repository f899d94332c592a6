//! Source state kept by the server.

use std::{
    collections::{btree_map::Entry, BTreeMap},
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

use crate::{
    codec::{Fields, StatusMessage, TEXT_WIDTH},
    error::{EncodeError, StateError},
    status::Status,
};

/// A status message together with the instant it was recorded.
#[derive(Debug, Clone)]
pub struct Received {
    pub message: StatusMessage,
    pub received_at: Instant,
}

/// A reporting peer: its identifier, current status and message history.
#[derive(Debug, Clone)]
pub struct Source {
    id: String,
    status: Status,
    history: Vec<Received>,
}

impl Source {
    pub fn new(id: impl Into<String>, status: Status) -> Result<Self, StateError> {
        let id = id.into();
        if id.len() > TEXT_WIDTH {
            return Err(StateError::IdentifierTooLong(id));
        }
        Ok(Self {
            id,
            status,
            history: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Assigns a raw status byte, leaving the status unchanged if the byte is
    /// not a defined status.
    pub fn set_status_code(&mut self, code: u8) -> Result<(), StateError> {
        self.status = Status::try_from(code)?;
        Ok(())
    }

    pub fn history(&self) -> &[Received] {
        &self.history
    }

    pub fn last_message(&self) -> Option<&Received> {
        self.history.last()
    }

    /// Takes the status carried by `message` and appends it to the history.
    pub fn receive(&mut self, message: StatusMessage) {
        self.receive_at(message, Instant::now());
    }

    fn receive_at(&mut self, message: StatusMessage, received_at: Instant) {
        self.status = message.status();
        self.history.push(Received {
            message,
            received_at,
        });
    }

    /// Builds the next outgoing message for this source, numbered by the
    /// current history length, and records it.
    pub fn new_message(&mut self, fields: Fields) -> Result<StatusMessage, EncodeError> {
        let sequence = u16::try_from(self.history.len())
            .map_err(|_| EncodeError::Sequence(self.history.len()))?;
        let message = StatusMessage::new(sequence, self.id.clone(), self.status).with_fields(fields);
        self.receive(message.clone());
        Ok(message)
    }

    pub fn since_last_message(&self, now: Instant) -> Option<Duration> {
        self.last_message()
            .map(|last| now.saturating_duration_since(last.received_at))
    }

    /// `[<id>] <sequence> | <status> | <ms since last message>`, with `-` for
    /// values that do not exist yet.
    pub fn summary_at(&self, now: Instant) -> String {
        let sequence = self
            .last_message()
            .map_or_else(|| "-".to_string(), |last| last.message.sequence().to_string());
        let elapsed = self
            .since_last_message(now)
            .map_or_else(|| "-".to_string(), |elapsed| elapsed.as_millis().to_string());
        format!("[{}] {} | {} | {}", self.id, sequence, self.status, elapsed)
    }

    pub fn summary(&self) -> String {
        self.summary_at(Instant::now())
    }
}

/// Every source the server has heard from, keyed by identifier.
///
/// One lock covers each lookup-or-create-and-append, so a reader never sees a
/// source half created and two updates for the same identifier never
/// interleave.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Arc<Mutex<BTreeMap<String, Source>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a received message, creating its source on first contact.
    ///
    /// No ownership check is made: any connection naming an identifier updates
    /// that source.
    pub async fn record(&self, message: StatusMessage) -> Result<(), StateError> {
        let mut sources = self.sources.lock().await;
        let source = match sources.entry(message.source_id().to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                entry.insert(Source::new(message.source_id(), message.status())?)
            }
        };
        source.receive(message);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Source> {
        self.sources.lock().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sources.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sources.lock().await.is_empty()
    }

    /// Summary of every source in identifier order.
    pub async fn summaries(&self) -> Vec<String> {
        let now = Instant::now();
        self.sources
            .lock()
            .await
            .values()
            .map(|source| source.summary_at(now))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_long_identifier() {
        assert_eq!(
            Source::new("abcdefghi", Status::Idle).err(),
            Some(StateError::IdentifierTooLong("abcdefghi".into()))
        );
        assert!(Source::new("abcdefgh", Status::Idle).is_ok());
    }

    #[test]
    fn rejects_unknown_status_assignment() {
        let mut source = Source::new("abc", Status::Active).expect("source");
        assert_eq!(
            source.set_status_code(0x22),
            Err(StateError::UnknownStatus(0x22))
        );
        assert_eq!(source.status(), Status::Active);
        source.set_status_code(0x03).expect("defined status");
        assert_eq!(source.status(), Status::Recharging);
    }

    #[test]
    fn receive_updates_status_and_history() {
        let mut source = Source::new("abc", Status::Idle).expect("source");
        source.receive(StatusMessage::new(1, "abc", Status::Idle));
        source.receive(StatusMessage::new(2, "abc", Status::Recharging));

        assert_eq!(source.status(), Status::Recharging);
        assert_eq!(source.history().len(), 2);
        let last = source.last_message().expect("last message");
        assert_eq!(last.message.sequence(), 2);
    }

    #[test]
    fn new_message_numbers_by_history() {
        let mut source = Source::new("abc", Status::Recharging).expect("source");
        let first = source.new_message(Fields::new()).expect("first");
        let mut fields = Fields::new();
        fields.insert("hello".into(), 1);
        fields.insert("bye".into(), 2);
        let second = source.new_message(fields.clone()).expect("second");

        assert_eq!(first.sequence(), 0);
        assert_eq!(second.sequence(), 1);
        assert_eq!(second.source_id(), "abc");
        assert_eq!(second.status(), Status::Recharging);
        assert_eq!(second.fields(), &fields);
    }

    #[test]
    fn new_message_fails_once_sequence_space_is_used_up() {
        let mut source = Source::new("abc", Status::Active).expect("source");
        for _ in 0..=u16::MAX {
            source.new_message(Fields::new()).expect("sequence fits");
        }
        assert_eq!(source.history().len(), 65536);
        assert_eq!(
            source.new_message(Fields::new()).err(),
            Some(EncodeError::Sequence(65536))
        );
        assert_eq!(source.history().len(), 65536);
    }

    #[test]
    fn summary_reports_elapsed_milliseconds() {
        let mut source = Source::new("abc", Status::Active).expect("source");
        assert_eq!(source.summary(), "[abc] - | ACTIVE | -");

        let start = Instant::now();
        source.receive_at(StatusMessage::new(4, "abc", Status::Active), start);
        let later = start + Duration::from_millis(250);
        assert_eq!(source.summary_at(later), "[abc] 4 | ACTIVE | 250");
    }

    #[tokio::test]
    async fn record_creates_then_updates() {
        let registry = SourceRegistry::new();
        assert!(registry.is_empty().await);

        registry
            .record(StatusMessage::new(1, "pump", Status::Active))
            .await
            .expect("first record");
        registry
            .record(StatusMessage::new(2, "pump", Status::Idle))
            .await
            .expect("second record");
        registry
            .record(StatusMessage::new(1, "fan", Status::Recharging))
            .await
            .expect("other source");

        assert_eq!(registry.len().await, 2);
        let pump = registry.get("pump").await.expect("pump");
        assert_eq!(pump.status(), Status::Idle);
        assert_eq!(pump.history().len(), 2);

        let summaries = registry.summaries().await;
        assert_eq!(summaries.len(), 2);
        assert!(summaries[0].starts_with("[fan] 1 | RECHARGING | "));
        assert!(summaries[1].starts_with("[pump] 2 | IDLE | "));
    }

    #[tokio::test]
    async fn concurrent_records_for_one_source_all_land() {
        let registry = SourceRegistry::new();
        let mut tasks = Vec::new();
        for sequence in 0..32u16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .record(StatusMessage::new(sequence, "shared", Status::Active))
                    .await
            }));
        }
        for task in tasks {
            task.await.expect("join").expect("record");
        }

        let shared = registry.get("shared").await.expect("shared");
        assert_eq!(shared.history().len(), 32);
        assert_eq!(registry.len().await, 1);
    }
}
