//! In-memory stand-ins for the collaborator ports, used by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use futures_util::{stream, StreamExt};

use crate::core::ports::{
    ByteStream, CheckpointStore, EventStore, MetricsSink, PlatformApi, PlatformReply, SubscriptionStore,
};
use crate::errors::{IngestError, IngestResult};
use crate::model::{Credential, MetricRecord, SubscriptionRecord, TelemetryEvent};

/// Ordered record of side effects across several fakes.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// One scripted response to `open_stream`.
pub enum ScriptedStream {
    Chunks(Vec<&'static str>),
    Fail(IngestError),
}

pub struct FakePlatform {
    login: Mutex<IngestResult<Credential>>,
    refresh: Mutex<IngestResult<Credential>>,
    refresh_calls: AtomicUsize,
    login_calls: AtomicUsize,
    keepalive_calls: AtomicUsize,
    keepalive_fails: AtomicBool,
    statuses: Mutex<HashMap<String, u16>>,
    subscribe_calls: Mutex<Vec<(String, String)>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    stream_calls: AtomicUsize,
    journal: Journal,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::with_journal(Journal::default())
    }

    pub fn with_journal(journal: Journal) -> Self {
        let far = Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap();
        Self {
            login: Mutex::new(Ok(Credential { access_token: "t0".into(), expires_at: far })),
            refresh: Mutex::new(Ok(Credential { access_token: "t0-refreshed".into(), expires_at: far })),
            refresh_calls: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            keepalive_calls: AtomicUsize::new(0),
            keepalive_fails: AtomicBool::new(false),
            statuses: Mutex::new(HashMap::new()),
            subscribe_calls: Mutex::new(Vec::new()),
            streams: Mutex::new(VecDeque::new()),
            stream_calls: AtomicUsize::new(0),
            journal,
        }
    }

    pub fn set_login(&self, result: IngestResult<Credential>) {
        *self.login.lock().unwrap() = result;
    }

    pub fn set_refresh(&self, result: IngestResult<Credential>) {
        *self.refresh.lock().unwrap() = result;
    }

    pub fn set_status(&self, guid: &str, status: u16) {
        self.statuses.lock().unwrap().insert(guid.to_string(), status);
    }

    pub fn fail_keepalive(&self, fail: bool) {
        self.keepalive_fails.store(fail, Ordering::SeqCst);
    }

    pub fn push_stream(&self, stream: ScriptedStream) {
        self.streams.lock().unwrap().push_back(stream);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn keepalive_calls(&self) -> usize {
        self.keepalive_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// `(stream_id, guid)` of every subscribe call, in order.
    pub fn subscribe_calls(&self) -> Vec<(String, String)> {
        self.subscribe_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformApi for FakePlatform {
    async fn login(&self, _username: &str, _password: &str) -> IngestResult<Credential> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login.lock().unwrap().clone()
    }

    async fn refresh(&self, _token: &str) -> IngestResult<Credential> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.journal.push("refresh");
        self.refresh.lock().unwrap().clone()
    }

    async fn keepalive(&self, _token: &str) -> IngestResult<()> {
        self.keepalive_calls.fetch_add(1, Ordering::SeqCst);
        self.journal.push("keepalive");
        if self.keepalive_fails.load(Ordering::SeqCst) {
            return Err(IngestError::Transport("keepalive refused".into()));
        }
        Ok(())
    }

    async fn subscribe(&self, _token: &str, stream_id: &str, guid: &str) -> IngestResult<PlatformReply> {
        self.subscribe_calls.lock().unwrap().push((stream_id.to_string(), guid.to_string()));
        self.journal.push(format!("subscribe:{}", guid));
        let status = self
            .statuses
            .lock()
            .unwrap()
            .get(guid)
            .copied()
            .unwrap_or(200);
        Ok(PlatformReply { status, body: String::new() })
    }

    async fn open_stream(&self, _token: &str) -> IngestResult<ByteStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        match self.streams.lock().unwrap().pop_front() {
            Some(ScriptedStream::Chunks(chunks)) => {
                let items: Vec<IngestResult<Bytes>> = chunks.into_iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
                Ok(stream::iter(items).boxed())
            }
            Some(ScriptedStream::Fail(e)) => Err(e),
            None => Err(IngestError::Transport("no stream scripted".into())),
        }
    }
}

/// Builds a body stream from static chunks.
pub fn byte_stream(chunks: Vec<&'static str>) -> ByteStream {
    let items: Vec<IngestResult<Bytes>> = chunks.into_iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
    stream::iter(items).boxed()
}

#[derive(Default)]
pub struct MemoryEventStore {
    pub events: Mutex<Vec<TelemetryEvent>>,
    pub fail: AtomicBool,
    journal: Journal,
}

impl MemoryEventStore {
    pub fn with_journal(journal: Journal) -> Self {
        Self { journal, ..Default::default() }
    }

    pub fn stored(&self) -> Vec<TelemetryEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: &TelemetryEvent) -> IngestResult<()> {
        self.journal.push(format!("persist:{}", event.event_id.as_deref().unwrap_or("-")));
        if self.fail.load(Ordering::SeqCst) {
            return Err(IngestError::Persistence("database unavailable".into()));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySubscriptionStore {
    pub records: Mutex<Vec<SubscriptionRecord>>,
    pub fail: AtomicBool,
}

impl MemorySubscriptionStore {
    pub fn seeded(guids: &[&str]) -> Self {
        let store = Self::default();
        store.records.lock().unwrap().extend(guids.iter().map(|g| SubscriptionRecord::active(*g)));
        store
    }

    pub fn stored(&self) -> Vec<SubscriptionRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn active_guids(&self) -> IngestResult<Vec<String>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IngestError::Persistence("database unavailable".into()));
        }
        Ok(self.records.lock().unwrap().iter().filter(|r| r.active).map(|r| r.guid.clone()).collect())
    }

    async fn add(&self, record: &SubscriptionRecord) -> IngestResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IngestError::Persistence("database unavailable".into()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    pub values: Mutex<HashMap<String, String>>,
    pub writes: Mutex<Vec<String>>,
    pub fail: AtomicBool,
    journal: Journal,
}

impl MemoryCheckpointStore {
    pub fn with_journal(journal: Journal) -> Self {
        Self { journal, ..Default::default() }
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn set(&self, key: &str, value: &str) -> IngestResult<()> {
        self.journal.push(format!("checkpoint:{}", value));
        self.writes.lock().unwrap().push(value.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(IngestError::Persistence("redis unavailable".into()));
        }
        self.values.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> IngestResult<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub records: Mutex<Vec<MetricRecord>>,
    pub fail: AtomicBool,
    journal: Journal,
}

impl MemorySink {
    pub fn with_journal(journal: Journal) -> Self {
        Self { journal, ..Default::default() }
    }

    pub fn forwarded(&self) -> Vec<MetricRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsSink for MemorySink {
    async fn forward(&self, record: &MetricRecord) -> IngestResult<()> {
        self.journal.push(format!("forward:{}", record.guid));
        if self.fail.load(Ordering::SeqCst) {
            return Err(IngestError::Sink("influx unavailable".into()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
