use std::{
    collections::{BTreeMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    error::Result,
    events::{Envelope, RemoteRecord},
    remote::{RemoteStore, SessionSpan},
    types::{ActorId, SessionId, now_ms},
};

type Partition = BTreeMap<SessionId, Vec<RemoteRecord>>;

/// In-process remote store. Used for tests, demos and offline development.
#[derive(Default)]
pub struct MemoryRemoteStore {
    partitions: Mutex<BTreeMap<ActorId, Partition>>,
    privileged: Mutex<HashSet<ActorId>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant_all_logs_read(&self, actor: ActorId) {
        lock(&self.privileged).insert(actor);
    }

    /// Insert a record verbatim, bypassing server-side id/timestamp assignment.
    pub fn insert_record(&self, record: RemoteRecord) {
        lock(&self.partitions)
            .entry(record.actor_id.clone())
            .or_default()
            .entry(record.envelope.session_id.clone())
            .or_default()
            .push(record);
    }

    pub fn records_for(&self, actor: &ActorId) -> Vec<RemoteRecord> {
        lock(&self.partitions)
            .get(actor)
            .map(|p| p.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn total_records(&self) -> usize {
        lock(&self.partitions)
            .values()
            .flat_map(|p| p.values())
            .map(Vec::len)
            .sum()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn in_range(record: &RemoteRecord, start: i64, end: i64) -> bool {
    (start..=end).contains(&record.envelope.timestamp)
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn append(&self, actor: &ActorId, envelope: &Envelope) -> Result<String> {
        let record_id = Uuid::new_v4().to_string();
        self.insert_record(RemoteRecord {
            record_id: record_id.clone(),
            actor_id: actor.clone(),
            envelope: envelope.clone(),
            server_timestamp: now_ms(),
        });
        Ok(record_id)
    }

    async fn list_sessions(&self, actor: &ActorId) -> Result<Vec<SessionId>> {
        Ok(lock(&self.partitions)
            .get(actor)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn session_span(
        &self,
        actor: &ActorId,
        session: &SessionId,
    ) -> Result<Option<SessionSpan>> {
        let partitions = lock(&self.partitions);
        let Some(records) = partitions.get(actor).and_then(|p| p.get(session)) else {
            return Ok(None);
        };
        let stamps = records.iter().map(|r| r.envelope.timestamp);
        Ok(stamps
            .clone()
            .min()
            .zip(stamps.max())
            .map(|(oldest, newest)| SessionSpan { oldest, newest }))
    }

    async fn delete_session(&self, actor: &ActorId, session: &SessionId) -> Result<usize> {
        let mut partitions = lock(&self.partitions);
        let Some(partition) = partitions.get_mut(actor) else {
            return Ok(0);
        };
        let deleted = partition.remove(session).map_or(0, |records| records.len());
        if partition.is_empty() {
            partitions.remove(actor);
        }
        Ok(deleted)
    }

    async fn query_actor(
        &self,
        actor: &ActorId,
        start: i64,
        end: i64,
    ) -> Result<Vec<RemoteRecord>> {
        let mut records: Vec<RemoteRecord> = self
            .records_for(actor)
            .into_iter()
            .filter(|r| in_range(r, start, end))
            .collect();
        records.sort_by_key(|r| r.envelope.timestamp);
        Ok(records)
    }

    async fn scan_all(&self, start: i64, end: i64) -> Result<Vec<RemoteRecord>> {
        Ok(lock(&self.partitions)
            .values()
            .flat_map(|p| p.values())
            .flatten()
            .filter(|r| in_range(r, start, end))
            .cloned()
            .collect())
    }

    async fn has_all_logs_read(&self, actor: &ActorId) -> Result<bool> {
        Ok(lock(&self.privileged).contains(actor))
    }
}
