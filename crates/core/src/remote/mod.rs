//! Remote log store, partitioned as `logs/{actorId}/{sessionId}/{recordId}`.
//!
//! Each actor may read and write only its own partition. `scan_all` is the
//! privileged cross-partition read used by the aggregation engine; callers
//! check [`RemoteStore::has_all_logs_read`] first.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    events::{Envelope, RemoteRecord},
    types::{ActorId, SessionId},
};

pub use http::HttpRemoteStore;
pub use memory::MemoryRemoteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSpan {
    pub oldest: i64,
    pub newest: i64,
}

#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Write one envelope into `logs/{actor}/{envelope.session_id}` and return
    /// the assigned record id.
    async fn append(&self, actor: &ActorId, envelope: &Envelope) -> Result<String>;

    /// Session groups present under the actor's partition.
    async fn list_sessions(&self, actor: &ActorId) -> Result<Vec<SessionId>>;

    /// Oldest and newest record timestamps of one session group, `None` if
    /// the group is empty or absent.
    async fn session_span(
        &self,
        actor: &ActorId,
        session: &SessionId,
    ) -> Result<Option<SessionSpan>>;

    /// Delete an entire session group in one operation.
    async fn delete_session(&self, actor: &ActorId, session: &SessionId) -> Result<usize>;

    /// Records of one actor with `start <= timestamp <= end`, oldest first.
    async fn query_actor(
        &self,
        actor: &ActorId,
        start: i64,
        end: i64,
    ) -> Result<Vec<RemoteRecord>>;

    /// Every record across every partition with `start <= timestamp <= end`.
    async fn scan_all(&self, start: i64, end: i64) -> Result<Vec<RemoteRecord>>;

    async fn has_all_logs_read(&self, actor: &ActorId) -> Result<bool>;
}
