use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, warn};

use crate::{
    config::PipelineConfig,
    events::BatchItem,
    queues::PendingQueue,
    remote::RemoteStore,
    workers::Worker,
};

#[derive(Debug)]
pub enum UploaderCommand {
    Enqueue(BatchItem),
    Flush {
        reply: Option<oneshot::Sender<FlushOutcome>>,
    },
    SetOnline(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending.
    Empty,
    /// Flushing is suspended until connectivity returns.
    Offline,
    Delivered(usize),
    /// The unconfirmed remainder went back to the front of the queue.
    Failed { delivered: usize, requeued: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct UploaderSettings {
    pub max_batch: usize,
    pub idle: Duration,
    pub periodic: Duration,
}

impl From<&PipelineConfig> for UploaderSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_batch: config.batch_max_size.max(1),
            idle: config.batch_idle(),
            periodic: config.periodic_flush(),
        }
    }
}

/// Batches attributed envelopes and writes them to the remote store.
///
/// Flush triggers: queue reaches `max_batch`, `idle` elapsed since the oldest
/// unflushed enqueue, the `periodic` tick, an explicit flush request, and
/// regaining connectivity.
pub struct Uploader {
    store: Arc<dyn RemoteStore>,
    settings: UploaderSettings,
    queue: PendingQueue,
    online: bool,
    idle_deadline: Option<Instant>,
    next_tick: Instant,
}

impl Uploader {
    pub fn new(store: Arc<dyn RemoteStore>, settings: UploaderSettings) -> Self {
        Self {
            store,
            settings,
            queue: PendingQueue::new(),
            online: true,
            idle_deadline: None,
            next_tick: Instant::now() + settings.periodic,
        }
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.queue
    }

    pub fn enqueue(&mut self, item: BatchItem) {
        self.queue.push(item);
        if self.idle_deadline.is_none() {
            self.idle_deadline = Some(Instant::now() + self.settings.idle);
        }
    }

    /// Snapshot the queue, clear it, and write the snapshot in order.
    ///
    /// Stops at the first failure and requeues everything not yet confirmed.
    pub async fn flush(&mut self) -> FlushOutcome {
        if self.queue.is_empty() {
            self.idle_deadline = None;
            return FlushOutcome::Empty;
        }
        if !self.online {
            self.idle_deadline = None;
            debug!(pending = self.queue.len(), "Skipping flush while offline");
            return FlushOutcome::Offline;
        }

        let batch = self.queue.take_snapshot();
        let total = batch.len();
        let mut delivered = 0;
        for item in &batch {
            match self.store.append(&item.actor_id, &item.envelope).await {
                Ok(_) => delivered += 1,
                Err(e) => {
                    warn!(
                        error = %e,
                        delivered,
                        remaining = total - delivered,
                        "Telemetry flush failed, requeueing unsent remainder"
                    );
                    break;
                }
            }
        }
        self.idle_deadline = None;

        if delivered == total {
            debug!(delivered, "Telemetry batch flushed");
            return FlushOutcome::Delivered(delivered);
        }
        let unsent: Vec<BatchItem> = batch.into_iter().skip(delivered).collect();
        let requeued = unsent.len();
        self.queue.requeue_front(unsent);
        FlushOutcome::Failed {
            delivered,
            requeued,
        }
    }
}

impl Worker for Uploader {
    const NAME: &'static str = "uploader";
    type Command = UploaderCommand;

    fn next_deadline(&self) -> Option<Instant> {
        Some(match self.idle_deadline {
            Some(idle) => idle.min(self.next_tick),
            None => self.next_tick,
        })
    }

    async fn handle(&mut self, command: UploaderCommand) -> Result<()> {
        match command {
            UploaderCommand::Enqueue(item) => {
                self.enqueue(item);
                if self.queue.len() >= self.settings.max_batch {
                    self.flush().await;
                }
            }
            UploaderCommand::Flush { reply } => {
                let outcome = self.flush().await;
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            UploaderCommand::SetOnline(online) => {
                let reconnected = online && !self.online;
                self.online = online;
                if reconnected {
                    self.flush().await;
                }
            }
        }
        Ok(())
    }

    async fn on_deadline(&mut self) -> Result<()> {
        let now = Instant::now();
        let idle_due = self.idle_deadline.is_some_and(|d| d <= now);
        let tick_due = self.next_tick <= now;
        if tick_due {
            self.next_tick = now + self.settings.periodic;
        }
        if idle_due || tick_due {
            self.flush().await;
        }
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        let outcome = self.flush().await;
        if matches!(outcome, FlushOutcome::Failed { .. } | FlushOutcome::Offline) {
            warn!(
                pending = self.queue.len(),
                ?outcome,
                "Telemetry uploader stopped with undelivered items"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        error::{BeaconError, Result as BeaconResult},
        events::{Envelope, EventData, Level, RemoteRecord},
        remote::{MemoryRemoteStore, SessionSpan},
        types::{ActorId, SessionId},
    };

    /// Accepts `accept` appends, then fails every append until reset.
    struct FlakyStore {
        inner: MemoryRemoteStore,
        accept: AtomicUsize,
    }

    impl FlakyStore {
        fn new(accept: usize) -> Self {
            Self {
                inner: MemoryRemoteStore::new(),
                accept: AtomicUsize::new(accept),
            }
        }

        fn heal(&self) {
            self.accept.store(usize::MAX, Ordering::SeqCst);
        }

        fn delivered(&self) -> Vec<i64> {
            let mut stamps: Vec<i64> = self
                .inner
                .records_for(&ActorId::new("alice"))
                .iter()
                .map(|r| r.envelope.timestamp)
                .collect();
            stamps.sort();
            stamps
        }
    }

    #[async_trait]
    impl RemoteStore for FlakyStore {
        async fn append(&self, actor: &ActorId, envelope: &Envelope) -> BeaconResult<String> {
            let allowed = self
                .accept
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !allowed {
                return Err(BeaconError::RemoteUnavailable {
                    reason: "injected".into(),
                });
            }
            self.inner.append(actor, envelope).await
        }

        async fn list_sessions(&self, actor: &ActorId) -> BeaconResult<Vec<SessionId>> {
            self.inner.list_sessions(actor).await
        }

        async fn session_span(
            &self,
            actor: &ActorId,
            session: &SessionId,
        ) -> BeaconResult<Option<SessionSpan>> {
            self.inner.session_span(actor, session).await
        }

        async fn delete_session(
            &self,
            actor: &ActorId,
            session: &SessionId,
        ) -> BeaconResult<usize> {
            self.inner.delete_session(actor, session).await
        }

        async fn query_actor(
            &self,
            actor: &ActorId,
            start: i64,
            end: i64,
        ) -> BeaconResult<Vec<RemoteRecord>> {
            self.inner.query_actor(actor, start, end).await
        }

        async fn scan_all(&self, start: i64, end: i64) -> BeaconResult<Vec<RemoteRecord>> {
            self.inner.scan_all(start, end).await
        }

        async fn has_all_logs_read(&self, actor: &ActorId) -> BeaconResult<bool> {
            self.inner.has_all_logs_read(actor).await
        }
    }

    fn item(n: i64) -> BatchItem {
        BatchItem {
            actor_id: ActorId::new("alice"),
            envelope: Envelope {
                timestamp: n,
                session_id: SessionId::new("s"),
                level: Level::Info,
                category: "Sync".into(),
                message: format!("m{n}"),
                data: EventData::new(),
            },
        }
    }

    fn settings(max_batch: usize) -> UploaderSettings {
        UploaderSettings {
            max_batch,
            idle: Duration::from_secs(5),
            periodic: Duration::from_secs(60),
        }
    }

    fn pending_stamps(uploader: &Uploader) -> Vec<i64> {
        uploader
            .pending()
            .iter()
            .map(|i| i.envelope.timestamp)
            .collect()
    }

    #[tokio::test]
    async fn partial_failure_requeues_unsent_suffix_ahead_of_new_items() {
        let store = Arc::new(FlakyStore::new(2));
        let mut uploader = Uploader::new(store.clone(), settings(100));
        for n in 1..=5 {
            uploader.enqueue(item(n));
        }

        let outcome = uploader.flush().await;
        assert_eq!(
            outcome,
            FlushOutcome::Failed {
                delivered: 2,
                requeued: 3
            }
        );
        uploader.enqueue(item(6));
        assert_eq!(pending_stamps(&uploader), vec![3, 4, 5, 6]);

        store.heal();
        assert_eq!(uploader.flush().await, FlushOutcome::Delivered(4));
        assert_eq!(store.delivered(), vec![1, 2, 3, 4, 5, 6]);
        assert!(uploader.pending().is_empty());
    }

    #[tokio::test]
    async fn reaching_max_batch_flushes_immediately() {
        let store = Arc::new(FlakyStore::new(usize::MAX));
        let mut uploader = Uploader::new(store.clone(), settings(3));
        for n in 1..=3 {
            uploader
                .handle(UploaderCommand::Enqueue(item(n)))
                .await
                .unwrap();
        }
        assert!(uploader.pending().is_empty());
        assert_eq!(store.delivered(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn offline_suspends_flush_until_reconnect() {
        let store = Arc::new(FlakyStore::new(usize::MAX));
        let mut uploader = Uploader::new(store.clone(), settings(100));
        uploader
            .handle(UploaderCommand::SetOnline(false))
            .await
            .unwrap();
        uploader.enqueue(item(1));

        assert_eq!(uploader.flush().await, FlushOutcome::Offline);
        assert_eq!(pending_stamps(&uploader), vec![1]);

        uploader
            .handle(UploaderCommand::SetOnline(true))
            .await
            .unwrap();
        assert_eq!(store.delivered(), vec![1]);
    }

    #[tokio::test]
    async fn empty_flush_is_a_no_op() {
        let store = Arc::new(FlakyStore::new(0));
        let mut uploader = Uploader::new(store, settings(10));
        assert_eq!(uploader.flush().await, FlushOutcome::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_deadline_tracks_oldest_enqueue() {
        let store = Arc::new(FlakyStore::new(usize::MAX));
        let mut uploader = Uploader::new(store, settings(10));
        let start = Instant::now();

        uploader.enqueue(item(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        uploader.enqueue(item(2));

        assert_eq!(
            uploader.next_deadline(),
            Some(start + Duration::from_secs(5))
        );
        uploader.flush().await;
        assert_eq!(
            uploader.next_deadline(),
            Some(start + Duration::from_secs(60))
        );
    }
}
