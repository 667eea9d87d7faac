use std::{
    io::Write,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
};

use console::Term;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    cache::LocalCache,
    config::BuildMode,
    events::{BatchItem, Envelope, EventData, Level},
    format::format_envelope_styled,
    queues::RingBuffer,
    types::{ActorId, SessionId, now_ms},
    workers::UploaderCommand,
};

/// Destination of the human-readable echo of every envelope.
pub type EchoSink = Box<dyn Write + Send>;

pub struct BusConfig {
    pub session_id: SessionId,
    pub build_mode: BuildMode,
    pub console_echo: bool,
}

#[derive(Default)]
pub struct BusMetrics {
    pub emitted_total: AtomicU64,
    pub cache_failures_total: AtomicU64,
    pub remote_gated_total: AtomicU64,
    pub upload_rejected_total: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    pub emitted: u64,
    pub cache_failures: u64,
    /// Withheld from the uploader by the build-mode or binding gate.
    pub remote_gated: u64,
    /// Dropped because the uploader had already stopped.
    pub upload_rejected: u64,
}

impl BusMetrics {
    pub fn snapshot(&self) -> BusStats {
        BusStats {
            emitted: self.emitted_total.load(Ordering::Relaxed),
            cache_failures: self.cache_failures_total.load(Ordering::Relaxed),
            remote_gated: self.remote_gated_total.load(Ordering::Relaxed),
            upload_rejected: self.upload_rejected_total.load(Ordering::Relaxed),
        }
    }
}

/// Builds envelopes and fans them out to the ring buffer, the local cache and
/// the uploader. Publishing never fails; sink errors go to the side channel.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

struct EventBusInner {
    session_id: SessionId,
    build_mode: BuildMode,
    echo: Mutex<Option<EchoSink>>,
    last_timestamp: AtomicI64,
    actor: RwLock<Option<ActorId>>,
    ring: RingBuffer,
    cache: Option<Arc<LocalCache>>,
    uploader: mpsc::UnboundedSender<UploaderCommand>,
    metrics: BusMetrics,
}

impl EventBus {
    pub fn new(
        cfg: BusConfig,
        ring: RingBuffer,
        cache: Option<Arc<LocalCache>>,
        uploader: mpsc::UnboundedSender<UploaderCommand>,
    ) -> Self {
        let echo = cfg
            .console_echo
            .then(|| Box::new(Term::stderr()) as EchoSink);
        Self {
            inner: Arc::new(EventBusInner {
                session_id: cfg.session_id,
                build_mode: cfg.build_mode,
                echo: Mutex::new(echo),
                last_timestamp: AtomicI64::new(0),
                actor: RwLock::new(None),
                ring,
                cache,
                uploader,
                metrics: BusMetrics::default(),
            }),
        }
    }

    pub fn publish(
        &self,
        level: Level,
        category: impl Into<String>,
        message: impl Into<String>,
        data: EventData,
    ) {
        let inner = &self.inner;
        let envelope = Envelope {
            timestamp: self.next_timestamp(),
            session_id: inner.session_id.clone(),
            level,
            category: category.into(),
            message: message.into(),
            data,
        };
        inner.metrics.emitted_total.fetch_add(1, Ordering::Relaxed);

        self.echo(&envelope);

        inner.ring.push_overwrite(envelope.clone());

        if let Some(cache) = &inner.cache {
            if let Err(e) = cache.append(&envelope) {
                inner
                    .metrics
                    .cache_failures_total
                    .fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Local telemetry cache write failed");
            }
        }

        if let Some(actor_id) = self.remote_target(level) {
            let item = BatchItem { actor_id, envelope };
            if inner
                .uploader
                .send(UploaderCommand::Enqueue(item))
                .is_err()
            {
                inner
                    .metrics
                    .upload_rejected_total
                    .fetch_add(1, Ordering::Relaxed);
                debug!("Uploader stopped, envelope kept locally only");
            }
        } else {
            inner
                .metrics
                .remote_gated_total
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Best effort: a closed or failing sink never reaches the caller.
    fn echo(&self, envelope: &Envelope) {
        let mut echo = self
            .inner
            .echo
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(sink) = echo.as_mut() {
            let line = format_envelope_styled(envelope);
            if let Err(e) = writeln!(sink, "{line}").and_then(|()| sink.flush()) {
                debug!(error = %e, "Console echo failed");
            }
        }
    }

    /// Replace the echo destination; `None` silences it.
    pub fn set_echo_sink(&self, sink: Option<EchoSink>) {
        *self
            .inner
            .echo
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = sink;
    }

    /// Actor partition the envelope should be uploaded to, if any gate allows.
    fn remote_target(&self, level: Level) -> Option<ActorId> {
        if self.inner.build_mode == BuildMode::Production && level == Level::Debug {
            return None;
        }
        self.bound_actor()
    }

    /// Wall-clock milliseconds, never lower than a previously issued value.
    fn next_timestamp(&self) -> i64 {
        let now = now_ms();
        let prev = self.inner.last_timestamp.fetch_max(now, Ordering::Relaxed);
        prev.max(now)
    }

    pub fn bind(&self, actor: ActorId) {
        *self
            .inner
            .actor
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(actor);
    }

    pub fn unbind(&self) -> Option<ActorId> {
        self.inner
            .actor
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn bound_actor(&self) -> Option<ActorId> {
        self.inner
            .actor
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.inner.ring
    }

    pub fn stats(&self) -> BusStats {
        self.inner.metrics.snapshot()
    }
}
