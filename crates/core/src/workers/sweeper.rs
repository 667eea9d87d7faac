use std::{sync::Arc, time::Duration};

use anyhow::Result;
use serde::Serialize;
use tokio::{sync::oneshot, time::Instant};
use tracing::{info, warn};

use crate::{
    cache::LocalCache,
    config::PipelineConfig,
    error::Result as BeaconResult,
    remote::RemoteStore,
    types::{ActorId, now_ms},
    workers::Worker,
};

#[derive(Debug)]
pub enum SweeperCommand {
    Bind(ActorId),
    Unbind,
    SweepNow {
        reply: Option<oneshot::Sender<SweepReport>>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemoteSweep {
    pub sessions_scanned: usize,
    pub sessions_deleted: usize,
    pub records_deleted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub cutoff_ms: i64,
    pub local_deleted: usize,
    pub remote: Option<RemoteSweep>,
}

#[derive(Debug, Clone, Copy)]
pub struct SweeperSettings {
    pub grace: Duration,
    pub interval: Duration,
    pub retention_ms: i64,
}

impl From<&PipelineConfig> for SweeperSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            grace: config.sweep_grace(),
            interval: config.sweep_interval(),
            retention_ms: config.retention_ms(),
        }
    }
}

/// Remove every local record strictly older than `cutoff_ms`.
pub fn sweep_local(cache: &LocalCache, cutoff_ms: i64) -> BeaconResult<usize> {
    cache.delete_older_than(cutoff_ms)
}

/// Delete whole session groups of `actor` whose records all predate `cutoff_ms`.
///
/// A session holding any record at or after the cutoff is kept in full. One
/// failing session does not stop the pass.
pub async fn sweep_remote(
    store: &dyn RemoteStore,
    actor: &ActorId,
    cutoff_ms: i64,
) -> BeaconResult<RemoteSweep> {
    let sessions = store.list_sessions(actor).await?;
    let mut sweep = RemoteSweep {
        sessions_scanned: sessions.len(),
        ..Default::default()
    };

    for session in &sessions {
        let expired = match store.session_span(actor, session).await {
            Ok(Some(span)) => span.oldest < cutoff_ms && span.newest < cutoff_ms,
            Ok(None) => false,
            Err(e) => {
                warn!(%actor, %session, error = %e, "Could not inspect session during sweep");
                continue;
            }
        };
        if !expired {
            continue;
        }
        match store.delete_session(actor, session).await {
            Ok(deleted) => {
                sweep.sessions_deleted += 1;
                sweep.records_deleted += deleted;
            }
            Err(e) => warn!(%actor, %session, error = %e, "Could not delete expired session"),
        }
    }
    Ok(sweep)
}

/// Enforces the retention horizon locally and in the bound actor's partition.
///
/// Binding schedules a sweep after the grace delay; afterwards the sweep
/// repeats every interval until the actor is unbound.
pub struct Sweeper {
    cache: Option<Arc<LocalCache>>,
    store: Arc<dyn RemoteStore>,
    settings: SweeperSettings,
    actor: Option<ActorId>,
    next_sweep: Option<Instant>,
}

impl Sweeper {
    pub fn new(
        cache: Option<Arc<LocalCache>>,
        store: Arc<dyn RemoteStore>,
        settings: SweeperSettings,
    ) -> Self {
        Self {
            cache,
            store,
            settings,
            actor: None,
            next_sweep: None,
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        let cutoff_ms = now_ms() - self.settings.retention_ms;
        let mut report = SweepReport {
            cutoff_ms,
            ..Default::default()
        };

        if let Some(cache) = &self.cache {
            match sweep_local(cache, cutoff_ms) {
                Ok(deleted) => report.local_deleted = deleted,
                Err(e) => warn!(error = %e, "Local retention sweep failed"),
            }
        }

        if let Some(actor) = &self.actor {
            match sweep_remote(self.store.as_ref(), actor, cutoff_ms).await {
                Ok(remote) => report.remote = Some(remote),
                Err(e) => warn!(%actor, error = %e, "Remote retention sweep failed"),
            }
        }

        info!(
            cutoff_ms,
            local_deleted = report.local_deleted,
            sessions_deleted = report.remote.map_or(0, |r| r.sessions_deleted),
            "Retention sweep finished"
        );
        report
    }
}

impl Worker for Sweeper {
    const NAME: &'static str = "sweeper";
    type Command = SweeperCommand;

    fn next_deadline(&self) -> Option<Instant> {
        self.next_sweep
    }

    async fn handle(&mut self, command: SweeperCommand) -> Result<()> {
        match command {
            SweeperCommand::Bind(actor) => {
                self.actor = Some(actor);
                self.next_sweep = Some(Instant::now() + self.settings.grace);
            }
            SweeperCommand::Unbind => {
                self.actor = None;
                self.next_sweep = None;
            }
            SweeperCommand::SweepNow { reply } => {
                let report = self.sweep().await;
                if let Some(reply) = reply {
                    let _ = reply.send(report);
                }
            }
        }
        Ok(())
    }

    async fn on_deadline(&mut self) -> Result<()> {
        self.sweep().await;
        self.next_sweep = self
            .actor
            .as_ref()
            .map(|_| Instant::now() + self.settings.interval);
        Ok(())
    }
}
