use std::sync::{Arc, Mutex};

use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    aggregate::{AggregateReport, AggregationEngine, AggregationLimits, TimeWindow},
    cache::LocalCache,
    config::PipelineConfig,
    error::{BeaconError, Result},
    events::{BusConfig, BusStats, Envelope, EventBus, EventData, Level, RemoteRecord},
    queues::{RingBuffer, SubscriptionToken},
    remote::RemoteStore,
    types::{ActorId, SessionId, now_ms},
    workers::{
        FlushOutcome, SweepReport, Sweeper, SweeperCommand, SweeperSettings, Uploader,
        UploaderCommand, UploaderSettings, Worker,
    },
};

/// Owned handle over the whole telemetry pipeline.
///
/// Created with [`TelemetryPipeline::start`] inside a tokio runtime and torn
/// down with [`TelemetryPipeline::stop`]. Emission methods never fail.
pub struct TelemetryPipeline {
    config: PipelineConfig,
    bus: EventBus,
    cache: Option<Arc<LocalCache>>,
    store: Arc<dyn RemoteStore>,
    uploader_tx: mpsc::UnboundedSender<UploaderCommand>,
    sweeper_tx: mpsc::UnboundedSender<SweeperCommand>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TelemetryPipeline {
    /// Open the local cache at the configured path and start.
    ///
    /// An unusable cache degrades the pipeline to ring buffer + uploader.
    pub fn open(config: PipelineConfig, store: Arc<dyn RemoteStore>) -> Self {
        let path = config.cache_path();
        let cache = match LocalCache::open(&path) {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Local telemetry cache unavailable");
                None
            }
        };
        Self::start(config, cache, store)
    }

    pub fn start(
        config: PipelineConfig,
        cache: Option<Arc<LocalCache>>,
        store: Arc<dyn RemoteStore>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let (uploader_tx, uploader_rx) = mpsc::unbounded_channel();
        let (sweeper_tx, sweeper_rx) = mpsc::unbounded_channel();

        let session_id = SessionId::generate();
        let bus = EventBus::new(
            BusConfig {
                session_id: session_id.clone(),
                build_mode: config.build_mode,
                console_echo: config.console_echo,
            },
            RingBuffer::new(config.ring_buffer_capacity),
            cache.clone(),
            uploader_tx.clone(),
        );

        let uploader = Uploader::new(Arc::clone(&store), UploaderSettings::from(&config));
        let sweeper = Sweeper::new(
            cache.clone(),
            Arc::clone(&store),
            SweeperSettings::from(&config),
        );
        let tasks = vec![
            tokio::spawn(uploader.run(uploader_rx, shutdown_rx.resubscribe())),
            tokio::spawn(sweeper.run(sweeper_rx, shutdown_rx)),
        ];

        info!(
            %session_id,
            build_mode = ?config.build_mode,
            local_cache = cache.is_some(),
            "Telemetry pipeline started"
        );

        Self {
            config,
            bus,
            cache,
            store,
            uploader_tx,
            sweeper_tx,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        }
    }

    /// Final flush, then stop both workers and wait for them.
    pub async fn stop(&self) {
        let tasks = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        if tasks.is_empty() {
            return;
        }
        let _ = self.shutdown_tx.send(());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Telemetry worker ended abnormally");
            }
        }
        info!(session_id = %self.bus.session_id(), "Telemetry pipeline stopped");
    }

    pub fn session_id(&self) -> &SessionId {
        self.bus.session_id()
    }

    /// Bind the authenticated actor. Schedules a retention sweep after the
    /// grace delay and every sweep interval afterwards.
    pub fn bind(&self, actor: ActorId) {
        info!(%actor, "Binding telemetry actor");
        self.bus.bind(actor.clone());
        let _ = self.sweeper_tx.send(SweeperCommand::Bind(actor));
    }

    /// Items already queued keep flushing to the actor they were attributed to.
    pub fn unbind(&self) -> Option<ActorId> {
        let previous = self.bus.unbind();
        let _ = self.sweeper_tx.send(SweeperCommand::Unbind);
        previous
    }

    pub fn bound_actor(&self) -> Option<ActorId> {
        self.bus.bound_actor()
    }

    pub fn emit(
        &self,
        level: Level,
        category: impl Into<String>,
        message: impl Into<String>,
        data: EventData,
    ) {
        self.bus.publish(level, category, message, data);
    }

    pub fn debug(&self, category: impl Into<String>, message: impl Into<String>, data: EventData) {
        self.emit(Level::Debug, category, message, data);
    }

    pub fn info(&self, category: impl Into<String>, message: impl Into<String>, data: EventData) {
        self.emit(Level::Info, category, message, data);
    }

    pub fn warn(&self, category: impl Into<String>, message: impl Into<String>, data: EventData) {
        self.emit(Level::Warn, category, message, data);
    }

    pub fn error(&self, category: impl Into<String>, message: impl Into<String>, data: EventData) {
        self.emit(Level::Error, category, message, data);
    }

    /// Fire-and-forget flush request.
    pub fn flush_now(&self) {
        let _ = self.uploader_tx.send(UploaderCommand::Flush { reply: None });
    }

    /// Flush and wait for the outcome.
    pub async fn flush(&self) -> Result<FlushOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.uploader_tx
            .send(UploaderCommand::Flush { reply: Some(reply) })
            .map_err(|_| BeaconError::PipelineStopped)?;
        outcome.await.map_err(|_| BeaconError::PipelineStopped)
    }

    /// Connectivity transition. Regaining connectivity forces a flush.
    pub fn set_online(&self, online: bool) {
        let _ = self.uploader_tx.send(UploaderCommand::SetOnline(online));
    }

    pub fn on_background(&self) {
        self.flush_now();
    }

    pub fn on_unload(&self) {
        self.flush_now();
    }

    pub async fn sweep_now(&self) -> Result<SweepReport> {
        let (reply, report) = oneshot::channel();
        self.sweeper_tx
            .send(SweeperCommand::SweepNow { reply: Some(reply) })
            .map_err(|_| BeaconError::PipelineStopped)?;
        report.await.map_err(|_| BeaconError::PipelineStopped)
    }

    /// Ring buffer contents, oldest first.
    pub fn recent(&self) -> Vec<Envelope> {
        self.bus.ring().snapshot()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&Envelope) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.bus.ring().subscribe(listener)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.bus.ring().unsubscribe(token)
    }

    pub fn stats(&self) -> BusStats {
        self.bus.stats()
    }

    /// All local cache records as a JSON document.
    pub fn export_local(&self) -> Result<String> {
        match &self.cache {
            Some(cache) => cache.export_json(),
            None => Err(BeaconError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "local telemetry cache is unavailable",
            ))),
        }
    }

    /// Records of one actor in `[start, end]`.
    ///
    /// The bound actor may read its own partition; reading another actor's
    /// partition requires the all-logs read privilege.
    pub async fn query_remote(
        &self,
        actor: &ActorId,
        start: i64,
        end: i64,
    ) -> Result<Vec<RemoteRecord>> {
        let caller = self.bound_actor().ok_or(BeaconError::NotBound)?;
        if &caller != actor && !self.store.has_all_logs_read(&caller).await? {
            return Err(BeaconError::Unauthorized { actor: caller });
        }
        self.store.query_actor(actor, start, end).await
    }

    /// Aggregate the whole remote corpus for `window`. Privileged.
    pub async fn query_aggregate(&self, window: TimeWindow) -> Result<AggregateReport> {
        let caller = self.bound_actor().ok_or(BeaconError::NotBound)?;
        AggregationEngine::new(
            Arc::clone(&self.store),
            AggregationLimits::from(&self.config),
        )
        .query(&caller, window, now_ms())
        .await
    }
}
