//! Beacon Core Library
//!
//! Client-side telemetry pipeline: structured event capture, a local durable
//! cache, batched at-least-once upload to a remote log store, retention
//! sweeps, and issue aggregation over the remote corpus.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod format;
pub mod logging;
pub mod pipeline;
pub mod queues;
pub mod remote;
pub mod types;
pub mod workers;

// Re-export commonly used items at crate root
pub use aggregate::{AggregateReport, AggregationEngine, IssueGroup, TimeWindow, aggregate};
pub use cache::{LocalCache, LocalExport, get_cache_db_path, get_root_cache_dir};
pub use config::{BuildMode, PipelineConfig};
pub use error::{BeaconError, Result};
pub use events::{CacheRecord, Envelope, EventData, Level, RemoteRecord};
pub use format::{
    format_envelope, format_envelope_styled, format_report_readable, format_timestamp,
};
pub use pipeline::TelemetryPipeline;
pub use remote::{HttpRemoteStore, MemoryRemoteStore, RemoteStore};
pub use types::{ActorId, SessionId};
pub use workers::{FlushOutcome, SweepReport};
