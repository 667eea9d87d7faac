use thiserror::Error;

use crate::types::ActorId;

#[derive(Error, Debug)]
pub enum BeaconError {
    #[error("Local cache error: {0}")]
    CacheError(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Remote request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Remote store rejected {operation} with status {status}: {body}")]
    RemoteRejected {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("Remote store unavailable: {reason}")]
    RemoteUnavailable { reason: String },

    #[error("Invalid remote store URL {url:?}: {reason}")]
    InvalidRemoteUrl { url: String, reason: String },

    #[error("Id {0:?} cannot be used as a remote path segment")]
    InvalidPathSegment(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("Actor {actor} does not hold the all-logs read privilege")]
    Unauthorized { actor: ActorId },

    #[error("No actor is bound to the pipeline")]
    NotBound,

    #[error("Invalid time window {0:?}, expected one of 1d, 7d, 14d, 30d")]
    InvalidWindow(String),

    #[error("Telemetry pipeline is stopped")]
    PipelineStopped,
}

pub type Result<T> = std::result::Result<T, BeaconError>;
