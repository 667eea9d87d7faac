use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::types::{ActorId, SessionId};

/// Arbitrary structured context attached to an envelope.
pub type EventData = serde_json::Map<String, serde_json::Value>;

/// Fixed four-level severity model, ordered debug < info < warn < error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub const ALL: [Level; 4] = [Level::Debug, Level::Info, Level::Warn, Level::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }

    /// Levels that count as issues for aggregation.
    pub fn is_issue(&self) -> bool {
        matches!(self, Level::Warn | Level::Error)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown level {0:?}")]
pub struct ParseLevelError(pub String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// The canonical telemetry record. Write-once: no field changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub timestamp: i64,
    pub session_id: SessionId,
    pub level: Level,
    pub category: String,
    pub message: String,
    #[serde(default)]
    pub data: EventData,
}

/// Envelope attributed to the actor whose partition it will be written to.
///
/// Attribution wraps the envelope instead of mutating it, and is captured at
/// enqueue time so a later rebind never re-targets the item.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub actor_id: ActorId,
    pub envelope: Envelope,
}

/// Envelope as persisted in the local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub id: i64,
    #[serde(flatten)]
    pub envelope: Envelope,
}

/// Envelope as persisted in the remote store under
/// `logs/{actorId}/{sessionId}/{recordId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub record_id: String,
    pub actor_id: ActorId,
    #[serde(flatten)]
    pub envelope: Envelope,
    pub server_timestamp: i64,
}
