//! Aggregation engine: summarizes the remote corpus for a time window into
//! issue groups, severity counters and per-actor impact.
//!
//! Output is rebuilt from scratch on every request and never written back.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    str::FromStr,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    config::PipelineConfig,
    error::{BeaconError, Result},
    events::{Level, RemoteRecord},
    remote::RemoteStore,
    types::{ActorId, MS_PER_DAY},
};

pub const AUTH_CATEGORY: &str = "Auth";
pub const NETWORK_CATEGORY: &str = "Network";
pub const SYNC_CATEGORY: &str = "Sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeWindow {
    #[serde(rename = "1d")]
    LastDay,
    #[serde(rename = "7d")]
    LastWeek,
    #[serde(rename = "14d")]
    LastTwoWeeks,
    #[serde(rename = "30d")]
    LastMonth,
}

impl TimeWindow {
    pub const ALL: [TimeWindow; 4] = [
        TimeWindow::LastDay,
        TimeWindow::LastWeek,
        TimeWindow::LastTwoWeeks,
        TimeWindow::LastMonth,
    ];

    pub fn days(&self) -> i64 {
        match self {
            TimeWindow::LastDay => 1,
            TimeWindow::LastWeek => 7,
            TimeWindow::LastTwoWeeks => 14,
            TimeWindow::LastMonth => 30,
        }
    }

    /// Inclusive `[start, end]` bounds ending at `now_ms`.
    pub fn bounds(&self, now_ms: i64) -> (i64, i64) {
        (now_ms - self.days() * MS_PER_DAY, now_ms)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::LastDay => "1d",
            TimeWindow::LastWeek => "7d",
            TimeWindow::LastTwoWeeks => "14d",
            TimeWindow::LastMonth => "30d",
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeWindow {
    type Err = BeaconError;

    fn from_str(s: &str) -> Result<Self> {
        TimeWindow::ALL
            .into_iter()
            .find(|w| w.as_str() == s)
            .ok_or_else(|| BeaconError::InvalidWindow(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AggregationLimits {
    pub top_issues: usize,
    pub recent_errors: usize,
    pub examples_per_issue: usize,
}

impl Default for AggregationLimits {
    fn default() -> Self {
        Self {
            top_issues: 10,
            recent_errors: 20,
            examples_per_issue: 3,
        }
    }
}

impl From<&PipelineConfig> for AggregationLimits {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            top_issues: config.top_issues,
            recent_errors: config.recent_errors,
            examples_per_issue: config.examples_per_issue,
        }
    }
}

/// Issue counts for the three named category buckets. Exact, case-sensitive match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCounts {
    pub auth: usize,
    pub network: usize,
    pub sync: usize,
}

/// Warn/error records sharing one `(category, message)` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueGroup {
    pub category: String,
    pub message: String,
    pub count: usize,
    pub affected_actors: usize,
    pub first_seen: i64,
    pub last_seen: i64,
    pub examples: Vec<RemoteRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub window: TimeWindow,
    pub start: i64,
    pub end: i64,
    pub total_records: usize,
    pub distinct_actors: usize,
    pub error_count: usize,
    pub warn_count: usize,
    pub category_counts: CategoryCounts,
    pub top_issues: Vec<IssueGroup>,
    pub recent_errors: Vec<RemoteRecord>,
}

impl AggregateReport {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

struct GroupAccumulator<'a> {
    count: usize,
    actors: HashSet<&'a ActorId>,
    first_seen: i64,
    last_seen: i64,
    examples: Vec<&'a RemoteRecord>,
}

/// Pure aggregation over an already-fetched record set.
pub fn aggregate(
    window: TimeWindow,
    start: i64,
    end: i64,
    records: &[RemoteRecord],
    limits: AggregationLimits,
) -> AggregateReport {
    let mut actors: HashSet<&ActorId> = HashSet::new();
    let mut error_count = 0;
    let mut warn_count = 0;
    let mut category_counts = CategoryCounts::default();
    let mut groups: HashMap<(&str, &str), GroupAccumulator<'_>> = HashMap::new();
    let mut errors: Vec<&RemoteRecord> = Vec::new();

    for record in records {
        let env = &record.envelope;
        actors.insert(&record.actor_id);

        match env.level {
            Level::Error => {
                error_count += 1;
                errors.push(record);
            }
            Level::Warn => warn_count += 1,
            Level::Debug | Level::Info => {}
        }
        if !env.level.is_issue() {
            continue;
        }

        match env.category.as_str() {
            AUTH_CATEGORY => category_counts.auth += 1,
            NETWORK_CATEGORY => category_counts.network += 1,
            SYNC_CATEGORY => category_counts.sync += 1,
            _ => {}
        }

        let group = groups
            .entry((env.category.as_str(), env.message.as_str()))
            .or_insert_with(|| GroupAccumulator {
                count: 0,
                actors: HashSet::new(),
                first_seen: env.timestamp,
                last_seen: env.timestamp,
                examples: Vec::new(),
            });
        group.count += 1;
        group.actors.insert(&record.actor_id);
        group.first_seen = group.first_seen.min(env.timestamp);
        group.last_seen = group.last_seen.max(env.timestamp);
        if group.examples.len() < limits.examples_per_issue {
            group.examples.push(record);
        }
    }

    let mut top_issues: Vec<IssueGroup> = groups
        .into_iter()
        .map(|((category, message), acc)| IssueGroup {
            category: category.to_string(),
            message: message.to_string(),
            count: acc.count,
            affected_actors: acc.actors.len(),
            first_seen: acc.first_seen,
            last_seen: acc.last_seen,
            examples: acc.examples.into_iter().cloned().collect(),
        })
        .collect();
    // Ties broken by recency, then key, so output is deterministic.
    top_issues.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then(b.last_seen.cmp(&a.last_seen))
            .then_with(|| (&a.category, &a.message).cmp(&(&b.category, &b.message)))
    });
    top_issues.truncate(limits.top_issues);

    errors.sort_by(|a, b| b.envelope.timestamp.cmp(&a.envelope.timestamp));
    let recent_errors = errors
        .into_iter()
        .take(limits.recent_errors)
        .cloned()
        .collect();

    AggregateReport {
        window,
        start,
        end,
        total_records: records.len(),
        distinct_actors: actors.len(),
        error_count,
        warn_count,
        category_counts,
        top_issues,
        recent_errors,
    }
}

/// Fetches the whole remote window and aggregates it.
pub struct AggregationEngine<S: ?Sized> {
    store: Arc<S>,
    limits: AggregationLimits,
}

impl<S: RemoteStore + ?Sized> AggregationEngine<S> {
    pub fn new(store: Arc<S>, limits: AggregationLimits) -> Self {
        Self { store, limits }
    }

    /// Requires `caller` to hold the all-logs read privilege.
    #[instrument(skip_all, fields(caller = %caller, window = %window))]
    pub async fn query(
        &self,
        caller: &ActorId,
        window: TimeWindow,
        now_ms: i64,
    ) -> Result<AggregateReport> {
        if !self.store.has_all_logs_read(caller).await? {
            return Err(BeaconError::Unauthorized {
                actor: caller.clone(),
            });
        }

        let (start, end) = window.bounds(now_ms);
        let records = self.store.scan_all(start, end).await?;
        debug!(records = records.len(), "Fetched remote window");
        Ok(aggregate(window, start, end, &records, self.limits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::{Envelope, EventData},
        types::SessionId,
    };

    fn record(actor: &str, ts: i64, level: Level, category: &str, message: &str) -> RemoteRecord {
        RemoteRecord {
            record_id: format!("{actor}-{ts}"),
            actor_id: ActorId::new(actor),
            envelope: Envelope {
                timestamp: ts,
                session_id: SessionId::new("s"),
                level,
                category: category.into(),
                message: message.into(),
                data: EventData::new(),
            },
            server_timestamp: ts,
        }
    }

    #[test]
    fn groups_issues_and_tracks_recent_errors() {
        let records = vec![
            record("a1", 1, Level::Warn, "Auth", "x"),
            record("a1", 2, Level::Warn, "Auth", "x"),
            record("a2", 3, Level::Warn, "Auth", "x"),
            record("a3", 4, Level::Error, "Net", "y"),
        ];
        let report = aggregate(TimeWindow::LastWeek, 0, 10, &records, Default::default());

        let top = &report.top_issues[0];
        assert_eq!((top.category.as_str(), top.message.as_str()), ("Auth", "x"));
        assert_eq!(top.count, 3);
        assert_eq!(top.affected_actors, 2);
        assert_eq!(top.first_seen, 1);
        assert_eq!(top.last_seen, 3);
        assert_eq!(top.examples.len(), 3);

        assert_eq!(report.recent_errors.len(), 1);
        assert_eq!(report.recent_errors[0].envelope.message, "y");
        assert_eq!(report.recent_errors[0].envelope.category, "Net");
    }

    #[test]
    fn counters_cover_all_levels_and_named_buckets() {
        let records = vec![
            record("a", 1, Level::Debug, "Auth", "noise"),
            record("b", 2, Level::Info, "Sync", "ok"),
            record("c", 3, Level::Error, "Sync", "conflict"),
            record("c", 4, Level::Warn, "Network", "slow"),
            record("d", 5, Level::Warn, "network", "lowercase is not bucketed"),
        ];
        let report = aggregate(TimeWindow::LastDay, 0, 10, &records, Default::default());

        assert_eq!(report.total_records, 5);
        assert_eq!(report.distinct_actors, 4);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.warn_count, 2);
        assert_eq!(
            report.category_counts,
            CategoryCounts {
                auth: 0,
                network: 1,
                sync: 1
            }
        );
        assert_eq!(report.top_issues.len(), 3);
    }

    #[test]
    fn applies_top_n_and_recent_error_limits() {
        let records: Vec<RemoteRecord> = (0..30)
            .map(|i| record("a", i, Level::Error, "Sync", &format!("e{}", i % 15)))
            .collect();
        let limits = AggregationLimits {
            top_issues: 5,
            recent_errors: 4,
            examples_per_issue: 1,
        };
        let report = aggregate(TimeWindow::LastMonth, 0, 100, &records, limits);

        assert_eq!(report.top_issues.len(), 5);
        assert!(report.top_issues.iter().all(|g| g.examples.len() == 1));
        let recent: Vec<i64> = report
            .recent_errors
            .iter()
            .map(|r| r.envelope.timestamp)
            .collect();
        assert_eq!(recent, vec![29, 28, 27, 26]);
    }

    #[test]
    fn window_parses_presets_only() {
        assert_eq!("14d".parse::<TimeWindow>().unwrap(), TimeWindow::LastTwoWeeks);
        assert!(matches!(
            "3d".parse::<TimeWindow>(),
            Err(BeaconError::InvalidWindow(_))
        ));
        assert_eq!(TimeWindow::LastDay.bounds(MS_PER_DAY * 2), (MS_PER_DAY, MS_PER_DAY * 2));
    }

    #[test]
    fn report_exports_as_json() {
        let report = aggregate(TimeWindow::LastDay, 0, 1, &[], Default::default());
        let json: serde_json::Value =
            serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["window"], "1d");
        assert_eq!(json["totalRecords"], 0);
    }
}
