use chrono::{DateTime, Utc};
use console::style;

use crate::{
    aggregate::AggregateReport,
    events::{Envelope, Level},
};

/// Format epoch milliseconds as `YYYY-MM-DD HH:MM:SS.mmm` (UTC)
pub fn format_timestamp(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Plain single-line rendering of an envelope
pub fn format_envelope(envelope: &Envelope) -> String {
    let mut line = format!(
        "{} [{:<5}] [{}] {}",
        format_timestamp(envelope.timestamp),
        envelope.level.as_str().to_uppercase(),
        envelope.category,
        envelope.message
    );
    if !envelope.data.is_empty() {
        line.push(' ');
        line.push_str(&serde_json::Value::Object(envelope.data.clone()).to_string());
    }
    line
}

/// Severity-coded rendering for terminals
pub fn format_envelope_styled(envelope: &Envelope) -> String {
    let level = format!("{:<5}", envelope.level.as_str().to_uppercase());
    let level = match envelope.level {
        Level::Debug => style(level).dim(),
        Level::Info => style(level).cyan(),
        Level::Warn => style(level).yellow().bold(),
        Level::Error => style(level).red().bold(),
    };

    let mut line = format!(
        "{} {} {} {}",
        style(format_timestamp(envelope.timestamp)).dim(),
        level,
        style(format!("[{}]", envelope.category)).magenta(),
        envelope.message
    );
    if !envelope.data.is_empty() {
        let data = serde_json::Value::Object(envelope.data.clone()).to_string();
        line.push_str(&format!(" {}", style(data).dim()));
    }
    line
}

pub fn format_report_readable(report: &AggregateReport) -> String {
    let mut output = String::new();
    output.push_str(&format!("# Issue report (last {})\n\n", report.window));
    output.push_str(&format!(
        "**From:** {} | **To:** {}\n\n",
        format_timestamp(report.start),
        format_timestamp(report.end)
    ));

    output.push_str("## Overview\n\n");
    output.push_str(&format!("• Records: {}\n", report.total_records));
    output.push_str(&format!("• Affected users: {}\n", report.distinct_actors));
    output.push_str(&format!("• Errors: {}\n", report.error_count));
    output.push_str(&format!("• Warnings: {}\n", report.warn_count));
    output.push_str(&format!(
        "• Auth issues: {} | Network issues: {} | Sync issues: {}\n\n",
        report.category_counts.auth, report.category_counts.network, report.category_counts.sync
    ));

    output.push_str("## Top issues\n\n");
    if report.top_issues.is_empty() {
        output.push_str("No warnings or errors in this window.\n\n");
    }
    for (rank, issue) in report.top_issues.iter().enumerate() {
        output.push_str(&format!(
            "### {}. [{}] {}\n\n",
            rank + 1,
            issue.category,
            issue.message
        ));
        output.push_str(&format!(
            "{} occurrences, {} users, last seen {}\n\n",
            issue.count,
            issue.affected_actors,
            format_timestamp(issue.last_seen)
        ));
    }

    output.push_str("## Recent errors\n\n");
    for record in &report.recent_errors {
        output.push_str(&format!(
            "• {} ({}) {}\n",
            format_envelope(&record.envelope),
            record.actor_id,
            record.envelope.session_id
        ));
    }
    output.push('\n');

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregate::{TimeWindow, aggregate},
        events::{EventData, RemoteRecord},
        types::{ActorId, SessionId},
    };

    fn envelope(level: Level) -> Envelope {
        let mut data = EventData::new();
        data.insert("code".into(), serde_json::json!(401));
        Envelope {
            timestamp: 0,
            session_id: SessionId::new("s"),
            level,
            category: "Auth".into(),
            message: "token rejected".into(),
            data,
        }
    }

    #[test]
    fn formats_epoch_ms() {
        assert_eq!(format_timestamp(1_500), "1970-01-01 00:00:01.500");
    }

    #[test]
    fn plain_envelope_line_includes_data() {
        assert_eq!(
            format_envelope(&envelope(Level::Warn)),
            "1970-01-01 00:00:00.000 [WARN ] [Auth] token rejected {\"code\":401}"
        );
    }

    #[test]
    fn readable_report_lists_top_issue() {
        let records = vec![RemoteRecord {
            record_id: "r".into(),
            actor_id: ActorId::new("alice"),
            envelope: envelope(Level::Error),
            server_timestamp: 0,
        }];
        let report = aggregate(TimeWindow::LastDay, 0, 1, &records, Default::default());
        let text = format_report_readable(&report);
        assert!(text.contains("### 1. [Auth] token rejected"));
        assert!(text.contains("1 occurrences, 1 users"));
        assert!(text.contains("Auth issues: 1"));
    }
}
