use std::collections::HashMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{
    Anomaly, ChangeEvent, ChangeType, ChangeTypeSummary, GroupedMetrics, Recommendation,
};

pub fn summarize_by_change_type(events: &[ChangeEvent]) -> Vec<ChangeTypeSummary> {
    let mut map: HashMap<&'static str, (ChangeType, usize, f64)> = HashMap::new();

    for event in events {
        let entry = map
            .entry(event.change_type.label())
            .or_insert((event.change_type, 0, 0.0));
        entry.1 += 1;
        entry.2 += event.attendance_impact;
    }

    let mut summaries: Vec<ChangeTypeSummary> = map
        .into_values()
        .map(|(change_type, count, total_impact)| ChangeTypeSummary {
            change_type,
            count,
            avg_impact: if count == 0 {
                0.0
            } else {
                total_impact / count as f64
            },
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.change_type.label().cmp(b.change_type.label()))
    });
    summaries
}

pub struct ReportInput<'a> {
    pub scope: Option<&'a str>,
    pub as_of: NaiveDate,
    pub metrics: &'a [GroupedMetrics],
    pub changes: &'a [ChangeEvent],
    pub anomalies: &'a [Anomaly],
    pub recommendations: &'a [Recommendation],
}

pub fn build_report(input: &ReportInput<'_>) -> String {
    let mut output = String::new();
    let scope_label = input.scope.unwrap_or("all locations");

    let _ = writeln!(output, "# Class Performance Report");
    let _ = writeln!(output, "Generated for {} (as of {})", scope_label, input.as_of);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Classes");

    if input.metrics.is_empty() {
        let _ = writeln!(output, "No sessions recorded for this window.");
    } else {
        for entry in input.metrics.iter().take(10) {
            let _ = writeln!(
                output,
                "{}. {} score {:.2} (avg {:.1}, fill {:.1}%, {} sessions, {:?})",
                entry.rank,
                entry.key,
                entry.composite_score,
                entry.class_avg,
                entry.fill_rate,
                entry.session_count,
                entry.status
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Schedule Changes");
    let summaries = summarize_by_change_type(input.changes);

    if summaries.is_empty() {
        let _ = writeln!(output, "No schedule changes detected in active slots.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} changes (avg impact {:+.1})",
                summary.change_type.label(),
                summary.count,
                summary.avg_impact
            );
        }
        for event in input.changes.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} on {}: {} -> {} ({:+.1} attendees)",
                event.slot,
                event.occurred_on,
                event.before_value,
                event.after_value,
                event.attendance_impact
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Anomalies");

    if input.anomalies.is_empty() {
        let _ = writeln!(output, "No anomalies in recent sessions.");
    } else {
        for anomaly in input.anomalies.iter().take(5) {
            let _ = writeln!(
                output,
                "- {:?} {} on {}: {} vs expected {:.1} ({:+.1}%)",
                anomaly.severity,
                anomaly.group,
                anomaly.date,
                anomaly.actual_value,
                anomaly.expected_value,
                anomaly.deviation_percent
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recommendations");

    if input.recommendations.is_empty() {
        let _ = writeln!(output, "No recommendations for this window.");
    } else {
        for rec in input.recommendations.iter() {
            let _ = writeln!(
                output,
                "- [{:?}] {}: {} (confidence {:.0})",
                rec.priority, rec.title, rec.action_required, rec.confidence
            );
        }
    }

    output
}
