use crate::error::{AnalyticsError, Result};
use crate::models::{GroupStatus, GroupedMetrics, SessionRecord};
use crate::stats;

const ATTENDANCE_WEIGHT: f64 = 0.4;
const FILL_WEIGHT: f64 = 0.35;
const FREQUENCY_WEIGHT: f64 = 0.25;
/// Average attendance of 20 saturates the attendance sub-score.
const ATTENDANCE_SCALE: f64 = 5.0;
/// 50 sessions saturate the frequency sub-score.
const FREQUENCY_SCALE: f64 = 2.0;
const SUB_SCORE_CAP: f64 = 100.0;

pub fn percent(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator * 100.0
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 100 minus the coefficient of variation (population), floored at 0.
pub fn consistency_score(check_ins: &[f64]) -> f64 {
    let avg = stats::mean(check_ins);
    if avg == 0.0 {
        return 0.0;
    }
    (100.0 - stats::population_std_dev(check_ins) / avg * 100.0).max(0.0)
}

pub fn composite_score(class_avg: f64, fill_rate: f64, session_count: usize) -> f64 {
    let attendance = (class_avg * ATTENDANCE_SCALE).min(SUB_SCORE_CAP);
    let fill = fill_rate.min(SUB_SCORE_CAP);
    let frequency = (session_count as f64 * FREQUENCY_SCALE).min(SUB_SCORE_CAP);
    round2(ATTENDANCE_WEIGHT * attendance + FILL_WEIGHT * fill + FREQUENCY_WEIGHT * frequency)
}

/// Derives every group-level metric from the sessions of one group.
///
/// An empty group is a caller bug and is reported as [`AnalyticsError::EmptyGroup`].
pub fn calculate<S>(key: &str, sessions: &[S]) -> Result<GroupedMetrics>
where
    S: AsRef<SessionRecord>,
{
    if sessions.is_empty() {
        return Err(AnalyticsError::EmptyGroup(key.to_string()));
    }

    let mut total_check_ins = 0u64;
    let mut total_capacity = 0u64;
    let mut total_booked = 0u64;
    let mut total_cancellations = 0u64;
    let mut total_no_shows = 0u64;
    let mut total_waitlisted = 0u64;
    let mut total_non_paid = 0u64;
    let mut total_revenue = 0.0;
    let mut non_empty_sessions = 0usize;
    let mut any_active = false;
    let mut check_ins = Vec::with_capacity(sessions.len());

    for session in sessions.iter().map(AsRef::as_ref) {
        total_check_ins += u64::from(session.checked_in);
        total_capacity += u64::from(session.capacity);
        total_booked += u64::from(session.booked);
        total_cancellations += u64::from(session.late_cancelled);
        total_no_shows += u64::from(session.no_show);
        total_waitlisted += u64::from(session.waitlisted);
        total_non_paid += u64::from(session.non_paid);
        total_revenue += session.revenue;
        if session.checked_in > 0 {
            non_empty_sessions += 1;
        }
        any_active |= session.active;
        check_ins.push(session.checked_in as f64);
    }

    let session_count = sessions.len();
    let fill_rate = percent(total_check_ins as f64, total_capacity as f64);
    let class_avg = total_check_ins as f64 / session_count as f64;
    let class_avg_non_empty = if non_empty_sessions == 0 {
        0.0
    } else {
        total_check_ins as f64 / non_empty_sessions as f64
    };
    let rev_lost_per_cancellation = if total_booked == 0 {
        0.0
    } else {
        total_revenue / total_booked as f64 * total_cancellations as f64
    };
    let revenue_per_check_in = if total_check_ins == 0 {
        0.0
    } else {
        total_revenue / total_check_ins as f64
    };

    Ok(GroupedMetrics {
        key: key.to_string(),
        session_count,
        total_check_ins,
        total_capacity,
        total_booked,
        total_cancellations,
        total_no_shows,
        total_waitlisted,
        total_non_paid,
        total_revenue,
        fill_rate,
        cancellation_rate: percent(total_cancellations as f64, total_booked as f64),
        class_avg,
        class_avg_non_empty,
        consistency_score: consistency_score(&check_ins),
        composite_score: composite_score(class_avg, fill_rate, session_count),
        revenue_per_check_in,
        rev_lost_per_cancellation,
        status: if any_active {
            GroupStatus::Active
        } else {
            GroupStatus::Inactive
        },
        rank: 0,
    })
}
