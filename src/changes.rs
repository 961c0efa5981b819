use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::config::AnalyticsConfig;
use crate::error::Result;
use crate::keys;
use crate::models::{ChangeEvent, ChangeType, SessionRecord};
use crate::stats;

/// How sessions are bucketed into recurring slots before scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotGrouping {
    /// Weekday, time and location: one physical slot on the schedule.
    DayTimeLocation,
    /// Class, weekday and location, so a class moving within the day stays in one
    /// timeline. Repeats of a class on the same day are split by their order in the day.
    ClassDayLocation,
}

impl SlotGrouping {
    fn key_for(self, session: &SessionRecord) -> String {
        let weekday = session.date.format("%A").to_string();
        match self {
            SlotGrouping::DayTimeLocation => keys::join(&[
                weekday.as_str(),
                keys::normalize_time(&session.time_of_day).as_str(),
                session.location.as_str(),
            ]),
            SlotGrouping::ClassDayLocation => keys::join(&[
                session.class_name.as_str(),
                weekday.as_str(),
                session.location.as_str(),
            ]),
        }
    }
}

fn time_changed(prev: &SessionRecord, curr: &SessionRecord, threshold_hours: f64) -> bool {
    match (
        keys::time_in_hours(&prev.time_of_day),
        keys::time_in_hours(&curr.time_of_day),
    ) {
        (Some(a), Some(b)) => (a - b).abs() > threshold_hours,
        _ => prev.time_of_day.trim() != curr.time_of_day.trim(),
    }
}

fn trainer_swapped(prev: &SessionRecord, curr: &SessionRecord, _threshold: f64) -> bool {
    prev.trainer != curr.trainer
        && prev.class_name == curr.class_name
        && prev.class_type == curr.class_type
}

fn class_swapped(prev: &SessionRecord, curr: &SessionRecord, threshold: f64) -> bool {
    prev.class_name != curr.class_name
        && prev.trainer == curr.trainer
        && !time_changed(prev, curr, threshold)
}

fn time_moved(prev: &SessionRecord, curr: &SessionRecord, threshold: f64) -> bool {
    time_changed(prev, curr, threshold)
        && prev.trainer == curr.trainer
        && prev.class_name == curr.class_name
}

fn level_changed(prev: &SessionRecord, curr: &SessionRecord, threshold: f64) -> bool {
    prev.class_type != curr.class_type
        && prev.trainer == curr.trainer
        && prev.class_name == curr.class_name
        && !time_changed(prev, curr, threshold)
}

fn trainer_of(s: &SessionRecord) -> String {
    s.trainer.clone()
}

fn class_of(s: &SessionRecord) -> String {
    s.class_name.clone()
}

fn time_of(s: &SessionRecord) -> String {
    s.time_of_day.clone()
}

fn level_of(s: &SessionRecord) -> String {
    s.class_type.clone()
}

/// One independent predicate over an adjacent session pair.
pub struct ChangeRule {
    pub change_type: ChangeType,
    fires: fn(&SessionRecord, &SessionRecord, f64) -> bool,
    value: fn(&SessionRecord) -> String,
}

pub const RULES: [ChangeRule; 4] = [
    ChangeRule {
        change_type: ChangeType::Trainer,
        fires: trainer_swapped,
        value: trainer_of,
    },
    ChangeRule {
        change_type: ChangeType::Class,
        fires: class_swapped,
        value: class_of,
    },
    ChangeRule {
        change_type: ChangeType::Time,
        fires: time_moved,
        value: time_of,
    },
    ChangeRule {
        change_type: ChangeType::Level,
        fires: level_changed,
        value: level_of,
    },
];

fn chronological(a: &&SessionRecord, b: &&SessionRecord) -> Ordering {
    a.date.cmp(&b.date).then_with(|| {
        let (ta, tb) = (
            keys::time_in_hours(&a.time_of_day),
            keys::time_in_hours(&b.time_of_day),
        );
        match (ta, tb) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => Ordering::Equal,
        }
    })
}

/// Splits a class timeline into its first, second, ... run of each day.
///
/// A class taught once per day keeps its key; repeats get a 1-based suffix.
fn split_by_occurrence<'a>(
    key: String,
    mut members: Vec<&'a SessionRecord>,
) -> Vec<(String, Vec<&'a SessionRecord>)> {
    members.sort_by(chronological);

    let mut occurrences: Vec<Vec<&SessionRecord>> = Vec::new();
    let mut previous_date = None;
    let mut ordinal = 0usize;
    for session in members {
        ordinal = if previous_date == Some(session.date) {
            ordinal + 1
        } else {
            0
        };
        previous_date = Some(session.date);
        if ordinal == occurrences.len() {
            occurrences.push(Vec::new());
        }
        occurrences[ordinal].push(session);
    }

    if occurrences.len() == 1 {
        return occurrences.into_iter().map(|o| (key.clone(), o)).collect();
    }
    occurrences
        .into_iter()
        .enumerate()
        .map(|(i, o)| (keys::join(&[key.as_str(), (i + 1).to_string().as_str()]), o))
        .collect()
}

#[derive(Debug, Clone)]
pub struct ChangeDetector {
    pub grouping: SlotGrouping,
    pub time_threshold_hours: f64,
    pub window_size: usize,
    pub active_window_days: i64,
    pub validate_with_statistics: bool,
    pub confidence_level: f64,
    pub forecast_periods: usize,
}

impl ChangeDetector {
    /// Scans each physical slot; time threshold comes from the config.
    pub fn slot_scan(config: &AnalyticsConfig) -> Self {
        Self {
            grouping: SlotGrouping::DayTimeLocation,
            time_threshold_hours: config.time_change_threshold_hours,
            window_size: config.window_size,
            active_window_days: config.active_window_days,
            validate_with_statistics: config.validate_with_statistics,
            confidence_level: config.confidence_level,
            forecast_periods: config.forecast_periods,
        }
    }

    /// Scans class timelines with the coarser timeline threshold from the config.
    pub fn timeline(config: &AnalyticsConfig) -> Self {
        Self {
            grouping: SlotGrouping::ClassDayLocation,
            time_threshold_hours: config.timeline_time_change_threshold_hours,
            ..Self::slot_scan(config)
        }
    }

    pub fn with_time_threshold(mut self, hours: f64) -> Self {
        self.time_threshold_hours = hours;
        self
    }

    /// Emits change events for every active slot, most recent first.
    ///
    /// `today` is the reference date for the activity window.
    pub fn detect(
        &self,
        sessions: &[SessionRecord],
        today: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChangeEvent>> {
        let slots = self.recurring_slots(sessions);

        let mut events = Vec::new();
        let mut scanned = 0usize;
        for (slot, mut members) in slots {
            cancel.check()?;
            if members.len() < 2 {
                continue;
            }

            members.sort_by(chronological);
            let Some(latest) = members.last().map(|s| s.date) else {
                continue;
            };
            if (today - latest).num_days() > self.active_window_days {
                debug!(slot = %slot, latest = %latest, "skipping inactive slot");
                continue;
            }

            scanned += 1;
            events.extend(self.scan_slot(&slot, &members));
        }

        events.sort_by(|a, b| {
            b.occurred_on
                .cmp(&a.occurred_on)
                .then_with(|| a.slot.cmp(&b.slot))
        });

        info!(
            slots = scanned,
            events = events.len(),
            threshold_hours = self.time_threshold_hours,
            "change scan complete"
        );
        Ok(events)
    }

    /// Buckets sessions into recurring occurrences, one sequence per slot.
    fn recurring_slots<'a>(
        &self,
        sessions: &'a [SessionRecord],
    ) -> BTreeMap<String, Vec<&'a SessionRecord>> {
        let mut slots: BTreeMap<String, Vec<&SessionRecord>> = BTreeMap::new();
        for session in sessions {
            slots
                .entry(self.grouping.key_for(session))
                .or_default()
                .push(session);
        }

        match self.grouping {
            SlotGrouping::DayTimeLocation => slots,
            SlotGrouping::ClassDayLocation => slots
                .into_iter()
                .flat_map(|(key, members)| split_by_occurrence(key, members))
                .collect(),
        }
    }

    /// Walks adjacent pairs of a date-sorted slot.
    fn scan_slot(&self, slot: &str, sorted: &[&SessionRecord]) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        for (offset, pair) in sorted.windows(2).enumerate() {
            let (prev, curr) = (pair[0], pair[1]);
            for rule in RULES.iter() {
                if (rule.fires)(prev, curr, self.time_threshold_hours) {
                    events.push(self.build_event(rule, slot, sorted, offset + 1));
                }
            }
        }
        events
    }

    fn build_event(
        &self,
        rule: &ChangeRule,
        slot: &str,
        sorted: &[&SessionRecord],
        pivot: usize,
    ) -> ChangeEvent {
        let start = pivot.saturating_sub(self.window_size);
        let end = (pivot + self.window_size).min(sorted.len());
        let before = &sorted[start..pivot];
        let after = &sorted[pivot..end];

        let before_check_ins: Vec<f64> = before.iter().map(|s| s.checked_in as f64).collect();
        let after_check_ins: Vec<f64> = after.iter().map(|s| s.checked_in as f64).collect();
        let before_avg = stats::mean(&before_check_ins);
        let after_avg = stats::mean(&after_check_ins);

        let (t_test, forecast, confidence_score) = if self.validate_with_statistics {
            let t_test = stats::t_test(&before_check_ins, &after_check_ins, self.confidence_level);
            let forecast = stats::forecast_linear(&after_check_ins, self.forecast_periods);
            let sample_size = (before.len() + after.len()) as f64;
            let base = if t_test.is_significant { 80.0 } else { 50.0 };
            let confidence = (base * (sample_size / 10.0).min(1.0)).round();
            (Some(t_test), Some(forecast), Some(confidence))
        } else {
            (None, None, None)
        };

        let prev = sorted[pivot - 1];
        let curr = sorted[pivot];
        ChangeEvent {
            change_type: rule.change_type,
            slot: slot.to_string(),
            occurred_on: curr.date,
            before_value: (rule.value)(prev),
            after_value: (rule.value)(curr),
            sessions_before: before.iter().map(|s| (*s).clone()).collect(),
            sessions_after: after.iter().map(|s| (*s).clone()).collect(),
            before_avg,
            after_avg,
            attendance_impact: after_avg - before_avg,
            t_test,
            forecast,
            confidence_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SLOT_TIME_CHANGE_HOURS;
    use crate::error::AnalyticsError;
    use crate::metrics::tests::session;
    use chrono::Duration;

    fn week(n: i64, trainer: &str, checked_in: u32) -> SessionRecord {
        let mut s = session(checked_in, 25);
        s.date = NaiveDate::from_ymd_opt(2026, 9, 7).unwrap() + Duration::weeks(n - 1);
        s.trainer = trainer.to_string();
        s
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn detector() -> ChangeDetector {
        ChangeDetector::slot_scan(&AnalyticsConfig::default())
    }

    #[test]
    fn trainer_swap_produces_single_event() {
        let sessions = vec![
            week(1, "A", 10),
            week(2, "A", 12),
            week(3, "A", 11),
            week(4, "B", 20),
            week(5, "B", 22),
        ];

        let events = detector().detect(&sessions, today(), &CancellationToken::new()).unwrap();
        assert_eq!(events.len(), 1);

        let event = &events[0];
        assert_eq!(event.change_type, ChangeType::Trainer);
        assert_eq!(event.occurred_on, sessions[3].date);
        assert_eq!(event.before_value, "A");
        assert_eq!(event.after_value, "B");
        assert_eq!(event.sessions_before.len(), 3);
        assert_eq!(event.sessions_after.len(), 2);
        assert!((event.attendance_impact - (21.0 - 11.0)).abs() < 1e-9);

        let t_test = event.t_test.as_ref().unwrap();
        assert!(t_test.is_significant);
        assert_eq!(event.confidence_score, Some(40.0));
        assert!(event.forecast.is_some());
    }

    #[test]
    fn input_order_does_not_matter() {
        let sessions = vec![
            week(5, "B", 22),
            week(2, "A", 12),
            week(4, "B", 20),
            week(1, "A", 10),
            week(3, "A", 11),
        ];
        let events = detector().detect(&sessions, today(), &CancellationToken::new()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].occurred_on, week(4, "B", 0).date);
    }

    #[test]
    fn windows_are_clipped_to_five_sessions() {
        let mut sessions: Vec<SessionRecord> = (1..=8).map(|n| week(n, "A", 10)).collect();
        sessions.extend((9..=16).map(|n| week(n, "B", 14)));
        let today = sessions.last().unwrap().date;

        let events = detector().detect(&sessions, today, &CancellationToken::new()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sessions_before.len(), 5);
        assert_eq!(events[0].sessions_after.len(), 5);
        assert_eq!(events[0].confidence_score, Some(50.0));
    }

    #[test]
    fn inactive_slots_are_skipped() {
        let sessions = vec![week(1, "A", 10), week(2, "B", 14)];
        let later = NaiveDate::from_ymd_opt(2026, 12, 1).unwrap();
        let events = detector().detect(&sessions, later, &CancellationToken::new()).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn single_session_slots_are_skipped() {
        let events = detector()
            .detect(&[week(6, "A", 10)], today(), &CancellationToken::new())
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn simultaneous_trainer_and_class_change_fires_nothing() {
        let mut swapped = week(2, "B", 14);
        swapped.class_name = "Cycle".to_string();
        let events = detector()
            .detect(&[week(1, "A", 10), swapped], today(), &CancellationToken::new())
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn class_and_level_changes() {
        let mut renamed = week(2, "A", 14);
        renamed.class_name = "Cycle".to_string();
        let mut leveled = week(3, "A", 16);
        leveled.class_name = "Cycle".to_string();
        leveled.class_type = "Advanced".to_string();

        let events = detector()
            .detect(&[week(1, "A", 10), renamed, leveled], today(), &CancellationToken::new())
            .unwrap();
        let kinds: Vec<ChangeType> = events.iter().map(|e| e.change_type).collect();
        assert_eq!(kinds, vec![ChangeType::Level, ChangeType::Class]);
        assert_eq!(events[0].after_value, "Advanced");
    }

    #[test]
    fn timeline_scan_uses_hour_threshold() {
        let mut moved = week(2, "A", 14);
        moved.time_of_day = "08:00".to_string();
        let sessions = vec![week(1, "A", 10), moved];
        let config = AnalyticsConfig::default();

        let coarse = ChangeDetector::timeline(&config)
            .detect(&sessions, today(), &CancellationToken::new())
            .unwrap();
        assert!(coarse.is_empty());

        let fine = ChangeDetector::timeline(&config)
            .with_time_threshold(SLOT_TIME_CHANGE_HOURS)
            .detect(&sessions, today(), &CancellationToken::new())
            .unwrap();
        assert_eq!(fine.len(), 1);
        assert_eq!(fine[0].change_type, ChangeType::Time);
        assert_eq!(fine[0].before_value, "07:30");
        assert_eq!(fine[0].after_value, "08:00");
    }

    fn weekly_at(n: i64, time: &str, trainer: &str) -> SessionRecord {
        let mut s = week(n, trainer, 12);
        s.time_of_day = time.to_string();
        s
    }

    #[test]
    fn unchanged_schedule_with_repeated_classes_has_no_changes() {
        let mut sessions = Vec::new();
        for n in 1..=6 {
            sessions.push(weekly_at(n, "07:30", "Anisha"));
            sessions.push(weekly_at(n, "18:00", "Rohan"));
            let mut cycle = weekly_at(n, "12:00", "Vivaran");
            cycle.class_name = "Power Cycle".to_string();
            sessions.push(cycle);
        }
        let config = AnalyticsConfig::default();

        let timeline = ChangeDetector::timeline(&config)
            .detect(&sessions, today(), &CancellationToken::new())
            .unwrap();
        assert!(timeline.is_empty());

        let slots = ChangeDetector::slot_scan(&config)
            .detect(&sessions, today(), &CancellationToken::new())
            .unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn timeline_follows_each_daily_occurrence() {
        let mut sessions = Vec::new();
        for n in 1..=6 {
            let morning_trainer = if n <= 3 { "Anisha" } else { "Mrigakshi" };
            sessions.push(weekly_at(n, "07:30", morning_trainer));
            sessions.push(weekly_at(n, "18:00", "Rohan"));
        }

        let events = ChangeDetector::timeline(&AnalyticsConfig::default())
            .detect(&sessions, today(), &CancellationToken::new())
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change_type, ChangeType::Trainer);
        assert_eq!(events[0].slot, "Barre 57|Monday|Kwality House|1");
        assert_eq!(events[0].before_value, "Anisha");
        assert_eq!(events[0].after_value, "Mrigakshi");
        assert_eq!(events[0].occurred_on, week(4, "A", 0).date);
    }

    #[test]
    fn time_delta_equal_to_threshold_does_not_fire() {
        let config = AnalyticsConfig::default();
        let exact = vec![weekly_at(1, "07:30", "A"), weekly_at(2, "08:30", "A")];
        let events = ChangeDetector::timeline(&config)
            .detect(&exact, today(), &CancellationToken::new())
            .unwrap();
        assert!(events.is_empty());

        let beyond = vec![weekly_at(1, "07:30", "A"), weekly_at(2, "08:45", "A")];
        let events = ChangeDetector::timeline(&config)
            .detect(&beyond, today(), &CancellationToken::new())
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change_type, ChangeType::Time);
        assert_eq!(events[0].slot, "Barre 57|Monday|Kwality House");
    }

    #[test]
    fn timeline_threshold_comes_from_config() {
        let config = AnalyticsConfig {
            timeline_time_change_threshold_hours: 2.0,
            ..AnalyticsConfig::default()
        };
        let detector = ChangeDetector::timeline(&config);
        assert_eq!(detector.grouping, SlotGrouping::ClassDayLocation);
        assert_eq!(detector.time_threshold_hours, 2.0);

        let sessions = vec![weekly_at(1, "07:30", "A"), weekly_at(2, "09:00", "A")];
        let events = detector
            .detect(&sessions, today(), &CancellationToken::new())
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn slot_scan_separates_times_into_slots() {
        let mut moved = week(2, "A", 14);
        moved.time_of_day = "09:00".to_string();
        let events = detector()
            .detect(&[week(1, "A", 10), moved], today(), &CancellationToken::new())
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn statistics_can_be_disabled() {
        let config = AnalyticsConfig {
            validate_with_statistics: false,
            ..AnalyticsConfig::default()
        };
        let events = ChangeDetector::slot_scan(&config)
            .detect(&[week(1, "A", 10), week(2, "B", 14)], today(), &CancellationToken::new())
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].t_test.is_none());
        assert!(events[0].forecast.is_none());
        assert!(events[0].confidence_score.is_none());
        assert_eq!(events[0].attendance_impact, 4.0);
    }

    #[test]
    fn cancellation_is_honoured() {
        let token = CancellationToken::new();
        token.cancel();
        let err = detector()
            .detect(&[week(1, "A", 10), week(2, "B", 14)], today(), &token)
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Cancelled));
    }
}
