use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::aggregate::group_by;
use crate::cancel::CancellationToken;
use crate::config::AnalyticsConfig;
use crate::error::Result;
use crate::keys;
use crate::metrics::{self, percent, round2};
use crate::models::{
    Anomaly, AnomalyKind, ExpectedImpact, GroupedMetrics, Priority, Recommendation,
    RecommendationType, RiskLevel, SessionRecord,
};
use crate::stats;

const SLOT_FILL_RATIO: f64 = 0.7;
const SLOT_CRITICAL_RATIO: f64 = 0.5;
const SLOT_MIN_SESSIONS: usize = 3;
const TRAINER_SWAP_RATIO: f64 = 1.3;
const TRAINER_SWAP_STRONG_RATIO: f64 = 1.5;
const TRAINER_MIN_SESSIONS: usize = 3;
const FULL_FILL_RATE: f64 = 90.0;
const WAITLIST_PRESSURE: f64 = 2.0;
const LOW_FILL_RATE: f64 = 50.0;
const TARGET_FILL_RATE: f64 = 75.0;
const FORMAT_MIN_SESSIONS: usize = 5;
const LOW_PERFORMER_RATIO: f64 = 0.5;

const RECENT_SESSIONS: usize = 3;
const MIN_HISTORY: usize = 5;
const MIN_ANOMALY_GROUP: usize = 5;
const CANCELLATION_SHIFT_POINTS: f64 = 20.0;

type Groups<'a> = BTreeMap<String, Vec<&'a SessionRecord>>;

fn cancel_rate(session: &SessionRecord) -> f64 {
    percent(session.late_cancelled as f64, session.booked as f64)
}

fn measured(groups: &Groups<'_>) -> Result<Vec<GroupedMetrics>> {
    groups
        .iter()
        .map(|(key, members)| metrics::calculate(key, members))
        .collect()
}

/// Ranks by priority, then confidence, keeping at most `cap`.
pub fn rank_recommendations(
    mut recommendations: Vec<Recommendation>,
    cap: usize,
) -> Vec<Recommendation> {
    recommendations.sort_by(|a, b| {
        b.priority
            .weight()
            .cmp(&a.priority.weight())
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });
    recommendations.truncate(cap);
    recommendations
}

#[derive(Debug, Clone)]
pub struct InsightEngine {
    pub anomaly_threshold: f64,
    pub recommendation_cap: usize,
}

impl Default for InsightEngine {
    fn default() -> Self {
        Self::new(&AnalyticsConfig::default())
    }
}

impl InsightEngine {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            anomaly_threshold: config.anomaly_threshold,
            recommendation_cap: config.recommendation_cap,
        }
    }

    pub fn generate_recommendations(
        &self,
        sessions: &[SessionRecord],
        cancel: &CancellationToken,
    ) -> Result<Vec<Recommendation>> {
        let mut recommendations = Vec::new();

        cancel.check()?;
        let slots = self.underperforming_slots(sessions)?;
        debug!(count = slots.len(), "underperforming slot analysis");
        recommendations.extend(slots);

        cancel.check()?;
        let swaps = self.trainer_swaps(sessions)?;
        debug!(count = swaps.len(), "trainer swap analysis");
        recommendations.extend(swaps);

        cancel.check()?;
        let capacity = self.capacity_mismatches(sessions)?;
        debug!(count = capacity.len(), "capacity analysis");
        recommendations.extend(capacity);

        cancel.check()?;
        let low = self.low_performers(sessions)?;
        debug!(count = low.len(), "low performer analysis");
        recommendations.extend(low);

        let total = recommendations.len();
        let ranked = rank_recommendations(recommendations, self.recommendation_cap);
        info!(generated = total, returned = ranked.len(), "recommendations ready");
        Ok(ranked)
    }

    fn underperforming_slots(&self, sessions: &[SessionRecord]) -> Result<Vec<Recommendation>> {
        let total_check_ins: u64 = sessions.iter().map(|s| u64::from(s.checked_in)).sum();
        let total_capacity: u64 = sessions.iter().map(|s| u64::from(s.capacity)).sum();
        let global_fill = percent(total_check_ins as f64, total_capacity as f64);
        if global_fill == 0.0 {
            return Ok(Vec::new());
        }

        let groups = group_by(sessions, |s| {
            keys::join(&[
                s.day_of_week.as_str(),
                keys::normalize_time(&s.time_of_day).as_str(),
                s.location.as_str(),
            ])
        });

        let mut out = Vec::new();
        for group in measured(&groups)? {
            if group.session_count < SLOT_MIN_SESSIONS
                || group.fill_rate >= SLOT_FILL_RATIO * global_fill
            {
                continue;
            }

            let gap = global_fill - group.fill_rate;
            let avg_capacity = group.total_capacity as f64 / group.session_count as f64;
            let recovered_per_session = gap / 100.0 * avg_capacity;
            let priority = if group.fill_rate < SLOT_CRITICAL_RATIO * global_fill {
                Priority::High
            } else {
                Priority::Medium
            };

            out.push(Recommendation {
                recommendation_type: RecommendationType::Schedule,
                priority,
                title: "Underperforming time slot".to_string(),
                target: group.key.clone(),
                confidence: (50.0 + 5.0 * group.session_count as f64).min(95.0),
                expected_impact: ExpectedImpact {
                    metric: "fill rate".to_string(),
                    change: round2(gap),
                    unit: "%".to_string(),
                },
                estimated_roi: round2(
                    recovered_per_session * group.revenue_per_check_in * group.session_count as f64,
                ),
                action_required: format!(
                    "Reschedule or replace the classes running in {}",
                    group.key
                ),
                rationale: vec![
                    format!(
                        "Fill rate {:.1}% against a studio average of {:.1}%",
                        group.fill_rate, global_fill
                    ),
                    format!("{} sessions observed in this slot", group.session_count),
                ],
                risk_level: RiskLevel::Medium,
            });
        }
        Ok(out)
    }

    fn trainer_swaps(&self, sessions: &[SessionRecord]) -> Result<Vec<Recommendation>> {
        let by_class = group_by(sessions, |s| s.class_name.clone());

        let mut out = Vec::new();
        for (class_name, members) in &by_class {
            let mut by_trainer: Groups = BTreeMap::new();
            for &session in members {
                by_trainer.entry(session.trainer.clone()).or_default().push(session);
            }

            let trainers: Vec<GroupedMetrics> = measured(&by_trainer)?
                .into_iter()
                .filter(|m| m.session_count >= TRAINER_MIN_SESSIONS)
                .collect();
            if trainers.len() < 2 {
                continue;
            }

            let (Some(best), Some(worst)) = (
                trainers.iter().max_by(|a, b| a.class_avg.total_cmp(&b.class_avg)),
                trainers.iter().min_by(|a, b| a.class_avg.total_cmp(&b.class_avg)),
            ) else {
                continue;
            };
            if best.class_avg <= worst.class_avg
                || best.class_avg < TRAINER_SWAP_RATIO * worst.class_avg
            {
                continue;
            }

            let uplift = best.class_avg - worst.class_avg;
            let strong = best.class_avg >= TRAINER_SWAP_STRONG_RATIO * worst.class_avg;
            let sample = (best.session_count + worst.session_count) as f64;

            out.push(Recommendation {
                recommendation_type: RecommendationType::Trainer,
                priority: if strong { Priority::High } else { Priority::Medium },
                title: format!("Trainer swap for {class_name}"),
                target: class_name.clone(),
                confidence: (40.0 + 3.0 * sample).min(90.0),
                expected_impact: ExpectedImpact {
                    metric: "class average".to_string(),
                    change: round2(uplift),
                    unit: "attendees".to_string(),
                },
                estimated_roi: round2(
                    uplift * worst.revenue_per_check_in.max(best.revenue_per_check_in)
                        * worst.session_count as f64,
                ),
                action_required: format!(
                    "Assign {} to {} sessions currently led by {}",
                    best.key, class_name, worst.key
                ),
                rationale: vec![
                    format!(
                        "{} averages {:.1} attendees across {} sessions",
                        best.key, best.class_avg, best.session_count
                    ),
                    format!(
                        "{} averages {:.1} attendees across {} sessions",
                        worst.key, worst.class_avg, worst.session_count
                    ),
                ],
                risk_level: RiskLevel::Medium,
            });
        }
        Ok(out)
    }

    fn capacity_mismatches(&self, sessions: &[SessionRecord]) -> Result<Vec<Recommendation>> {
        let groups = group_by(sessions, |s| {
            keys::join(&[s.class_name.as_str(), s.location.as_str()])
        });

        let mut out = Vec::new();
        for group in measured(&groups)? {
            let n = group.session_count as f64;
            let avg_waitlist = group.total_waitlisted as f64 / n;

            if group.fill_rate > FULL_FILL_RATE && avg_waitlist > WAITLIST_PRESSURE {
                out.push(Recommendation {
                    recommendation_type: RecommendationType::Capacity,
                    priority: Priority::High,
                    title: "Increase capacity".to_string(),
                    target: group.key.clone(),
                    confidence: (60.0 + 2.0 * n).min(90.0),
                    expected_impact: ExpectedImpact {
                        metric: "check-ins".to_string(),
                        change: round2(avg_waitlist),
                        unit: "attendees per session".to_string(),
                    },
                    estimated_roi: round2(avg_waitlist * group.revenue_per_check_in * n),
                    action_required: format!("Add spots or a second session for {}", group.key),
                    rationale: vec![
                        format!("Fill rate {:.1}%", group.fill_rate),
                        format!("Average waitlist of {avg_waitlist:.1} per session"),
                    ],
                    risk_level: RiskLevel::Low,
                });
            } else if group.fill_rate < LOW_FILL_RATE
                && group.session_count >= FORMAT_MIN_SESSIONS
            {
                out.push(Recommendation {
                    recommendation_type: RecommendationType::Capacity,
                    priority: Priority::Medium,
                    title: "Reduce capacity".to_string(),
                    target: group.key.clone(),
                    confidence: (50.0 + 3.0 * n).min(85.0),
                    expected_impact: ExpectedImpact {
                        metric: "fill rate".to_string(),
                        change: round2(TARGET_FILL_RATE - group.fill_rate),
                        unit: "%".to_string(),
                    },
                    estimated_roi: 0.0,
                    action_required: format!(
                        "Move {} to a smaller room or cap bookings",
                        group.key
                    ),
                    rationale: vec![
                        format!(
                            "Fill rate {:.1}% over {} sessions",
                            group.fill_rate, group.session_count
                        ),
                        format!("Average attendance {:.1}", group.class_avg),
                    ],
                    risk_level: RiskLevel::Low,
                });
            }
        }
        Ok(out)
    }

    fn low_performers(&self, sessions: &[SessionRecord]) -> Result<Vec<Recommendation>> {
        let groups = group_by(sessions, |s| s.class_name.clone());
        let formats: Vec<GroupedMetrics> = measured(&groups)?
            .into_iter()
            .filter(|m| m.session_count >= FORMAT_MIN_SESSIONS)
            .collect();
        if formats.len() < 2 {
            return Ok(Vec::new());
        }

        let (Some(top), Some(bottom)) = (
            formats.iter().max_by(|a, b| a.class_avg.total_cmp(&b.class_avg)),
            formats.iter().min_by(|a, b| a.class_avg.total_cmp(&b.class_avg)),
        ) else {
            return Ok(Vec::new());
        };
        if bottom.class_avg >= LOW_PERFORMER_RATIO * top.class_avg {
            return Ok(Vec::new());
        }

        let gap = top.class_avg - bottom.class_avg;
        Ok(vec![Recommendation {
            recommendation_type: RecommendationType::Marketing,
            priority: Priority::Medium,
            title: format!("Promote or replace {}", bottom.key),
            target: bottom.key.clone(),
            confidence: (50.0 + 2.0 * bottom.session_count as f64).min(85.0),
            expected_impact: ExpectedImpact {
                metric: "class average".to_string(),
                change: round2(gap),
                unit: "attendees".to_string(),
            },
            estimated_roi: round2(gap * top.revenue_per_check_in * bottom.session_count as f64),
            action_required: format!(
                "Run a promotion for {}; swap in {} if attendance does not recover",
                bottom.key, top.key
            ),
            rationale: vec![
                format!("{} averages {:.1} attendees", bottom.key, bottom.class_avg),
                format!("{} averages {:.1} attendees", top.key, top.class_avg),
            ],
            risk_level: RiskLevel::Medium,
        }])
    }

    /// Flags recent sessions of each class format that break from its history.
    pub fn detect_anomalies(
        &self,
        sessions: &[SessionRecord],
        cancel: &CancellationToken,
    ) -> Result<Vec<Anomaly>> {
        let groups = group_by(sessions, |s| s.class_name.clone());

        let mut anomalies = Vec::new();
        for (format, mut members) in groups {
            cancel.check()?;
            if members.len() < MIN_ANOMALY_GROUP || members.len() - RECENT_SESSIONS < MIN_HISTORY {
                continue;
            }

            members.sort_by(|a, b| a.date.cmp(&b.date));
            let (history, recent) = members.split_at(members.len() - RECENT_SESSIONS);
            anomalies.extend(self.scan_recent(&format, history, recent));
        }

        anomalies.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.z_score.abs().total_cmp(&a.z_score.abs()))
        });
        info!(count = anomalies.len(), "anomaly scan complete");
        Ok(anomalies)
    }

    fn scan_recent(
        &self,
        format: &str,
        history: &[&SessionRecord],
        recent: &[&SessionRecord],
    ) -> Vec<Anomaly> {
        let check_ins: Vec<f64> = history.iter().map(|s| s.checked_in as f64).collect();
        let revenue: Vec<f64> = history.iter().map(|s| s.revenue).collect();
        let cancel_rates: Vec<f64> = history.iter().map(|s| cancel_rate(s)).collect();
        let historical_cancel_rate = stats::mean(&cancel_rates);

        let mut out = Vec::new();
        for session in recent {
            let actual = session.checked_in as f64;
            let score = stats::detect_anomaly(actual, &check_ins, self.anomaly_threshold);
            if !score.is_anomaly {
                continue;
            }

            let mut related_factors = Vec::new();
            if stats::detect_anomaly(session.revenue, &revenue, self.anomaly_threshold).is_anomaly {
                related_factors.push("revenue".to_string());
            }
            if (cancel_rate(session) - historical_cancel_rate).abs() > CANCELLATION_SHIFT_POINTS {
                related_factors.push("cancellation rate".to_string());
            }

            let expected = score.median;
            let dropped = actual < expected;
            let mut suggested_actions = if dropped {
                vec![
                    "Check for schedule conflicts or a trainer change".to_string(),
                    "Reach out to regulars who missed this session".to_string(),
                ]
            } else {
                vec![
                    "Check whether capacity limited this session".to_string(),
                    "Identify what drove the extra demand and repeat it".to_string(),
                ]
            };
            if related_factors.iter().any(|f| f == "cancellation rate") {
                suggested_actions
                    .push("Review the late-cancellation policy for this class".to_string());
            }
            if related_factors.iter().any(|f| f == "revenue") {
                suggested_actions
                    .push("Verify pricing and package usage for this session".to_string());
            }

            out.push(Anomaly {
                group: format.to_string(),
                date: session.date,
                kind: if related_factors.len() > 1 {
                    AnomalyKind::MultiFactor
                } else {
                    AnomalyKind::Attendance
                },
                severity: score.severity,
                expected_value: expected,
                actual_value: actual,
                deviation_percent: round2(percent(actual - expected, expected)),
                z_score: round2(score.modified_z),
                context_notes: vec![
                    format!(
                        "{} led the {} session at {}, {}",
                        session.trainer, session.date, session.time_of_day, session.location
                    ),
                    format!("Historical median {:.1} across {} sessions", expected, history.len()),
                ],
                related_factors,
                suggested_actions,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalyticsError;
    use crate::metrics::tests::session;
    use crate::models::Severity;
    use chrono::{Duration, NaiveDate};

    fn at(class_name: &str, trainer: &str, slot: (&str, &str), checked_in: u32) -> SessionRecord {
        let mut s = session(checked_in, 20);
        s.class_name = class_name.to_string();
        s.trainer = trainer.to_string();
        s.day_of_week = slot.0.to_string();
        s.time_of_day = slot.1.to_string();
        s
    }

    fn engine() -> InsightEngine {
        InsightEngine::default()
    }

    fn of_type(recs: &[Recommendation], kind: RecommendationType) -> Vec<&Recommendation> {
        recs.iter().filter(|r| r.recommendation_type == kind).collect()
    }

    const MORNING: (&str, &str) = ("Monday", "07:30");
    const EVENING: (&str, &str) = ("Tuesday", "18:00");

    #[test]
    fn flags_underperforming_slot() {
        let mut sessions: Vec<SessionRecord> = (0..3).map(|_| at("Barre", "A", MORNING, 4)).collect();
        sessions.extend((0..6).map(|_| at("Barre", "A", EVENING, 18)));

        let recs = engine().generate_recommendations(&sessions, &CancellationToken::new()).unwrap();
        assert_eq!(recs.len(), 1);
        let rec = &recs[0];
        assert_eq!(rec.recommendation_type, RecommendationType::Schedule);
        assert_eq!(rec.priority, Priority::High);
        assert_eq!(rec.target, "Monday|07:30|Kwality House");
        assert_eq!(rec.confidence, 65.0);
        assert!(rec.expected_impact.change > 40.0);
    }

    #[test]
    fn slot_needs_three_sessions() {
        let mut sessions: Vec<SessionRecord> = (0..2).map(|_| at("Barre", "A", MORNING, 4)).collect();
        sessions.extend((0..6).map(|_| at("Barre", "A", EVENING, 18)));
        let recs = engine().generate_recommendations(&sessions, &CancellationToken::new()).unwrap();
        assert!(of_type(&recs, RecommendationType::Schedule).is_empty());
    }

    #[test]
    fn suggests_trainer_swap() {
        let mut sessions: Vec<SessionRecord> = (0..3).map(|_| at("Barre", "Strong", MORNING, 16)).collect();
        sessions.extend((0..3).map(|_| at("Barre", "Weak", MORNING, 10)));

        let recs = engine().generate_recommendations(&sessions, &CancellationToken::new()).unwrap();
        assert_eq!(recs.len(), 1);
        let rec = &recs[0];
        assert_eq!(rec.recommendation_type, RecommendationType::Trainer);
        assert_eq!(rec.priority, Priority::High);
        assert_eq!(rec.expected_impact.change, 6.0);
        assert!(rec.action_required.contains("Strong"));
        assert!(rec.action_required.contains("Weak"));
    }

    #[test]
    fn close_trainers_are_left_alone() {
        let mut sessions: Vec<SessionRecord> = (0..3).map(|_| at("Barre", "A", MORNING, 12)).collect();
        sessions.extend((0..3).map(|_| at("Barre", "B", MORNING, 10)));
        let recs = engine().generate_recommendations(&sessions, &CancellationToken::new()).unwrap();
        assert!(of_type(&recs, RecommendationType::Trainer).is_empty());
    }

    #[test]
    fn capacity_in_both_directions() {
        let mut sessions: Vec<SessionRecord> = (0..4)
            .map(|_| {
                let mut s = at("Power Cycle", "A", MORNING, 19);
                s.waitlisted = 3;
                s
            })
            .collect();
        sessions.extend((0..5).map(|_| at("Mat 57", "B", EVENING, 6)));

        let recs = engine().generate_recommendations(&sessions, &CancellationToken::new()).unwrap();
        let capacity = of_type(&recs, RecommendationType::Capacity);
        assert_eq!(capacity.len(), 2);
        assert_eq!(capacity[0].title, "Increase capacity");
        assert_eq!(capacity[0].priority, Priority::High);
        assert_eq!(capacity[0].target, "Power Cycle|Kwality House");
        assert_eq!(capacity[1].title, "Reduce capacity");
        assert_eq!(capacity[1].priority, Priority::Medium);
        assert_eq!(capacity[1].expected_impact.change, 45.0);
    }

    #[test]
    fn weak_format_gets_marketing_push() {
        let mut sessions: Vec<SessionRecord> = (0..5).map(|_| at("Barre", "A", MORNING, 16)).collect();
        sessions.extend((0..5).map(|_| at("Mat", "B", MORNING, 4)));

        let recs = engine().generate_recommendations(&sessions, &CancellationToken::new()).unwrap();
        let marketing = of_type(&recs, RecommendationType::Marketing);
        assert_eq!(marketing.len(), 1);
        assert_eq!(marketing[0].target, "Mat");
        assert_eq!(marketing[0].expected_impact.change, 12.0);
    }

    fn rec(priority: Priority, confidence: f64) -> Recommendation {
        Recommendation {
            recommendation_type: RecommendationType::Pricing,
            priority,
            title: String::new(),
            target: String::new(),
            confidence,
            expected_impact: ExpectedImpact {
                metric: "revenue".to_string(),
                change: 0.0,
                unit: "INR".to_string(),
            },
            estimated_roi: 0.0,
            action_required: String::new(),
            rationale: Vec::new(),
            risk_level: RiskLevel::Low,
        }
    }

    #[test]
    fn ranking_orders_by_priority_then_confidence() {
        let mut input = vec![
            rec(Priority::Low, 99.0),
            rec(Priority::High, 60.0),
            rec(Priority::Medium, 70.0),
            rec(Priority::High, 80.0),
        ];
        input.extend((0..10).map(|i| rec(Priority::Medium, i as f64)));

        let ranked = rank_recommendations(input, 10);
        assert_eq!(ranked.len(), 10);
        assert_eq!((ranked[0].priority, ranked[0].confidence), (Priority::High, 80.0));
        assert_eq!((ranked[1].priority, ranked[1].confidence), (Priority::High, 60.0));
        assert_eq!((ranked[2].priority, ranked[2].confidence), (Priority::Medium, 70.0));
        assert!(ranked.iter().all(|r| r.priority != Priority::Low));
    }

    fn history_then(recent: &[(u32, u32, u32)]) -> Vec<SessionRecord> {
        let start = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let mut check_ins = vec![(10, 10, 0), (12, 12, 0), (11, 11, 0), (13, 13, 0), (10, 10, 0), (12, 12, 0)];
        check_ins.extend_from_slice(recent);
        check_ins
            .into_iter()
            .enumerate()
            .map(|(i, (checked_in, booked, late))| {
                let mut s = session(checked_in, 40);
                s.date = start + Duration::weeks(i as i64);
                s.booked = booked;
                s.late_cancelled = late;
                s
            })
            .collect()
    }

    #[test]
    fn detects_attendance_spike_with_revenue_factor() {
        let sessions = history_then(&[(11, 11, 0), (30, 30, 0), (12, 12, 0)]);
        let anomalies = engine().detect_anomalies(&sessions, &CancellationToken::new()).unwrap();

        assert_eq!(anomalies.len(), 1);
        let anomaly = &anomalies[0];
        assert_eq!(anomaly.group, "Barre 57");
        assert_eq!(anomaly.severity, Severity::Critical);
        assert_eq!(anomaly.kind, AnomalyKind::Attendance);
        assert_eq!(anomaly.expected_value, 11.5);
        assert_eq!(anomaly.actual_value, 30.0);
        assert_eq!(anomaly.related_factors, vec!["revenue".to_string()]);
        assert!(anomaly.deviation_percent > 150.0);
    }

    #[test]
    fn cancellation_shift_makes_it_multi_factor() {
        let sessions = history_then(&[(11, 11, 0), (30, 40, 10), (12, 12, 0)]);
        let anomalies = engine().detect_anomalies(&sessions, &CancellationToken::new()).unwrap();

        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::MultiFactor);
        assert_eq!(anomalies[0].related_factors.len(), 2);
        assert!(anomalies[0]
            .suggested_actions
            .iter()
            .any(|a| a.contains("late-cancellation")));
    }

    #[test]
    fn historical_cancel_rate_averages_each_session() {
        let mut sessions = history_then(&[(11, 11, 0), (30, 30, 0), (12, 12, 0)]);
        // pooled over bookings this history cancels under 5%, per session it averages 83%
        sessions[0].booked = 100;
        for s in &mut sessions[1..6] {
            s.booked = 1;
            s.late_cancelled = 1;
        }

        let anomalies = engine().detect_anomalies(&sessions, &CancellationToken::new()).unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::MultiFactor);
        assert!(anomalies[0]
            .related_factors
            .contains(&"cancellation rate".to_string()));
    }

    #[test]
    fn short_history_is_not_scanned() {
        let sessions: Vec<SessionRecord> = history_then(&[(30, 30, 0)]).into_iter().skip(2).collect();
        // 5 sessions: only 2 historical after holding out the last 3
        let anomalies = engine().detect_anomalies(&sessions, &CancellationToken::new()).unwrap();
        assert!(anomalies.is_empty());
    }

    #[test]
    fn anomalies_sorted_by_severity() {
        let sessions = history_then(&[(17, 17, 0), (30, 30, 0), (18, 18, 0)]);
        let anomalies = engine().detect_anomalies(&sessions, &CancellationToken::new()).unwrap();
        let severities: Vec<Severity> = anomalies.iter().map(|a| a.severity).collect();
        assert_eq!(severities, vec![Severity::Critical, Severity::Moderate, Severity::Minor]);
    }

    #[test]
    fn cancelled_scan_returns_error() {
        let token = CancellationToken::new();
        token.cancel();
        let sessions = history_then(&[(11, 11, 0), (30, 30, 0), (12, 12, 0)]);
        assert!(matches!(
            engine().detect_anomalies(&sessions, &token),
            Err(AnalyticsError::Cancelled)
        ));
        assert!(matches!(
            engine().generate_recommendations(&sessions, &token),
            Err(AnalyticsError::Cancelled)
        ));
    }
}
