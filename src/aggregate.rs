use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::keys::{self, TimeNormalizer};
use crate::metrics;
use crate::models::{GroupedMetrics, SessionRecord};

/// Attribute tuple a table view groups sessions by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupBy {
    #[default]
    ClassSlot,
    Class,
    Trainer,
    Location,
    DayOfWeek,
    ClassTrainer,
}

impl GroupBy {
    pub fn key_for(self, session: &SessionRecord, times: &mut TimeNormalizer) -> String {
        match self {
            GroupBy::ClassSlot => keys::generate(
                &session.class_name,
                &session.day_of_week,
                &times.normalize(&session.time_of_day),
                &session.location,
            ),
            GroupBy::Class => session.class_name.clone(),
            GroupBy::Trainer => session.trainer.clone(),
            GroupBy::Location => session.location.clone(),
            GroupBy::DayOfWeek => session.day_of_week.clone(),
            GroupBy::ClassTrainer => {
                keys::join(&[session.class_name.as_str(), session.trainer.as_str()])
            }
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GroupBy::ClassSlot => "class-slot",
            GroupBy::Class => "class",
            GroupBy::Trainer => "trainer",
            GroupBy::Location => "location",
            GroupBy::DayOfWeek => "day",
            GroupBy::ClassTrainer => "class-trainer",
        };
        f.write_str(label)
    }
}

impl FromStr for GroupBy {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "class-slot" | "slot" => Ok(GroupBy::ClassSlot),
            "class" => Ok(GroupBy::Class),
            "trainer" => Ok(GroupBy::Trainer),
            "location" => Ok(GroupBy::Location),
            "day" => Ok(GroupBy::DayOfWeek),
            "class-trainer" => Ok(GroupBy::ClassTrainer),
            other => Err(format!("unknown grouping: {other}")),
        }
    }
}

/// Thresholds applied to aggregates after metrics are computed.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupFilters {
    pub min_checkins: Option<u64>,
    pub min_classes: Option<usize>,
}

impl GroupFilters {
    pub fn keeps(&self, metrics: &GroupedMetrics) -> bool {
        let checkins_ok = self
            .min_checkins
            .map_or(true, |min| metrics.total_check_ins >= min);
        let classes_ok = self
            .min_classes
            .map_or(true, |min| metrics.session_count >= min);
        checkins_ok && classes_ok
    }
}

/// Buckets sessions by key, keeping each bucket in input order.
pub fn group_by<'a, F>(
    sessions: &'a [SessionRecord],
    mut key_fn: F,
) -> BTreeMap<String, Vec<&'a SessionRecord>>
where
    F: FnMut(&SessionRecord) -> String,
{
    let mut groups: BTreeMap<String, Vec<&SessionRecord>> = BTreeMap::new();
    for session in sessions {
        groups.entry(key_fn(session)).or_default().push(session);
    }
    groups
}

pub fn group_sessions(
    sessions: &[SessionRecord],
    dimension: GroupBy,
) -> BTreeMap<String, Vec<&SessionRecord>> {
    let mut times = TimeNormalizer::new();
    let groups = group_by(sessions, |session| dimension.key_for(session, &mut times));
    debug!(
        dimension = %dimension,
        groups = groups.len(),
        distinct_times = times.len(),
        "grouped sessions"
    );
    groups
}

/// Sorts by composite score (key breaks ties) and assigns 1-based ranks.
pub fn rank(metrics: &mut [GroupedMetrics]) {
    metrics.sort_by(|a, b| {
        b.composite_score
            .total_cmp(&a.composite_score)
            .then_with(|| a.key.cmp(&b.key))
    });
    for (position, entry) in metrics.iter_mut().enumerate() {
        entry.rank = position + 1;
    }
}

/// Groups, measures, filters and ranks sessions for one table request.
pub fn aggregate(
    sessions: &[SessionRecord],
    dimension: GroupBy,
    filters: GroupFilters,
    cancel: &CancellationToken,
) -> Result<Vec<GroupedMetrics>> {
    let groups = group_sessions(sessions, dimension);

    let computed: Result<Vec<GroupedMetrics>> = groups
        .par_iter()
        .map(|(key, members)| {
            cancel.check()?;
            metrics::calculate(key, members)
        })
        .collect();

    let before_filter = groups.len();
    let mut kept: Vec<GroupedMetrics> = computed?
        .into_iter()
        .filter(|entry| filters.keeps(entry))
        .collect();
    rank(&mut kept);

    info!(
        sessions = sessions.len(),
        groups = before_filter,
        kept = kept.len(),
        "aggregated sessions"
    );
    Ok(kept)
}
