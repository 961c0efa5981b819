use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::SessionRecord;

/// One CSV row as exported by the scheduling system. Numeric columns may be blank.
#[derive(Debug, Deserialize)]
pub struct RawSessionRow {
    pub class_name: String,
    #[serde(default)]
    pub class_type: Option<String>,
    pub trainer: String,
    pub location: String,
    #[serde(default)]
    pub day_of_week: Option<String>,
    pub date: NaiveDate,
    pub time: String,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub checked_in: Option<u32>,
    #[serde(default)]
    pub booked: Option<u32>,
    #[serde(default)]
    pub late_cancelled: Option<u32>,
    #[serde(default)]
    pub no_show: Option<u32>,
    #[serde(default)]
    pub revenue: Option<f64>,
    #[serde(default)]
    pub waitlisted: Option<u32>,
    #[serde(default)]
    pub non_paid: Option<u32>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl From<RawSessionRow> for SessionRecord {
    fn from(row: RawSessionRow) -> Self {
        let day_of_week = row
            .day_of_week
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| row.date.format("%A").to_string());

        SessionRecord {
            class_name: row.class_name,
            class_type: row.class_type.unwrap_or_default(),
            trainer: row.trainer,
            location: row.location,
            day_of_week,
            date: row.date,
            time_of_day: row.time,
            capacity: row.capacity.unwrap_or(0),
            checked_in: row.checked_in.unwrap_or(0),
            booked: row.booked.unwrap_or(0),
            late_cancelled: row.late_cancelled.unwrap_or(0),
            no_show: row.no_show.unwrap_or(0),
            revenue: row.revenue.unwrap_or(0.0).max(0.0),
            waitlisted: row.waitlisted.unwrap_or(0),
            non_paid: row.non_paid.unwrap_or(0),
            active: row.active.unwrap_or(false),
        }
    }
}

pub fn read_sessions_from<R: Read>(input: R) -> Result<Vec<SessionRecord>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let mut sessions = Vec::new();

    for result in reader.deserialize::<RawSessionRow>() {
        let row = result?;
        if row.checked_in.is_none() {
            debug!(class = %row.class_name, date = %row.date, "missing check-ins, defaulting to 0");
        }
        sessions.push(SessionRecord::from(row));
    }

    if sessions.is_empty() {
        warn!("session export contained no rows");
    }
    Ok(sessions)
}

pub fn read_sessions(path: &Path) -> Result<Vec<SessionRecord>> {
    let file = std::fs::File::open(path)?;
    read_sessions_from(file)
}
