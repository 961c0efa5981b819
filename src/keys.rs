use std::collections::HashMap;

use chrono::{NaiveTime, Timelike};

/// Separator for composite keys. Cleaned attribute values never contain it.
pub const DELIMITER: char = '|';

const TIME_FORMATS: [&str; 4] = ["%H:%M", "%H:%M:%S", "%I:%M %p", "%I:%M%p"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeKey {
    pub class_name: String,
    pub day_of_week: String,
    pub time_of_day: String,
    pub location: String,
}

pub fn generate(class_name: &str, day_of_week: &str, time_of_day: &str, location: &str) -> String {
    join(&[class_name, day_of_week, time_of_day, location])
}

pub fn join(parts: &[&str]) -> String {
    let mut key = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(DELIMITER);
        }
        key.push_str(part);
    }
    key
}

/// Splits a key built by [`generate`]; `None` unless it has exactly four parts.
pub fn parse(key: &str) -> Option<CompositeKey> {
    let parts: Vec<&str> = key.split(DELIMITER).collect();
    match parts.as_slice() {
        [class_name, day_of_week, time_of_day, location] => Some(CompositeKey {
            class_name: class_name.to_string(),
            day_of_week: day_of_week.to_string(),
            time_of_day: time_of_day.to_string(),
            location: location.to_string(),
        }),
        _ => None,
    }
}

pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let trimmed = raw.trim();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(trimmed, format).ok())
}

/// Fractional hours since midnight.
pub fn time_in_hours(raw: &str) -> Option<f64> {
    parse_time_of_day(raw).map(|t| t.hour() as f64 + t.minute() as f64 / 60.0)
}

/// `HH:MM` form of a time string, or the original string when it does not parse.
pub fn normalize_time(raw: &str) -> String {
    match parse_time_of_day(raw) {
        Some(time) => time.format("%H:%M").to_string(),
        None => raw.to_string(),
    }
}

/// Memoizes [`normalize_time`] for the lifetime of one aggregation request.
#[derive(Debug, Default)]
pub struct TimeNormalizer {
    cache: HashMap<String, String>,
}

impl TimeNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize(&mut self, raw: &str) -> String {
        if let Some(hit) = self.cache.get(raw) {
            return hit.clone();
        }
        let normalized = normalize_time(raw);
        self.cache.insert(raw.to_string(), normalized.clone());
        normalized
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
