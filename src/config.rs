use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, Result};

/// Hour delta that counts as a time change when scanning a single recurring slot.
pub const SLOT_TIME_CHANGE_HOURS: f64 = 0.25;

/// Hour delta that counts as a time change when scanning a class timeline.
pub const TIMELINE_TIME_CHANGE_HOURS: f64 = 1.0;

/// Tunables shared by the analytics pipeline.
///
/// Every field has a default, so a TOML file only needs to name the values it
/// overrides:
///
/// ```
/// use studio_analytics::config::AnalyticsConfig;
///
/// let config = AnalyticsConfig::from_toml_str("anomaly_threshold = 3.5").unwrap();
/// assert_eq!(config.anomaly_threshold, 3.5);
/// assert_eq!(config.recommendation_cap, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Confidence level for t-tests and intervals (0.90, 0.95 or 0.99).
    pub confidence_level: f64,
    /// Modified z-score above which a value is anomalous.
    pub anomaly_threshold: f64,
    /// Periods ahead forecast after a change event.
    pub forecast_periods: usize,
    /// Maximum number of recommendations returned.
    pub recommendation_cap: usize,
    /// Sessions taken on each side of a change pivot.
    pub window_size: usize,
    /// A slot whose latest session is older than this is not scanned.
    pub active_window_days: i64,
    /// Time-change threshold for the per-slot scan.
    pub time_change_threshold_hours: f64,
    /// Time-change threshold for the class timeline scan.
    pub timeline_time_change_threshold_hours: f64,
    pub validate_with_statistics: bool,
    pub min_checkins: Option<u64>,
    pub min_classes: Option<usize>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            anomaly_threshold: 3.0,
            forecast_periods: 4,
            recommendation_cap: 10,
            window_size: 5,
            active_window_days: 30,
            time_change_threshold_hours: SLOT_TIME_CHANGE_HOURS,
            timeline_time_change_threshold_hours: TIMELINE_TIME_CHANGE_HOURS,
            validate_with_statistics: true,
            min_checkins: None,
            min_classes: None,
        }
    }
}

impl AnalyticsConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: AnalyticsConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(AnalyticsError::InvalidConfig(format!(
                "confidence_level must be in (0, 1), got {}",
                self.confidence_level
            )));
        }

        if self.anomaly_threshold <= 0.0 {
            return Err(AnalyticsError::InvalidConfig(format!(
                "anomaly_threshold must be positive, got {}",
                self.anomaly_threshold
            )));
        }

        if self.window_size == 0 {
            return Err(AnalyticsError::InvalidConfig(
                "window_size must be at least 1".to_string(),
            ));
        }

        if self.active_window_days < 0 {
            return Err(AnalyticsError::InvalidConfig(format!(
                "active_window_days must not be negative, got {}",
                self.active_window_days
            )));
        }

        if self.time_change_threshold_hours < 0.0 {
            return Err(AnalyticsError::InvalidConfig(format!(
                "time_change_threshold_hours must not be negative, got {}",
                self.time_change_threshold_hours
            )));
        }

        if self.timeline_time_change_threshold_hours < 0.0 {
            return Err(AnalyticsError::InvalidConfig(format!(
                "timeline_time_change_threshold_hours must not be negative, got {}",
                self.timeline_time_change_threshold_hours
            )));
        }

        Ok(())
    }
}
