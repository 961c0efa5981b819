use chrono::NaiveDate;
use serde::Serialize;

/// One scheduled class occurrence, already normalized by the import layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecord {
    pub class_name: String,
    pub class_type: String,
    pub trainer: String,
    pub location: String,
    pub day_of_week: String,
    pub date: NaiveDate,
    pub time_of_day: String,
    pub capacity: u32,
    pub checked_in: u32,
    pub booked: u32,
    pub late_cancelled: u32,
    pub no_show: u32,
    pub revenue: f64,
    pub waitlisted: u32,
    pub non_paid: u32,
    pub active: bool,
}

impl AsRef<SessionRecord> for SessionRecord {
    fn as_ref(&self) -> &SessionRecord {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupedMetrics {
    pub key: String,
    pub session_count: usize,
    pub total_check_ins: u64,
    pub total_capacity: u64,
    pub total_booked: u64,
    pub total_cancellations: u64,
    pub total_no_shows: u64,
    pub total_waitlisted: u64,
    pub total_non_paid: u64,
    pub total_revenue: f64,
    pub fill_rate: f64,
    pub cancellation_rate: f64,
    pub class_avg: f64,
    pub class_avg_non_empty: f64,
    pub consistency_score: f64,
    pub composite_score: f64,
    pub revenue_per_check_in: f64,
    pub rev_lost_per_cancellation: f64,
    pub status: GroupStatus,
    /// 1-based position after ranking; 0 until the aggregator ranks the group.
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TTestResult {
    pub t_statistic: f64,
    pub p_value: f64,
    pub degrees_of_freedom: usize,
    pub effect_size: f64,
    pub is_significant: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastResult {
    pub predicted: f64,
    pub confidence: f64,
    pub trend: Trend,
    pub slope: f64,
    pub intercept: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceInterval {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
    pub level: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Moderate,
    Critical,
}

/// Outcome of a single robust outlier check.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyScore {
    pub is_anomaly: bool,
    pub modified_z: f64,
    pub median: f64,
    pub mad: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Trainer,
    Class,
    Time,
    Level,
}

impl ChangeType {
    pub fn label(self) -> &'static str {
        match self {
            ChangeType::Trainer => "trainer",
            ChangeType::Class => "class",
            ChangeType::Time => "time",
            ChangeType::Level => "level",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub change_type: ChangeType,
    pub slot: String,
    pub occurred_on: NaiveDate,
    pub before_value: String,
    pub after_value: String,
    pub sessions_before: Vec<SessionRecord>,
    pub sessions_after: Vec<SessionRecord>,
    pub before_avg: f64,
    pub after_avg: f64,
    pub attendance_impact: f64,
    pub t_test: Option<TTestResult>,
    pub forecast: Option<ForecastResult>,
    pub confidence_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyKind {
    Attendance,
    MultiFactor,
}

#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub group: String,
    pub date: NaiveDate,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub expected_value: f64,
    pub actual_value: f64,
    pub deviation_percent: f64,
    pub z_score: f64,
    pub context_notes: Vec<String>,
    pub related_factors: Vec<String>,
    pub suggested_actions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationType {
    Schedule,
    Trainer,
    Capacity,
    Pricing,
    Marketing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Sort weight, higher first.
    pub fn weight(self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpectedImpact {
    pub metric: String,
    pub change: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub recommendation_type: RecommendationType,
    pub priority: Priority,
    pub title: String,
    pub target: String,
    pub confidence: f64,
    pub expected_impact: ExpectedImpact,
    pub estimated_roi: f64,
    pub action_required: String,
    pub rationale: Vec<String>,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeTypeSummary {
    pub change_type: ChangeType,
    pub count: usize,
    pub avg_impact: f64,
}
