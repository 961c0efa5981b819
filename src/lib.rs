//! Analytics core for studio class attendance: grouping and metrics, statistics,
//! schedule change detection, anomaly reports and recommendations.
//!
//! Everything here works on an in-memory slice of [`models::SessionRecord`] and
//! recomputes its outputs on each call.

pub mod aggregate;
pub mod cancel;
pub mod changes;
pub mod config;
pub mod error;
pub mod ingest;
pub mod insights;
pub mod keys;
pub mod metrics;
pub mod models;
pub mod report;
pub mod stats;

pub use cancel::CancellationToken;
pub use config::AnalyticsConfig;
pub use error::{AnalyticsError, Result};
