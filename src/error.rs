use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Cannot compute metrics for an empty session group: {0}")]
    EmptyGroup(String),

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
