use thiserror::Error;

#[derive(Error, Debug)]
pub enum GovError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Insufficient data for '{series}': need {required} points, have {available}")]
    InsufficientData {
        series:    String,
        required:  usize,
        available: usize,
    },

    #[error("Collector for '{pillar}' unavailable: {reason}")]
    CollectorUnavailable { pillar: String, reason: String },

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Persistence conflict on {entity} after retry: {source}")]
    PersistenceConflict {
        entity: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Role '{role}' may not perform '{action}'")]
    Forbidden { role: String, action: &'static str },

    #[error("Run {run_id} cancelled during {stage}")]
    Cancelled { run_id: String, stage: &'static str },

    #[error("Run {0} not found")]
    RunNotFound(String),

    #[error("Run {run_id} is {status}; only cancelled or failed runs can be purged")]
    RunNotPurgeable { run_id: String, status: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type GovResult<T> = Result<T, GovError>;
