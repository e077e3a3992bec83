//! Error types for the pipeline and its collaborators.

use thiserror::Error;

/// Startup configuration error. The only fatal error class.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid timeframe {name:?}: {reason}")]
    InvalidTimeframe { name: String, reason: String },
    #[error("validation error: {0}")]
    Validation(String),
}

/// Storage collaborator failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Alert rule administration error.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("invalid condition {source_text:?}: {reason}")]
    InvalidCondition { source_text: String, reason: String },
    #[error("unknown rule: {0}")]
    UnknownRule(String),
}

/// Runtime failure of a single condition evaluation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("type mismatch: cannot apply {op} to {lhs} and {rhs}")]
    TypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
}

/// Ingestion source failure.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source already started")]
    AlreadyStarted,
    #[error("failed to start source: {0}")]
    Start(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("failed to spawn worker {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
