use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, ReproError>;

#[derive(Debug, Error)]
pub enum ReproError {
    #[error("setup failed: {0}")]
    Setup(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("datom log line {line}: {message}")]
    LogParse { line: usize, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub operation: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl ReproError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Setup(_) => "SETUP_FAILED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::LogParse { .. } => "LOG_PARSE_FAILED",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Sqlite(_) => "SQLITE_ERROR",
            Self::Toml(_) => "TOML_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Environment problems: the current size's test is aborted, not recorded as a finding.
    #[must_use]
    pub const fn is_setup_failure(&self) -> bool {
        matches!(self, Self::Setup(_) | Self::Io(_) | Self::Sqlite(_))
    }

    pub(crate) fn setup(stage: &str, err: impl std::fmt::Display) -> Self {
        Self::Setup(format!("{stage}: {err}"))
    }

    pub fn to_payload(&self, operation: impl Into<String>, size: Option<u64>) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_string(),
            message: self.to_string(),
            operation: operation.into(),
            trace_id: Uuid::new_v4().to_string(),
            size,
        }
    }
}
