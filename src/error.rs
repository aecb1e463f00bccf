use thiserror::Error;

use crate::registry::ProcessingStatus;

/// Failure scoped to a single input document. The batch loop catches these
/// at the per-document boundary and moves on.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("unknown document format: {0}")]
    UnknownFormat(String),

    #[error("parse failed: {0}")]
    Parse(String),

    #[error("load failed: {0}")]
    Load(String),
}

impl DocumentError {
    pub fn ledger_status(&self) -> ProcessingStatus {
        match self {
            Self::UnknownFormat(_) => ProcessingStatus::Skipped,
            Self::Extraction(_) | Self::Parse(_) | Self::Load(_) => ProcessingStatus::Error,
        }
    }
}

impl From<rusqlite::Error> for DocumentError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Load(error.to_string())
    }
}

pub type DocumentResult<T> = Result<T, DocumentError>;

/// Non-fatal finding attached to a document or one of its entities.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ValidationWarning {
    pub scope: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.scope, self.message)
    }
}
