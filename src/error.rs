use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::StoreError;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("rate limited until {retry_at}")]
    RateLimited { retry_at: DateTime<Utc> },
    #[error("concurrent update on mastery record {user_id}/{criterion_id}")]
    ConcurrencyConflict {
        user_id: String,
        criterion_id: String,
    },
    #[error("{failed} of {total} batch items failed")]
    PartialBatchFailure { failed: usize, total: usize },
    #[error("store error: {0}")]
    Store(String),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::ConcurrencyConflict { .. } => "CONFLICT",
            Self::PartialBatchFailure { .. } => "PARTIAL_FAILURE",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    /// Operational errors are expected outcomes of bad input or contention;
    /// everything else points at a broken collaborator.
    pub fn is_operational(&self) -> bool {
        !matches!(self, Self::Store(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::RateLimited { .. } | Self::Store(_)
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Conflict {
                user_id,
                criterion_id,
                ..
            } => Self::ConcurrencyConflict {
                user_id,
                criterion_id,
            },
            StoreError::Invalid(message) => Self::Validation(vec![message]),
            StoreError::Backend(message) => Self::Store(message),
        }
    }
}
