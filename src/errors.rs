use std::io;

use thiserror::Error;

use crate::validate::ValidationFailure;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("caller not authorized: {0}")]
    Authentication(String),
    #[error("geocoding provider failed (status {status}): {info}")]
    Provider {
        status: String,
        info: String,
        infocode: Option<String>,
    },
    #[error("geocoding result rejected: {0}")]
    Validation(#[from] ValidationFailure),
    #[error("all {attempts} geocoding strategies failed; last error: {source}")]
    ExhaustedStrategies {
        attempts: usize,
        #[source]
        source: Box<AppError>,
    },
    #[error("failed to persist geocoding data: {0}")]
    Persistence(String),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl AppError {
    pub fn provider(status: impl Into<String>, info: impl Into<String>) -> Self {
        AppError::Provider {
            status: status.into(),
            info: info.into(),
            infocode: None,
        }
    }

    /// True for failures of the write path, which never invalidate a resolution.
    pub fn is_persistence(&self) -> bool {
        matches!(self, AppError::Persistence(_) | AppError::Database(_))
    }

    /// Innermost cause when the error wraps an exhausted strategy chain.
    pub fn last_cause(&self) -> &AppError {
        match self {
            AppError::ExhaustedStrategies { source, .. } => source.last_cause(),
            other => other,
        }
    }
}
