//! Shared error types for the services crate.

use thiserror::Error;

use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;
use tutor_core::model::{AntiForgetError, ProgressError, StudentError};

/// Failure of one REST call, after the response has been classified.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ApiError {
    #[error("login expired, please sign in again")]
    Unauthorized,
    #[error("permission denied")]
    Forbidden,
    #[error("{message}")]
    NotFound { message: String },
    #[error("{message}")]
    BadRequest { message: String },
    #[error("{message}")]
    Server { message: String },
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("network connection failed: {0}")]
    Network(String),
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// HTTP status behind the error, if a response was received.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized => Some(401),
            ApiError::Forbidden => Some(403),
            ApiError::NotFound { .. } => Some(404),
            ApiError::BadRequest { .. } => Some(400),
            ApiError::Server { .. } => Some(500),
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Network(_) | ApiError::Decode(_) | ApiError::InvalidRequest(_) => None,
        }
    }
}

/// Errors emitted by the per-entity stores.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Student(#[from] StudentError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    AntiForget(#[from] AntiForgetError),
}

/// Errors emitted by `LearningFlowService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LearningFlowError {
    #[error("word set {0} has no words")]
    EmptyWordSet(String),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while reading client configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid {key} value: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("invalid API base URL: {0}")]
    BaseUrl(#[from] url::ParseError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
