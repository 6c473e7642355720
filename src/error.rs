use thiserror::Error;

use crate::types::ConflictInfo;

#[derive(Debug, Error)]
pub enum Error {
    #[error("path conflicts with lease on {}:{} held by {}", .0.repository, .0.path, .0.owner)]
    PathConflict(ConflictInfo),

    #[error("lease {0} was modified concurrently")]
    VersionConflict(String),

    #[error("lease {0} is committing")]
    Committing(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden")]
    Forbidden,

    #[error("lease expired")]
    Expired,

    #[error("lease store unavailable: {0}")]
    Unavailable(String),

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Stable classification of every failure, independent of the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    NotFound,
    Forbidden,
    Expired,
    Unavailable,
    PublishFailed,
    Unauthorized,
    BadRequest,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::Expired => "expired",
            Self::Unavailable => "unavailable",
            Self::PublishFailed => "publish_failed",
            Self::Unauthorized => "unauthorized",
            Self::BadRequest => "bad_request",
            Self::Internal => "internal",
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Conflict | Self::Unavailable | Self::PublishFailed)
    }
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::PathConflict(_) | Error::VersionConflict(_) | Error::Committing(_) => {
                ErrorKind::Conflict
            }
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Forbidden => ErrorKind::Forbidden,
            Error::Expired => ErrorKind::Expired,
            Error::Unavailable(_) | Error::Database(_) => ErrorKind::Unavailable,
            Error::PublishFailed(_) => ErrorKind::PublishFailed,
            Error::Unauthorized => ErrorKind::Unauthorized,
            Error::BadRequest(_) => ErrorKind::BadRequest,
            Error::Config(_) | Error::Io(_) | Error::Serialization(_) | Error::ConfigParse(_) => {
                ErrorKind::Internal
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
