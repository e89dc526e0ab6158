use sea_orm::DbErr;

use super::ranked::RankedIndexError;

#[derive(Debug, thiserror::Error)]
pub enum LeaderboardError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("ranked index error: {0}")]
    Index(#[from] RankedIndexError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl LeaderboardError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }
}
