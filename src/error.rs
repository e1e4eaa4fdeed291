use crate::middleware::error_handling;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self)
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("identity is suspended")]
    Suspended,

    #[error("caller is not the receiver of message {0}")]
    NotMessageReceiver(i64),

    #[error("identity {0} not found")]
    IdentityNotFound(uuid::Uuid),

    #[error("message {0} not found")]
    MessageNotFound(i64),

    #[error("database error: {0}")]
    Database(String),

    #[error("redis error: {0}")]
    Redis(String),

    #[error("internal server error")]
    Internal,
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        AppError::Database(format!("migration: {e}"))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::Redis(e.to_string())
    }
}

impl AppError {
    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::Unauthorized => 401,
            AppError::NotMessageReceiver(_) | AppError::Suspended => 403,
            AppError::IdentityNotFound(_) | AppError::MessageNotFound(_) => 404,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Redis(_)
            | AppError::Internal => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(AppError::Unauthorized.status_code(), 401);
        assert_eq!(AppError::Suspended.status_code(), 403);
        assert_eq!(AppError::NotMessageReceiver(1).status_code(), 403);
        assert_eq!(AppError::MessageNotFound(1).status_code(), 404);
        assert_eq!(AppError::Redis("down".into()).status_code(), 500);
    }
}
