use shared::models::UnknownVariant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// A persisted value no longer maps onto a known enum variant.
    #[error("corrupt record: {0}")]
    Corrupt(#[from] UnknownVariant),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    /// Maps constraint violations onto caller errors; everything else stays a
    /// database error.
    pub(crate) fn from_db_error(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            match db.kind() {
                sqlx::error::ErrorKind::UniqueViolation => {
                    return Self::Validation(db.message().to_string());
                }
                sqlx::error::ErrorKind::ForeignKeyViolation => {
                    return Self::NotFound(db.message().to_string());
                }
                _ => {}
            }
        }
        Self::Database(err)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
