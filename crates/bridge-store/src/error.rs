use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("row not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, StoreError>;
