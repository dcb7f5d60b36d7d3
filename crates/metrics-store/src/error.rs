use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("sample rejected: missing {0}")]
    IncompleteSample(&'static str),

    #[error("stored row is malformed: {0}")]
    MalformedRow(String),
}
