#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid expression: {}", .0.join("; "))]
    InvalidExpression(Vec<String>),

    #[error("custom formula not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("corrupt custom formula row {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
