use calcgraph_engine::{EngineError, ErrorKind};
use calcgraph_protocol::{ApiError, ErrorCode};
use calcgraph_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Rejected input; `details` lists every problem found.
    #[error("{message}")]
    Validation { message: String, details: Vec<String> },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>, details: Vec<String>) -> Self {
        ServiceError::Validation { message: message.into(), details }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::Validation { .. } => ErrorCode::ValidationError,
            ServiceError::Engine(e) => match e.kind() {
                ErrorKind::Validation => ErrorCode::ValidationError,
                ErrorKind::NotFound => ErrorCode::NotFound,
                ErrorKind::Conflict => ErrorCode::Conflict,
                ErrorKind::Internal => ErrorCode::Internal,
            },
            ServiceError::Store(e) => match e {
                StoreError::InvalidExpression(_) => ErrorCode::ValidationError,
                StoreError::NotFound(_) => ErrorCode::NotFound,
                StoreError::Conflict(_) => ErrorCode::Conflict,
                StoreError::Sqlite(_) | StoreError::Corrupt { .. } => ErrorCode::Internal,
            },
            ServiceError::NotFound(_) => ErrorCode::NotFound,
            ServiceError::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let code = err.code();
        if code == ErrorCode::Internal {
            log::error!("internal error: {}", err);
        }
        let details = match &err {
            ServiceError::Validation { details, .. } => details.clone(),
            ServiceError::Store(StoreError::InvalidExpression(messages)) => messages.clone(),
            _ => Vec::new(),
        };
        ApiError::new(code, err.to_string()).with_details(details)
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
