use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Coarse error classification exposed to callers of the domain services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    InvalidOperation,
    InvalidInput,
    Internal,
}

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Lecture not found: {0}")]
    LectureNotFound(String),

    #[error("Lecture photo not found: {0}")]
    LecturePhotoNotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Publish error: {0}")]
    PublishError(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

impl DomainError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DomainError::LectureNotFound(_) | DomainError::LecturePhotoNotFound(_) => {
                ErrorCode::NotFound
            }
            DomainError::InvalidOperation(_) => ErrorCode::InvalidOperation,
            DomainError::ValidationError(_) => ErrorCode::InvalidInput,
            DomainError::PublishError(_) | DomainError::RepositoryError(_) => ErrorCode::Internal,
        }
    }
}
