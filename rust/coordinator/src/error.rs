use taskctl_error::{ChromaError, ErrorCodes};
use thiserror::Error;

/// A mismatched field observed while validating a retried `Attach`/`CreateTask`
/// request against the row it collided with.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldConflict {
    pub field: &'static str,
    pub existing: String,
    pub requested: String,
}

impl std::fmt::Display for FieldConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: existing={:?}, requested={:?}",
            self.field, self.existing, self.requested
        )
    }
}

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("attached function not found")]
    AttachedFunctionNotFound,
    #[error("task not found")]
    TaskNotFound,
    #[error("database not found")]
    DatabaseNotFound,
    #[error("function not found")]
    FunctionNotFound,
    #[error("collection not found")]
    CollectionNotFound,
    #[error("{field} conflict: {conflict}")]
    AlreadyExists {
        field: &'static str,
        conflict: FieldConflict,
    },
    #[error("heap rpc failed: {0}")]
    Heap(#[from] crate::heap_client::HeapClientError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("malformed uuid: {0}")]
    Uuid(#[from] uuid::Error),
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Metadata(#[from] taskctl_types::MetadataConversionError),
    #[error("converter invariant violated: {0}")]
    Internal(String),
}

impl ChromaError for CoordinatorError {
    fn code(&self) -> ErrorCodes {
        match self {
            CoordinatorError::InvalidArgument(_) => ErrorCodes::InvalidArgument,
            CoordinatorError::Uuid(_) => ErrorCodes::InvalidArgument,
            CoordinatorError::AttachedFunctionNotFound
            | CoordinatorError::TaskNotFound
            | CoordinatorError::DatabaseNotFound
            | CoordinatorError::FunctionNotFound
            | CoordinatorError::CollectionNotFound => ErrorCodes::NotFound,
            CoordinatorError::AlreadyExists { .. } => ErrorCodes::AlreadyExists,
            CoordinatorError::Heap(err) => err.code(),
            CoordinatorError::Sqlx(_) => ErrorCodes::Internal,
            CoordinatorError::Json(_) => ErrorCodes::Internal,
            CoordinatorError::Metadata(_) => ErrorCodes::Internal,
            CoordinatorError::Internal(_) => ErrorCodes::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_exists_carries_existing_and_requested() {
        let err = CoordinatorError::AlreadyExists {
            field: "operator_name",
            conflict: FieldConflict {
                field: "operator_name",
                existing: "record_counter".to_string(),
                requested: "different_operator".to_string(),
            },
        };
        assert_eq!(err.code(), ErrorCodes::AlreadyExists);
        assert!(err.to_string().contains("record_counter"));
        assert!(err.to_string().contains("different_operator"));
    }
}
