use thiserror::Error;
use vpn_types::CommonError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Resource not found: {resource} with id {id}")]
    NotFound {
        resource: String,
        id: String,
    },

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Operation not allowed: running in read-only mode")]
    ReadOnlyMode,

    #[error("Validation failed for {field}: {message}")]
    ValidationError {
        field: String,
        message: String,
    },

    #[error("Invalid stored record: {0}")]
    CorruptRecord(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn not_found(resource: &str, id: impl ToString) -> Self {
        StoreError::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    pub fn validation(field: &str, err: CommonError) -> Self {
        StoreError::ValidationError {
            field: field.to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
