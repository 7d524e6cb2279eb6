use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Validation error: {0}")]
    ValidationError(#[from] vpn_types::CommonError),

    #[error("Directory error: {0}")]
    DirectoryError(#[from] vpn_identity::DirectoryError),

    #[error("Storage error: {0}")]
    StoreError(#[from] vpn_users::StoreError),

    #[error("Gateway error: {0}")]
    GatewayError(#[from] vpn_sessions::ControllerError),

    #[error("Sync error: {0}")]
    SyncError(#[from] vpn_sync::SyncError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
