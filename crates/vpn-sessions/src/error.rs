use std::time::Duration;
use thiserror::Error;
use vpn_types::CommonError;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Session controller unavailable: {0}")]
    Unavailable(String),

    #[error("Session controller call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Gateway command failed (exit {status}): {stderr}")]
    CommandFailed { status: i32, stderr: String },

    #[error("Unexpected gateway response: {0}")]
    Protocol(String),

    #[error("'{member}' is not a member of group '{group}'")]
    NotAMember { group: String, member: String },

    #[error("Invalid input: {0}")]
    Validation(#[from] CommonError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    /// Whether repeating the same call may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            ControllerError::NotAMember { .. } | ControllerError::Validation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
