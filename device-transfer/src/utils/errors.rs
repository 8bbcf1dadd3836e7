//! Error types for the transfer engine.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start device command: {0}")]
    Spawn(String),

    #[error("Device command failed: {0}")]
    CommandFailed(String),

    #[error("Device command timed out after {0:?}")]
    Timeout(Duration),

    #[error("A transfer is already running on this engine")]
    AlreadyRunning,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, TransferError>;
