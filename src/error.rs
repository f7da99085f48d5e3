use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TexError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Keyboard controller error: {0}")]
    Enigo(String),

    #[error("Keyboard listener error: {0}")]
    Listener(String),

    #[error("Secret store error: {0}")]
    SecretStore(String),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Daemon already running with PID {0}")]
    DaemonAlreadyRunning(u32),

    #[error("Daemon is not running")]
    DaemonNotRunning,

    #[error("Invalid PID in daemon file")]
    InvalidPid,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TexError>;
