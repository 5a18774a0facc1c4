//! Error kinds surfaced by the relay

use crate::config::SettingsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] SettingsError),

    #[error("Connection to the download daemon is unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("Cookie lookup failed: {0}")]
    CookieLookupFailed(String),

    #[error("Malformed server frame: {0}")]
    MalformedServerFrame(String),

    #[error("Native download intercept failed: {0}")]
    NativeDownloadInterceptFailed(String),

    #[error("Daemon returned an error: {0}")]
    Daemon(String),

    #[error("Timed out waiting for the daemon")]
    Timeout,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
