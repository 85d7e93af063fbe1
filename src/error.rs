use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),
    #[error("Failed to connect after {attempts} attempts: {last_error}")]
    ConnectFailed { attempts: u32, last_error: String },
    #[error("No ack received within the hard timeout, device restart required")]
    FatalTimeout,
}

pub type Result<T> = std::result::Result<T, ClientError>;
