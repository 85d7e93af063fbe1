use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid device id {0:?}: must be non-empty and must not contain \"###\"")]
    InvalidDeviceId(String),
    #[error("Invalid protocol configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
