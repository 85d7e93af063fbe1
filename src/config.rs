use gatecore::protocol::access::AccessError;
use gatecore::protocol::message::FRAME_SEPARATOR;
use gatecore::protocol::{ProtocolConfig, ProtocolError, SharedSecret};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid key: {0}")]
    Secret(#[from] AccessError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn default_tick_interval_ms() -> u64 {
    50
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

/// Runtime settings for one reader device.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket URL of the pub/sub bridge.
    pub broker_url: String,
    pub device_id: String,
    /// Pre-shared secret, 16 to 64 bytes.
    pub key: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Connection attempts before giving up. Zero retries forever.
    #[serde(default)]
    pub reconnect_attempts: u32,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("broker_url", &self.broker_url)
            .field("device_id", &self.device_id)
            .field("key", &"<redacted>")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("protocol", &self.protocol)
            .field("tick_interval_ms", &self.tick_interval_ms)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .finish()
    }
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker_url.is_empty() {
            return Err(ConfigError::Invalid("broker_url must be set".into()));
        }
        if self.device_id.is_empty() || self.device_id.contains(FRAME_SEPARATOR) {
            return Err(ProtocolError::InvalidDeviceId(self.device_id.clone()).into());
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be non-zero".into(),
            ));
        }
        self.secret()?;
        self.protocol.validate()?;
        Ok(())
    }

    pub fn secret(&self) -> Result<SharedSecret> {
        Ok(SharedSecret::new(self.key.as_bytes())?)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"{
        "broker_url": "ws://localhost:9001",
        "device_id": "reader-01",
        "key": "M1k3y1sdAb3St0n3"
    }"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = ClientConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(config.reconnect_attempts, 0);
        assert_eq!(config.protocol, ProtocolConfig::default());
        assert!(config.username.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "broker_url": "wss://broker.example:8443/bridge",
                "device_id": "gate-east",
                "key": "0123456789abcdef0123456789abcdef",
                "username": "gate",
                "password": "hunter2",
                "tick_interval_ms": 10,
                "reconnect_attempts": 5,
                "protocol": {{ "read_cooldown": 10 }}
            }}"#
        )
        .unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.device_id, "gate-east");
        assert_eq!(config.username.as_deref(), Some("gate"));
        assert_eq!(config.reconnect_attempts, 5);
        assert_eq!(config.protocol.read_cooldown, 10);
        assert_eq!(config.protocol.ack_soft_timeout, 100);
        assert_eq!(config.secret().unwrap().mac_key().len(), 32);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_rejects_short_key() {
        let json = MINIMAL.replace("M1k3y1sdAb3St0n3", "short");
        assert!(matches!(
            ClientConfig::from_json(&json),
            Err(ConfigError::Secret(AccessError::SecretTooShort(5)))
        ));
    }

    #[test]
    fn test_rejects_separator_in_device_id() {
        let json = MINIMAL.replace("reader-01", "reader###01");
        assert!(matches!(
            ClientConfig::from_json(&json),
            Err(ConfigError::Protocol(ProtocolError::InvalidDeviceId(_)))
        ));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let mut config = ClientConfig::from_json(MINIMAL).unwrap();
        config.password = Some("hunter2".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("M1k3y1sdAb3St0n3"));
        assert!(!debug.contains("hunter2"));
    }
}
