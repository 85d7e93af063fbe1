use serde::{Deserialize, Serialize};

use super::error::{ProtocolError, Result};

/// Tick thresholds driving the session protocol.
///
/// Every value is a count of scheduler ticks, not wall-clock time: the
/// effective duration is `ticks x tick interval`, so changing the tick rate of
/// the runtime scales every timeout with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Ticks to wait for an ack before restarting the handshake.
    pub ack_soft_timeout: u32,
    /// Ticks without any ack, across retries, before a fatal restart.
    pub ack_hard_timeout: u32,
    /// Ticks to wait for a `response` before dropping the transmission.
    pub response_timeout: u32,
    /// Ticks after an exchange during which new readings are ignored.
    pub read_cooldown: u32,
    /// Ticks after an exchange during which a repeat of the last reading is
    /// suppressed.
    pub duplicate_window: u32,
    /// Period of the status log line, in ticks. Zero disables it.
    pub status_log_every: u32,
    /// Restart the handshake after every `response`, so each reading is
    /// encrypted under a fresh session token.
    pub rekey_after_response: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            ack_soft_timeout: 100,
            ack_hard_timeout: 300,
            response_timeout: 1000,
            read_cooldown: 25,
            duplicate_window: 60,
            status_log_every: 50,
            rekey_after_response: false,
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ack_soft_timeout == 0 {
            return Err(ProtocolError::InvalidConfig(
                "ack_soft_timeout must be non-zero".into(),
            ));
        }
        if self.ack_hard_timeout <= self.ack_soft_timeout {
            return Err(ProtocolError::InvalidConfig(format!(
                "ack_hard_timeout ({}) must exceed ack_soft_timeout ({})",
                self.ack_hard_timeout, self.ack_soft_timeout
            )));
        }
        if self.response_timeout == 0 {
            return Err(ProtocolError::InvalidConfig(
                "response_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
