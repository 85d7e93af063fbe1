pub mod access;
pub mod config;
pub mod error;
pub mod message;
pub mod session;

pub use access::{SessionToken, SharedSecret};
pub use config::ProtocolConfig;
pub use error::{ProtocolError, Result};
pub use message::{AckBody, ResponseCode, Topic};
pub use session::{Effect, Event, PendingTransmission, SessionProtocol, SessionState};
