//! Async runtime for the access-control reader: configuration, the
//! websocket pub/sub transport, and the client loop around
//! [`gatecore::protocol::SessionProtocol`].

pub mod client;
pub mod config;
pub mod error;
pub mod feedback;
pub mod reader;
pub mod transport;

pub use client::Client;
pub use config::ClientConfig;
pub use error::ClientError;
