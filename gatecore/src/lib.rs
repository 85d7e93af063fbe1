//! Sans-io core of the access reader: the SHA-256/HMAC engines, the cipher
//! contract, payload codecs and the session protocol state machine.
//!
//! Nothing in this crate performs I/O or reads a clock. The runtime feeds
//! [`protocol::Event`]s in and carries out the returned [`protocol::Effect`]s.

pub mod crypto;
pub mod net;
pub mod protocol;
