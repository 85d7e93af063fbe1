//! Key material and the payload codecs built on the crypto primitives:
//! the handshake authentication code and the encrypted `access` body.

use base64::prelude::*;
use thiserror::Error;

use super::message::SESSION_TOKEN_LEN;
use crate::crypto::cbc::{self, CbcError};
use crate::crypto::{HmacSha256, MAC_LEN};

/// Largest accepted pre-shared secret.
pub const MAX_SECRET_LEN: usize = 64;

/// Smallest accepted pre-shared secret; its prefix is the AES-128 key.
pub const MIN_SECRET_LEN: usize = cbc::KEY_LEN;

pub type SessionToken = [u8; SESSION_TOKEN_LEN];

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Secret too short: need at least {min} bytes, got {0}", min = MIN_SECRET_LEN)]
    SecretTooShort(usize),
    #[error("Secret too long: at most {max} bytes, got {0}", max = MAX_SECRET_LEN)]
    SecretTooLong(usize),
    #[error("Cipher error: {0}")]
    Cipher(#[from] CbcError),
    #[error("Base64 decoding error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Decrypted tag identifier is not valid UTF-8")]
    InvalidUtf8,
}

type Result<T> = std::result::Result<T, AccessError>;

/// The pre-shared secret. The whole secret keys the MAC; its first 16 bytes
/// key the cipher.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(Vec<u8>);

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedSecret(<{} bytes redacted>)", self.0.len())
    }
}

impl SharedSecret {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LEN {
            return Err(AccessError::SecretTooShort(secret.len()));
        }
        if secret.len() > MAX_SECRET_LEN {
            return Err(AccessError::SecretTooLong(secret.len()));
        }
        Ok(Self(secret))
    }

    pub fn mac_key(&self) -> &[u8] {
        &self.0
    }

    pub fn cipher_key(&self) -> &[u8] {
        &self.0[..cbc::KEY_LEN]
    }
}

/// HMAC-SHA256 of the session token under the shared secret.
pub fn authentication_code(secret: &SharedSecret, token: &SessionToken) -> [u8; MAC_LEN] {
    let mut mac = HmacSha256::new(secret.mac_key());
    mac.update(token);
    mac.finalize()
}

/// Peer-side check of a base64 `hmac` body against the issued token.
pub fn verify_authentication_code(secret: &SharedSecret, token: &SessionToken, body: &str) -> bool {
    let Ok(code) = BASE64_STANDARD.decode(body.trim()) else {
        return false;
    };
    let mut mac = HmacSha256::new(secret.mac_key());
    mac.update(token);
    mac.matches(&code)
}

/// Renders raw reader UID bytes as the lowercase hex identifier the peer expects.
pub fn tag_id_from_uid(uid: &[u8]) -> String {
    hex::encode(uid)
}

/// `base64(AES-128-CBC(base64(tag_id), key, iv = token))`
pub fn encode_access_body(
    tag_id: &str,
    secret: &SharedSecret,
    token: &SessionToken,
) -> Result<String> {
    let inner = BASE64_STANDARD.encode(tag_id.as_bytes());
    let ciphertext = cbc::encrypt(secret.cipher_key(), token, inner.as_bytes())?;
    Ok(BASE64_STANDARD.encode(ciphertext))
}

/// Inverse of [`encode_access_body`].
pub fn decode_access_body(body: &str, secret: &SharedSecret, token: &SessionToken) -> Result<String> {
    let ciphertext = BASE64_STANDARD.decode(body.trim())?;
    let inner = cbc::decrypt(secret.cipher_key(), token, &ciphertext)?;
    let tag = BASE64_STANDARD.decode(&inner)?;
    String::from_utf8(tag).map_err(|_| AccessError::InvalidUtf8)
}
