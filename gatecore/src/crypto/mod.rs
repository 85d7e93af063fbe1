pub mod cbc;
pub mod hmac;
pub mod sha256;

pub use self::hmac::{HmacSha256, MAC_LEN};
pub use self::sha256::{DIGEST_LEN, Sha256};

use subtle::ConstantTimeEq;

pub fn sha256(data: &[u8]) -> [u8; DIGEST_LEN] {
    sha256::digest(data)
}

pub fn hmac_sha256(key: &[u8], data_parts: &[&[u8]]) -> [u8; MAC_LEN] {
    let mut mac = HmacSha256::new(key);
    for part in data_parts {
        mac.update(part);
    }
    mac.finalize()
}

/// Full-length comparison whose running time does not depend on where the
/// inputs first differ. Inputs of different length never match.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
