//! AES-128-CBC with PKCS7 padding, the cipher contract of the access channel.
//!
//! The caller supplies the IV explicitly; the session protocol passes the
//! current session token.

use aes::Aes128;
use cbc::{Decryptor, Encryptor};
use cipher::{
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
    block_padding::{NoPadding, Pkcs7},
};
use thiserror::Error;

type Aes128CbcEnc = Encryptor<Aes128>;
type Aes128CbcDec = Decryptor<Aes128>;

pub const KEY_LEN: usize = 16;
pub const IV_LEN: usize = 16;
pub const BLOCK_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CbcError {
    #[error("Invalid key or IV length for CBC mode: {0}")]
    InvalidLength(#[from] cipher::InvalidLength),
    #[error("Ciphertext length {0} is not a non-zero multiple of the block size")]
    InvalidCiphertextLength(usize),
    #[error("Cipher operation failed during padding/unpadding")]
    CipherError,
    #[error("Invalid padding")]
    InvalidPadding,
}

type Result<T> = std::result::Result<T, CbcError>;

pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let enc = Aes128CbcEnc::new_from_slices(key, iv)?;
    Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(CbcError::InvalidCiphertextLength(ciphertext.len()));
    }
    let mut buf = ciphertext.to_vec();
    Aes128CbcDec::new_from_slices(key, iv)?
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| CbcError::CipherError)?;

    let len = unpad(&buf)?.len();
    buf.truncate(len);
    Ok(buf)
}

fn unpad(data: &[u8]) -> Result<&[u8]> {
    let pad_len = *data.last().ok_or(CbcError::InvalidPadding)? as usize;
    if pad_len == 0 || pad_len > BLOCK_LEN || pad_len > data.len() {
        return Err(CbcError::InvalidPadding);
    }
    let (body, padding) = data.split_at(data.len() - pad_len);
    if padding.iter().any(|b| *b as usize != pad_len) {
        return Err(CbcError::InvalidPadding);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8; 16] = b"M1k3y1sdAb3St0n3";
    const IV: &[u8; 16] = b"0123456789abcdef";

    #[test]
    fn test_nist_sp800_38a_cbc_aes128_first_block() {
        let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let iv = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let plaintext = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();

        let ciphertext = encrypt(&key, &iv, &plaintext).unwrap();
        // One data block plus one full block of PKCS7 padding.
        assert_eq!(ciphertext.len(), 32);
        assert_eq!(
            hex::encode(&ciphertext[..16]),
            "7649abac8119b246cee98e9b12e9197d"
        );
        assert_eq!(decrypt(&key, &iv, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_padding_always_added() {
        for len in [0usize, 1, 15, 16, 17, 31, 32] {
            let plaintext = vec![0x5au8; len];
            let ciphertext = encrypt(KEY, IV, &plaintext).unwrap();
            assert_eq!(ciphertext.len(), (len / BLOCK_LEN + 1) * BLOCK_LEN);
            assert_eq!(decrypt(KEY, IV, &ciphertext).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_rejects_bad_lengths() {
        assert!(matches!(
            encrypt(&KEY[..15], IV, b"x"),
            Err(CbcError::InvalidLength(_))
        ));
        assert!(matches!(
            decrypt(KEY, IV, &[0u8; 15]),
            Err(CbcError::InvalidCiphertextLength(15))
        ));
        assert!(matches!(
            decrypt(KEY, IV, &[]),
            Err(CbcError::InvalidCiphertextLength(0))
        ));
    }

    #[test]
    fn test_wrong_iv_changes_first_block_only() {
        let plaintext = b"a thirty-two byte long plaintext";
        let ciphertext = encrypt(KEY, IV, plaintext).unwrap();
        let other_iv = b"fedcba9876543210";
        let decrypted = decrypt(KEY, other_iv, &ciphertext).unwrap();
        assert_ne!(&decrypted[..16], &plaintext[..16]);
        assert_eq!(&decrypted[16..], &plaintext[16..]);
    }
}
