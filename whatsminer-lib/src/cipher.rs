//! Encryption envelope for privileged commands.
//!
//! # Scheme
//!
//! - Cipher key: `SHA-256(key)`, where `key` is the MD5-crypt session key
//! - Cipher: AES-256-ECB, one block at a time, no IV
//! - Padding: the JSON text is zero-filled up to the next 16-byte boundary,
//!   always adding at least one zero byte
//! - Framing: base64 of the ciphertext
//!
//! On the way back the plaintext is cut at its first zero byte. This is not
//! a padding scheme: a payload containing a NUL byte would be truncated
//! there.

use crate::constants::BLOCK_SIZE;
use crate::error::WMError;
use crate::message::EncryptedRequest;
use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

/// AES-256 instance keyed with `SHA-256(key)`.
fn cipher_for(key: &str) -> Aes256 {
    Aes256::new(&Sha256::digest(key.as_bytes()))
}

/// Zero-fill `plaintext` to a multiple of [`BLOCK_SIZE`].
///
/// A block-aligned input still gets a full block of zeros, so the receiver
/// always finds a terminator.
pub fn zero_fill(plaintext: &[u8]) -> Vec<u8> {
    let fill = BLOCK_SIZE - plaintext.len() % BLOCK_SIZE;
    let mut buf = Vec::with_capacity(plaintext.len() + fill);
    buf.extend_from_slice(plaintext);
    buf.resize(plaintext.len() + fill, 0);
    buf
}

/// Zero-fill and encrypt raw bytes.
pub fn encrypt_payload(plaintext: &[u8], key: &str) -> Vec<u8> {
    let cipher = cipher_for(key);
    let mut buf = zero_fill(plaintext);
    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(block.into());
    }
    buf
}

/// Decrypt raw blocks; the zero fill is left in place.
pub fn decrypt_payload(ciphertext: &[u8], key: &str) -> Result<Vec<u8>, WMError> {
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(WMError::Decrypt(format!(
            "ciphertext length {} is not a multiple of {BLOCK_SIZE}",
            ciphertext.len()
        )));
    }

    let cipher = cipher_for(key);
    let mut buf = ciphertext.to_vec();
    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(block.into());
    }
    Ok(buf)
}

/// Everything before the first zero byte.
pub fn truncate_at_zero(plaintext: &[u8]) -> &[u8] {
    let end = plaintext.iter().position(|&b| b == 0).unwrap_or(plaintext.len());
    &plaintext[..end]
}

/// Serialize `command` to JSON, encrypt it and return the base64 ciphertext.
pub fn encrypt_command<T: Serialize + ?Sized>(command: &T, key: &str) -> Result<String, WMError> {
    let json = serde_json::to_vec(command).map_err(WMError::Encode)?;
    Ok(BASE64.encode(encrypt_payload(&json, key)))
}

/// Decode and decrypt a base64 ciphertext and parse the JSON inside.
pub fn decrypt_response<T: DeserializeOwned>(encoded: &str, key: &str) -> Result<T, WMError> {
    let ciphertext = BASE64
        .decode(encoded.trim())
        .map_err(|e| WMError::Decrypt(format!("invalid base64: {e}")))?;
    let plaintext = decrypt_payload(&ciphertext, key)?;
    serde_json::from_slice(truncate_at_zero(&plaintext)).map_err(WMError::Decode)
}

/// Wrap a command into the `{"enc": 1, "data": ...}` request envelope.
pub fn seal<T: Serialize + ?Sized>(command: &T, key: &str) -> Result<EncryptedRequest, WMError> {
    Ok(EncryptedRequest::new(encrypt_command(command, key)?))
}
