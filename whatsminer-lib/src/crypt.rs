//! Credential derivation for privileged commands.
//!
//! The miner authenticates with two chained MD5-crypt (`$1$`) hashes:
//!
//! 1. `key  = md5_crypt(salt, password)`
//! 2. `sign = md5_crypt(newsalt, key ++ time)`
//!
//! Only the hash component of `$1$<salt>$<hash>` is used in both steps. The
//! hash itself sits behind [`SaltedHash`] so callers can swap in another
//! implementation (for example a shell-out to `openssl passwd -1`).

use crate::constants::{MD5_CRYPT_MAGIC, MD5_CRYPT_SALT_MAX};
use crate::error::WMError;
use crate::message::Token;
use std::fmt;

/// A salted one-way hash in MD5-crypt format.
///
/// Implementations return the third `$`-delimited field of
/// `$1$<salt>$<hash>`, i.e. just `<hash>`.
pub trait SaltedHash: Send + Sync {
    fn hash(&self, salt: &str, password: &str) -> Result<String, WMError>;
}

/// MD5-crypt as implemented by `pwhash`, compatible with crypt(3) and
/// `openssl passwd -1`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Md5Crypt;

impl SaltedHash for Md5Crypt {
    fn hash(&self, salt: &str, password: &str) -> Result<String, WMError> {
        let full = md5_crypt(password, salt)?;
        match full.rsplit_once('$') {
            Some((_, hash)) => Ok(hash.to_string()),
            None => Err(WMError::InvalidSalt(salt.to_string())),
        }
    }
}

fn validate_salt(salt: &str) -> Result<(), WMError> {
    if salt.is_empty() || !salt.is_ascii() || salt.contains('$') {
        return Err(WMError::InvalidSalt(salt.to_string()));
    }
    Ok(())
}

/// Full MD5-crypt string, `$1$<salt>$<hash>`. Salts longer than 8
/// characters are cut.
pub fn md5_crypt(password: &str, salt: &str) -> Result<String, WMError> {
    validate_salt(salt)?;
    let salt = &salt[..salt.len().min(MD5_CRYPT_SALT_MAX)];
    pwhash::md5_crypt::hash_with(format!("{MD5_CRYPT_MAGIC}{salt}").as_str(), password)
        .map_err(|_| WMError::InvalidSalt(salt.to_string()))
}

/// `key = hash(salt, password)`
pub fn derive_key(hasher: &dyn SaltedHash, salt: &str, password: &str) -> Result<String, WMError> {
    hasher.hash(salt, password)
}

/// `sign = hash(newsalt, key ++ time)`
pub fn derive_sign(hasher: &dyn SaltedHash, newsalt: &str, key: &str, time: &str) -> Result<String, WMError> {
    hasher.hash(newsalt, &format!("{key}{time}"))
}

/// Key and sign for one privileged command.
///
/// The key encrypts the payload and never leaves the host; the sign travels
/// in the command's `token` field.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub key: String,
    pub sign: String,
}

impl Credentials {
    pub fn derive(hasher: &dyn SaltedHash, token: &Token, password: &str) -> Result<Self, WMError> {
        let key = derive_key(hasher, &token.salt, password)?;
        let sign = derive_sign(hasher, &token.newsalt, &key, &token.time)?;
        Ok(Self { key, sign })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &"<redacted>")
            .field("sign", &"<redacted>")
            .finish()
    }
}
