use crate::message::StatusCode;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The primary error type for the `whatsminer-lib` library.
#[derive(Error, Debug)]
pub enum WMError {
    #[error("Failed to connect to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Timed out after {0:?} waiting for the miner")]
    Timeout(Duration),

    #[error("Miner returned an error: {description}")]
    Protocol {
        code: Option<StatusCode>,
        description: String,
    },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Token request failed: {0}")]
    Token(String),

    #[error("Decrypt error: {0}")]
    Decrypt(String),

    #[error("Decrypted payload is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to write log stream to {}: {source}", path.display())]
    StreamWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid salt {0:?}: must be non-empty ASCII without '$'")]
    InvalidSalt(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Command `{0}` requires a password")]
    MissingPassword(String),
}

impl WMError {
    /// The device status code, when the error came from the miner itself.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            WMError::Protocol { code, .. } => *code,
            _ => None,
        }
    }
}
