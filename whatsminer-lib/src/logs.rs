//! `download_logs`: an encrypted header followed by a raw archive.
//!
//! The miner answers the encrypted command with one `{"enc": ...}` JSON
//! object and then, on the same connection and without any delimiter, the
//! log archive as raw bytes until it closes the socket. The header ends
//! where the first complete JSON value ends; everything after it goes to
//! the file verbatim.

use crate::constants::{DEFAULT_LOG_EXTENSION, READ_BUFFER_SIZE};
use crate::error::WMError;
use crate::message::{Command, Response};
use crate::session::{PrivilegedSession, SessionState, open_envelope};
use crate::transport::Connection;
use bytes::BytesMut;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace};

/// Where a downloaded archive goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub dir: PathBuf,
    /// Base name without extension; a timestamped name is used when unset.
    pub name: Option<String>,
    pub extension: String,
}

impl LogFile {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            name: None,
            extension: DEFAULT_LOG_EXTENSION.to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Full destination path for a download from `host`.
    pub fn path_for(&self, host: &str) -> PathBuf {
        let name = match &self.name {
            Some(name) => name.clone(),
            None => default_name(host),
        };
        let extension = self.extension.trim_start_matches('.');
        if extension.is_empty() {
            self.dir.join(name)
        } else {
            self.dir.join(format!("{name}.{extension}"))
        }
    }
}

impl Default for LogFile {
    fn default() -> Self {
        Self::new(".")
    }
}

fn default_name(host: &str) -> String {
    let host: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("whatsminer-{host}-{}", chrono::Local::now().format("%Y%m%d-%H%M%S"))
}

/// Result of a finished log download.
#[derive(Debug, Clone, PartialEq)]
pub struct LogDownload {
    /// The decrypted header message.
    pub header: Response,
    pub path: PathBuf,
    pub bytes_written: u64,
}

/// Split a complete leading JSON value off `buf`.
///
/// Returns the value and the offset where it ends, or `None` if more bytes
/// are needed.
fn split_header(buf: &[u8]) -> Result<Option<(Value, usize)>, WMError> {
    let mut values = serde_json::Deserializer::from_slice(buf).into_iter::<Value>();
    match values.next() {
        Some(Ok(value)) => Ok(Some((value, values.byte_offset()))),
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(WMError::MalformedResponse(format!("invalid log header: {e}"))),
        None => Ok(None),
    }
}

/// Read until the header JSON is complete. Returns it with whatever body
/// bytes arrived in the same reads.
async fn read_header(conn: &mut Connection) -> Result<(Value, BytesMut), WMError> {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        let n = conn.read_some(&mut buf).await?;
        if let Some((header, end)) = split_header(&buf)? {
            let body = buf.split_off(end);
            return Ok((header, body));
        }
        if n == 0 {
            return Err(WMError::MalformedResponse(
                "connection closed before the log header was complete".to_string(),
            ));
        }
    }
}

async fn write_chunk(file: &mut File, path: &Path, chunk: &[u8]) -> Result<(), WMError> {
    file.write_all(chunk).await.map_err(|source| WMError::StreamWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Copy the rest of the connection into `path` until the peer closes.
async fn stream_body(conn: &mut Connection, first: BytesMut, path: &Path) -> Result<u64, WMError> {
    let mut file = File::create(path).await.map_err(|source| WMError::StreamWrite {
        path: path.to_path_buf(),
        source,
    })?;

    let mut buf = first;
    let mut written = 0u64;
    loop {
        if !buf.is_empty() {
            if written == 0 {
                trace!(addr = conn.addr(), head = %hex::encode(&buf[..buf.len().min(8)]), "Archive started");
            }
            write_chunk(&mut file, path, &buf).await?;
            written += buf.len() as u64;
            buf.clear();
        }
        if conn.read_some(&mut buf).await? == 0 {
            break;
        }
    }

    file.flush().await.map_err(|source| WMError::StreamWrite {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(written)
}

impl PrivilegedSession<'_> {
    /// Send `download_logs` and save the archive that follows the header.
    ///
    /// A failed download may leave a partial file at the destination.
    pub async fn download_logs(&mut self, command: Command, file: &LogFile) -> Result<LogDownload, WMError> {
        self.reset();
        let result = self.run_download(command, file).await;
        self.finish(result)
    }

    async fn run_download(&mut self, command: Command, file: &LogFile) -> Result<LogDownload, WMError> {
        let (credentials, command) = self.authenticate(command).await?;
        let mut conn = self.send_encrypted(&command, &credentials).await?;

        let (outer, body) = read_header(&mut conn).await?;
        self.advance(SessionState::Received);
        let header = open_envelope(outer, &credentials.key)?.into_result()?;
        debug!(code = ?header.code, "Log header received");

        let path = file.path_for(self.miner().host());
        self.advance(SessionState::Streaming);
        let bytes_written = stream_body(&mut conn, body, &path).await?;
        info!(addr = conn.addr(), path = %path.display(), bytes_written, "Log archive saved");

        Ok(LogDownload {
            header,
            path,
            bytes_written,
        })
    }
}
