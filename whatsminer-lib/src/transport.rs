//! One-shot TCP exchanges with the miner.
//!
//! The btminer API has no framing. The client writes a single JSON message
//! and the miner answers and closes the socket, so a response is complete
//! only at EOF. Every exchange gets its own connection; nothing is pooled.
//!
//! Reads are still bounded: [`ClientConfig::read_timeout`] limits how long a
//! single read may wait, so a peer that never closes surfaces as
//! [`WMError::Timeout`] instead of hanging the caller.

use crate::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, READ_BUFFER_SIZE};
use crate::error::WMError;
use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Timeouts applied to every connection.
///
/// `None` disables the corresponding deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    pub connect_timeout: Option<Duration>,
    /// Longest wait for a single read, not for the whole response.
    pub read_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
        }
    }
}

impl ClientConfig {
    /// Wait forever, as the bare protocol does.
    pub fn without_timeouts() -> Self {
        Self {
            connect_timeout: None,
            read_timeout: None,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Option<Duration>) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Use the same deadline for connecting and reading.
    pub fn with_timeout(self, limit: Duration) -> Self {
        self.with_connect_timeout(Some(limit)).with_read_timeout(Some(limit))
    }
}

async fn with_deadline<T, F>(limit: Option<Duration>, fut: F) -> Result<T, WMError>
where
    F: Future<Output = Result<T, WMError>>,
{
    match limit {
        Some(limit) => timeout(limit, fut).await.map_err(|_| WMError::Timeout(limit))?,
        None => fut.await,
    }
}

/// A single request/response connection to the miner.
///
/// The socket is closed when the value is dropped, on success, on error and
/// when the owning future is cancelled.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    addr: String,
    read_timeout: Option<Duration>,
}

impl Connection {
    pub async fn open(host: &str, port: u16, config: &ClientConfig) -> Result<Self, WMError> {
        let addr = format!("{host}:{port}");
        debug!(%addr, "Connecting to miner");

        let connect = TcpStream::connect((host, port));
        let stream = match config.connect_timeout {
            Some(limit) => match timeout(limit, connect).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no answer within {limit:?}"),
                )),
            },
            None => connect.await,
        }
        .map_err(|source| WMError::Connection {
            addr: addr.clone(),
            source,
        })?;

        trace!(%addr, "Connected");
        Ok(Self {
            stream,
            addr,
            read_timeout: config.read_timeout,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Write one request message.
    pub async fn send(&mut self, request: &[u8]) -> Result<(), WMError> {
        self.stream.write_all(request).await?;
        self.stream.flush().await?;
        trace!(addr = %self.addr, len = request.len(), "Sent request");
        Ok(())
    }

    /// Append whatever the peer sends next to `buf`.
    ///
    /// Returns the number of bytes read; 0 means the peer closed the connection.
    pub async fn read_some(&mut self, buf: &mut BytesMut) -> Result<usize, WMError> {
        let limit = self.read_timeout;
        let stream = &mut self.stream;
        let n = with_deadline(limit, async { Ok(stream.read_buf(buf).await?) }).await?;
        trace!(addr = %self.addr, len = n, "Read chunk");
        Ok(n)
    }

    /// Read until the peer closes and return everything received, in order.
    pub async fn read_to_close(mut self) -> Result<Bytes, WMError> {
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        while self.read_some(&mut buf).await? > 0 {}
        debug!(addr = %self.addr, len = buf.len(), "Peer closed connection");
        Ok(buf.freeze())
    }
}

/// Open a connection, write `request` once and read the reply until EOF.
pub async fn exchange(host: &str, port: u16, request: &[u8], config: &ClientConfig) -> Result<Bytes, WMError> {
    let mut conn = Connection::open(host, port, config).await?;
    conn.send(request).await?;
    conn.read_to_close().await
}
