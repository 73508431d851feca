//! Common test utilities: an in-process fake miner speaking the btminer API.

// Shared across test files; not every helper is used by every file.
#![allow(dead_code, unused_imports)]

pub use serde_json::{Value, json};
pub use std::time::Duration;
pub use whatsminer_lib::{
    ClientConfig, Command, CommandName, LogFile, Response, SessionState, Status, StatusCode, WMError, Whatsminer,
};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use whatsminer_lib::cipher;

pub const PASSWORD: &str = "admin";
/// md5-crypt hash of [`PASSWORD`] with salt "S1".
pub const GOLDEN_KEY: &str = "OV6Rqax7Kh5VKjfbn00Kc1";
/// md5-crypt hash of `GOLDEN_KEY ++ "T"` with salt "S2".
pub const GOLDEN_SIGN: &str = "eUC4XYrt8witdFVR7NbtZ1";

/// What the fake answers to one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Plain(Value),
    Encrypted(Value),
    /// Encrypted header, then raw chunks written one by one.
    EncryptedWithStream(Value, Vec<Vec<u8>>),
    /// Never answer and keep the socket open.
    Silent,
}

/// A request as the fake understood it, decrypted when it was encrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub body: Value,
    pub encrypted: bool,
}

impl Request {
    pub fn cmd(&self) -> &str {
        self.body.get("cmd").and_then(Value::as_str).unwrap_or_default()
    }
}

/// Route library logs to the test harness; `RUST_LOG=debug` shows session transitions.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type Handler = Arc<dyn Fn(&Request) -> Reply + Send + Sync>;

pub fn ok(msg: impl Into<Value>) -> Value {
    json!({"STATUS": "S", "When": 1700000000, "Code": 131, "Msg": msg.into(), "Description": ""})
}

pub fn error(code: u16, msg: &str) -> Value {
    json!({"STATUS": "E", "When": 1700000000, "Code": code, "Msg": msg, "Description": ""})
}

pub fn token_reply() -> Value {
    json!({
        "STATUS": "S",
        "When": 1700000000,
        "Code": 134,
        "Msg": {"time": "T", "salt": "S1", "newsalt": "S2"},
        "Description": ""
    })
}

pub fn summary_reply() -> Value {
    json!({
        "STATUS": "S",
        "When": 1700000000,
        "Code": 131,
        "Msg": {"SUMMARY": [{"MHS av": 110000000.0, "Elapsed": 3600, "Power": 3300}]},
        "Description": ""
    })
}

/// Behaves like a healthy miner: tokens, summaries, versions, and `ok` for
/// every privileged command.
pub fn standard_reply(request: &Request) -> Reply {
    if request.encrypted {
        return Reply::Encrypted(ok("API command OK"));
    }
    match request.cmd() {
        "get_token" => Reply::Plain(token_reply()),
        "summary" => Reply::Plain(summary_reply()),
        "get_version" => Reply::Plain(ok(json!({"api_ver": "2.0.5", "fw_ver": "20230911.12.Rel"}))),
        _ => Reply::Plain(error(14, "invalid cmd")),
    }
}

pub struct FakeMiner {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Request>>>,
    server: JoinHandle<()>,
}

impl FakeMiner {
    pub async fn start() -> Self {
        Self::with_handler(standard_reply).await
    }

    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        Self::spawn(Arc::new(handler), None).await
    }

    /// Stop listening once `limit` connections have been accepted.
    pub async fn with_connection_limit<F>(limit: usize, handler: F) -> Self
    where
        F: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        Self::spawn(Arc::new(handler), Some(limit)).await
    }

    async fn spawn(handler: Handler, limit: Option<usize>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake miner");
        let addr = listener.local_addr().expect("local addr");
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let server = {
            let connections = connections.clone();
            let requests = requests.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        return;
                    };
                    let count = connections.fetch_add(1, Ordering::SeqCst) + 1;
                    if limit == Some(count) {
                        drop(listener);
                        serve(socket, handler, requests).await;
                        return;
                    }
                    tokio::spawn(serve(socket, handler.clone(), requests.clone()));
                }
            })
        };

        Self {
            addr,
            connections,
            requests,
            server,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn miner(&self) -> Whatsminer {
        Whatsminer::new("127.0.0.1", self.port()).with_password(PASSWORD)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Drop for FakeMiner {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Read one complete JSON value from the client.
async fn read_request(socket: &mut TcpStream) -> Option<Value> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Ok(value) = serde_json::from_slice(&buf) {
            return Some(value);
        }
    }
}

/// Decrypt an `{"enc": 1, "data": ...}` request with the expected key and
/// check its token. `None` means the miner would refuse it.
fn open_request(outer: &Value) -> Option<Value> {
    let data = outer.get("data")?.as_str()?;
    let body: Value = cipher::decrypt_response(data, GOLDEN_KEY).ok()?;
    (body.get("token")?.as_str()? == GOLDEN_SIGN).then_some(body)
}

async fn write_json(socket: &mut TcpStream, value: &Value) {
    let bytes = serde_json::to_vec(value).expect("encode reply");
    let _ = socket.write_all(&bytes).await;
    let _ = socket.flush().await;
}

fn seal(value: &Value) -> Value {
    json!({"enc": cipher::encrypt_command(value, GOLDEN_KEY).expect("encrypt reply")})
}

async fn serve(mut socket: TcpStream, handler: Handler, requests: Arc<Mutex<Vec<Request>>>) {
    let Some(outer) = read_request(&mut socket).await else {
        return;
    };

    let encrypted = outer.get("enc").is_some();
    let body = if encrypted {
        match open_request(&outer) {
            Some(body) => body,
            None => {
                write_json(&mut socket, &error(135, "check token error")).await;
                return;
            }
        }
    } else {
        outer
    };

    let request = Request { body, encrypted };
    requests.lock().expect("requests lock").push(request.clone());

    match handler(&request) {
        Reply::Plain(value) => write_json(&mut socket, &value).await,
        Reply::Encrypted(value) => write_json(&mut socket, &seal(&value)).await,
        Reply::EncryptedWithStream(value, chunks) => {
            write_json(&mut socket, &seal(&value)).await;
            for chunk in chunks {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let _ = socket.write_all(&chunk).await;
                let _ = socket.flush().await;
            }
        }
        Reply::Silent => {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }
}
