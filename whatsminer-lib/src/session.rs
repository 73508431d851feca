//! Privileged command session.
//!
//! A privileged call walks through
//!
//! ```text
//! Start -> TokenRequested -> TokenReceived -> Connected -> Sent -> Received -> Done
//! ```
//!
//! over two connections: one plaintext `get_token` exchange and one
//! encrypted command exchange. Any step can fail, which moves the session to
//! `Failed` and records the state it was in. Log downloads add a `Streaming`
//! state between `Received` and `Done`.
//!
//! Tokens are never reused: every [`PrivilegedSession::execute`] starts over
//! from `Start` with a fresh token.

use crate::cipher;
use crate::crypt::Credentials;
use crate::device::Whatsminer;
use crate::error::WMError;
use crate::message::{Command, EncryptedResponse, Response};
use crate::transport::Connection;
use serde_json::Value;
use std::mem;
use strum_macros::Display;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum SessionState {
    Start,
    TokenRequested,
    TokenReceived,
    Connected,
    Sent,
    Received,
    Streaming,
    Done,
    Failed { from: Box<SessionState> },
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed { .. })
    }

    /// For a failed session, the state the failure happened in.
    pub fn failed_from(&self) -> Option<&SessionState> {
        match self {
            SessionState::Failed { from } => Some(from),
            _ => None,
        }
    }
}

pub struct PrivilegedSession<'a> {
    miner: &'a Whatsminer,
    state: SessionState,
    history: Vec<SessionState>,
}

impl<'a> PrivilegedSession<'a> {
    pub fn new(miner: &'a Whatsminer) -> Self {
        Self {
            miner,
            state: SessionState::Start,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// States visited before the current one, oldest first.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    pub(crate) fn miner(&self) -> &'a Whatsminer {
        self.miner
    }

    pub(crate) fn advance(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "Session transition");
        let previous = mem::replace(&mut self.state, next);
        self.history.push(previous);
    }

    pub(crate) fn reset(&mut self) {
        self.state = SessionState::Start;
        self.history.clear();
    }

    /// Settle the session as `Done` or `Failed` according to `result`.
    pub(crate) fn finish<T>(&mut self, result: Result<T, WMError>) -> Result<T, WMError> {
        match result {
            Ok(value) => {
                self.advance(SessionState::Done);
                Ok(value)
            }
            Err(error) => {
                warn!(state = %self.state, %error, "Privileged command failed");
                let from = Box::new(self.state.clone());
                self.advance(SessionState::Failed { from });
                Err(error)
            }
        }
    }

    /// Authenticate, send `command` encrypted and return the decrypted reply.
    pub async fn execute(&mut self, command: Command) -> Result<Response, WMError> {
        self.reset();
        let result = self.run(command).await;
        self.finish(result)
    }

    async fn run(&mut self, command: Command) -> Result<Response, WMError> {
        let (credentials, command) = self.authenticate(command).await?;
        let conn = self.send_encrypted(&command, &credentials).await?;
        let reply = conn.read_to_close().await?;
        self.advance(SessionState::Received);

        let outer: Value = serde_json::from_slice(&reply).map_err(|e| {
            WMError::MalformedResponse(format!("{e}; raw response: {}", String::from_utf8_lossy(&reply)))
        })?;
        open_envelope(outer, &credentials.key)
    }

    /// Fetch a token, derive key and sign, and sign the command.
    pub(crate) async fn authenticate(&mut self, command: Command) -> Result<(Credentials, Command), WMError> {
        let miner = self.miner;
        let password = miner.password_for(&command)?;

        self.advance(SessionState::TokenRequested);
        let token = miner.get_token().await?;
        self.advance(SessionState::TokenReceived);

        let credentials = Credentials::derive(miner.hasher(), &token, password)?;
        let command = command.signed(credentials.sign.clone());
        Ok((credentials, command))
    }

    /// Open the command connection and write the encrypted envelope.
    pub(crate) async fn send_encrypted(
        &mut self,
        command: &Command,
        credentials: &Credentials,
    ) -> Result<Connection, WMError> {
        let miner = self.miner;
        let mut conn = Connection::open(miner.host(), miner.port(), miner.config()).await?;
        self.advance(SessionState::Connected);

        let envelope = cipher::seal(command, &credentials.key)?;
        let request = serde_json::to_vec(&envelope).map_err(WMError::Encode)?;
        debug!(addr = conn.addr(), cmd = command.name(), len = request.len(), "Sending encrypted command");
        conn.send(&request).await?;
        self.advance(SessionState::Sent);
        Ok(conn)
    }
}

/// Decrypt a `{"enc": ...}` reply.
///
/// The miner answers in plaintext when it cannot even decrypt the request
/// (wrong password, expired token); such replies become protocol errors.
pub(crate) fn open_envelope(outer: Value, key: &str) -> Result<Response, WMError> {
    if outer.get("enc").is_some_and(Value::is_string) {
        let envelope: EncryptedResponse =
            serde_json::from_value(outer).map_err(|e| WMError::MalformedResponse(e.to_string()))?;
        return cipher::decrypt_response(&envelope.enc, key);
    }
    Response::from_value(outer)?.into_result()
}
