use crate::commands::CommandName;
use crate::crypt::{Md5Crypt, SaltedHash};
use crate::error::WMError;
use crate::message::{Command, Response, Token};
use crate::session::PrivilegedSession;
use crate::transport::{self, ClientConfig};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Handle to one miner's API.
///
/// Holds only the connection target and settings. Every call opens its own
/// connection(s), so a `Whatsminer` can be shared freely between tasks.
#[derive(Clone)]
pub struct Whatsminer {
    host: String,
    port: u16,
    password: Option<String>,
    config: ClientConfig,
    hasher: Arc<dyn SaltedHash>,
}

impl Whatsminer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
            config: ClientConfig::default(),
            hasher: Arc::new(Md5Crypt),
        }
    }

    /// Password of the miner's admin account, needed for privileged commands.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the MD5-crypt implementation used for key derivation.
    pub fn with_hasher<H: SaltedHash + 'static>(mut self, hasher: H) -> Self {
        self.hasher = Arc::new(hasher);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn hasher(&self) -> &dyn SaltedHash {
        self.hasher.as_ref()
    }

    pub(crate) fn password_for(&self, command: &Command) -> Result<&str, WMError> {
        self.password
            .as_deref()
            .ok_or_else(|| WMError::MissingPassword(command.name().to_string()))
    }

    /// Send a command in plaintext and parse the reply.
    ///
    /// The response is returned as-is; check [`Response::status`] or call
    /// [`Response::into_result`].
    pub async fn send_plain(&self, command: &Command) -> Result<Response, WMError> {
        info!(host = %self.host, port = self.port, cmd = command.name(), "Sending command");
        let request = command.to_bytes()?;
        let reply = transport::exchange(&self.host, self.port, &request, &self.config).await?;
        Response::from_slice(&reply)
    }

    /// Fetch fresh authentication material. Each token authenticates one command.
    pub async fn get_token(&self) -> Result<Token, WMError> {
        let response = self.send_plain(&CommandName::GetToken.into()).await?;
        Token::from_response(response)
    }

    /// Run a command through the token handshake and encryption envelope.
    pub async fn send_privileged(&self, command: Command) -> Result<Response, WMError> {
        self.session().execute(command).await
    }

    /// A fresh privileged session, for callers that want to inspect its state.
    pub fn session(&self) -> PrivilegedSession<'_> {
        PrivilegedSession::new(self)
    }
}

impl fmt::Debug for Whatsminer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Whatsminer")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("config", &self.config)
            .finish()
    }
}
