//! JSON shapes exchanged with the btminer API.
//!
//! Every request is a single JSON object with a `cmd` field; every response
//! carries `STATUS`, `When`, `Code`, `Msg` and `Description`. Privileged
//! exchanges wrap both directions in an [`EncryptedRequest`] /
//! [`EncryptedResponse`] envelope.

use crate::error::WMError;
use num_enum::{FromPrimitive, IntoPrimitive};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Outcome flag of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "S")]
    Success,
    #[serde(rename = "E")]
    Error,
}

/// Status codes reported in the `Code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum StatusCode {
    InvalidCommand = 14,
    InvalidJson = 23,
    PermissionDenied = 45,
    CommandOk = 131,
    CommandError = 132,
    TokenOk = 134,
    TokenCheckError = 135,
    TokenOverMaxTimes = 136,
    Base64DecodeError = 137,

    #[num_enum(catch_all)]
    Other(u16),
}

impl StatusCode {
    pub fn description(&self) -> &'static str {
        match self {
            StatusCode::InvalidCommand => "invalid API command or data",
            StatusCode::InvalidJson => "invalid JSON message",
            StatusCode::PermissionDenied => "permission denied",
            StatusCode::CommandOk => "command OK",
            StatusCode::CommandError => "command error",
            StatusCode::TokenOk => "get token message OK",
            StatusCode::TokenCheckError => "check token error",
            StatusCode::TokenOverMaxTimes => "token over max times",
            StatusCode::Base64DecodeError => "base64 decode error",
            StatusCode::Other(_) => "unknown status code",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value: u16 = (*self).into();
        write!(f, "{} ({})", value, self.description())
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16((*self).into())
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u16::deserialize(deserializer).map(StatusCode::from_primitive)
    }
}

/// A command object, `{"cmd": ..., "token": ..., ...params}`.
///
/// `token` carries the sign of a privileged call and is omitted otherwise.
/// Parameter names must not collide with `cmd` or `token`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Command {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            token: None,
            params: Map::new(),
        }
    }

    /// Build a command whose parameters are the fields of a serializable struct.
    pub fn with_params<P: Serialize>(cmd: impl Into<String>, params: &P) -> Result<Self, WMError> {
        let params = match serde_json::to_value(params).map_err(WMError::Encode)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(WMError::InvalidParameter(format!(
                    "command parameters must be a JSON object, got {other}"
                )));
            }
        };
        Ok(Self {
            cmd: cmd.into(),
            token: None,
            params,
        })
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Attach the sign proving knowledge of the password.
    pub fn signed(mut self, sign: impl Into<String>) -> Self {
        self.token = Some(sign.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.cmd
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WMError> {
        serde_json::to_vec(self).map_err(WMError::Encode)
    }
}

/// Outer request of a privileged exchange: `{"enc": 1, "data": "<base64>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRequest {
    pub enc: u8,
    pub data: String,
}

impl EncryptedRequest {
    pub fn new(data: String) -> Self {
        Self { enc: 1, data }
    }
}

/// Outer response of a privileged exchange: `{"enc": "<base64>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedResponse {
    pub enc: String,
}

/// A parsed response object.
///
/// Keys other than the common five (for example the per-command sections of
/// `summary`) are kept in `extra`. The cgminer-style form, where `STATUS` is
/// a list of status objects, is flattened onto the first entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireResponse")]
pub struct Response {
    #[serde(rename = "STATUS")]
    pub status: Status,
    #[serde(rename = "When", default, skip_serializing_if = "Option::is_none")]
    pub when: Option<i64>,
    #[serde(rename = "Code", default, skip_serializing_if = "Option::is_none")]
    pub code: Option<StatusCode>,
    #[serde(rename = "Msg", default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<Value>,
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct StatusEntry {
    #[serde(rename = "STATUS")]
    status: Status,
    #[serde(rename = "When", default)]
    when: Option<i64>,
    #[serde(rename = "Code", default)]
    code: Option<StatusCode>,
    #[serde(rename = "Msg", default)]
    msg: Option<Value>,
    #[serde(rename = "Description", default)]
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StatusField {
    Flag(Status),
    List(Vec<StatusEntry>),
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(rename = "STATUS")]
    status: StatusField,
    #[serde(rename = "When", default)]
    when: Option<i64>,
    #[serde(rename = "Code", default)]
    code: Option<StatusCode>,
    #[serde(rename = "Msg", default)]
    msg: Option<Value>,
    #[serde(rename = "Description", default)]
    description: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<WireResponse> for Response {
    type Error = String;

    fn try_from(wire: WireResponse) -> Result<Self, Self::Error> {
        let entry = match wire.status {
            StatusField::Flag(status) => StatusEntry {
                status,
                when: None,
                code: None,
                msg: None,
                description: None,
            },
            StatusField::List(entries) => entries
                .into_iter()
                .next()
                .ok_or_else(|| "STATUS list is empty".to_string())?,
        };
        Ok(Self {
            status: entry.status,
            when: wire.when.or(entry.when),
            code: wire.code.or(entry.code),
            msg: wire.msg.or(entry.msg),
            description: wire.description.or(entry.description),
            extra: wire.extra,
        })
    }
}

impl Response {
    /// Parse a plaintext response as read off the wire.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, WMError> {
        serde_json::from_slice(bytes).map_err(|e| {
            WMError::MalformedResponse(format!(
                "{e}; raw response: {}",
                String::from_utf8_lossy(bytes)
            ))
        })
    }

    pub fn from_value(value: Value) -> Result<Self, WMError> {
        serde_json::from_value(value).map_err(|e| WMError::MalformedResponse(e.to_string()))
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Turn a `STATUS: "E"` response into a [`WMError::Protocol`].
    pub fn into_result(self) -> Result<Self, WMError> {
        match self.status {
            Status::Success => Ok(self),
            Status::Error => Err(WMError::Protocol {
                code: self.code,
                description: self.error_text(),
            }),
        }
    }

    /// Deserialize `Msg` into a typed structure.
    pub fn msg_as<T: DeserializeOwned>(&self) -> Result<T, WMError> {
        let msg = self
            .msg
            .clone()
            .ok_or_else(|| WMError::MalformedResponse("response has no Msg field".to_string()))?;
        serde_json::from_value(msg).map_err(|e| WMError::MalformedResponse(format!("unexpected Msg shape: {e}")))
    }

    fn error_text(&self) -> String {
        if let Some(description) = self.description.as_deref().filter(|d| !d.is_empty()) {
            return description.to_string();
        }
        match &self.msg {
            Some(Value::String(msg)) => msg.clone(),
            Some(other) => other.to_string(),
            None => self
                .code
                .map(|code| code.description().to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        }
    }
}

/// A `get_token` reply: one-shot material for authenticating a single command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub time: String,
    pub salt: String,
    pub newsalt: String,
}

impl Token {
    pub fn from_response(response: Response) -> Result<Self, WMError> {
        let response = response
            .into_result()
            .map_err(|e| WMError::Token(e.to_string()))?;
        let token: Token = response
            .msg_as()
            .map_err(|e| WMError::Token(e.to_string()))?;
        if token.salt.is_empty() || token.newsalt.is_empty() {
            return Err(WMError::Token("token is missing salt or newsalt".to_string()));
        }
        Ok(token)
    }
}
