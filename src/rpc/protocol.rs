//! Wire protocol types
//!
//! Defines the JSON envelope exchanged between clients and endpoints:
//!
//! ```json
//! // Client -> Endpoint
//! {"jsonrpc": "2.0 streaming", "id": 7, "method": "/AnalyzerService/Analyze", "params": {...}}
//!
//! // Endpoint -> Client (streaming)
//! {"jsonrpc": "2.0 streaming", "id": 7, "result": {...}}
//! {"jsonrpc": "2.0 streaming", "id": 7, "success": true}
//! ```
//!
//! A `"2.0"` exchange carries exactly one `result` or one `error`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Version tag of a single-result exchange
pub const VERSION_SINGLE: &str = "2.0";

/// Version tag of a streaming exchange
pub const VERSION_STREAMING: &str = "2.0 streaming";

/// Protocol version carried by every request and response
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// Exactly one result, returned synchronously
    Single,
    /// Zero or more results followed by a completion marker
    Streaming,
    /// Any other tag; rejected by endpoints with `InvalidRequest`
    Unknown(String),
}

impl Version {
    pub fn as_str(&self) -> &str {
        match self {
            Version::Single => VERSION_SINGLE,
            Version::Streaming => VERSION_STREAMING,
            Version::Unknown(tag) => tag,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Version::Unknown(_))
    }
}

impl From<&str> for Version {
    fn from(tag: &str) -> Self {
        match tag {
            VERSION_SINGLE => Version::Single,
            VERSION_STREAMING => Version::Streaming,
            other => Version::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Version::from(tag.as_str()))
    }
}

/// Fixed error code vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Invalid JSON was received
    Parsing,
    /// The JSON sent is not a valid request
    InvalidRequest,
    /// The method does not exist or is not available
    MethodNotFound,
    /// Invalid method parameter(s)
    InvalidParams,
    /// Internal error, including handler faults
    Internal,
    /// Error reported by a handler
    Application,
    /// A code outside the vocabulary, preserved as received
    Other(i64),
}

impl ErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            ErrorCode::Parsing => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::Internal => -32603,
            ErrorCode::Application => 0,
            ErrorCode::Other(code) => *code,
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        match code {
            -32700 => ErrorCode::Parsing,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::Internal,
            0 => ErrorCode::Application,
            other => ErrorCode::Other(other),
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(ErrorCode::from)
    }
}

/// Structured error carried in a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parsing(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Parsing, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MethodNotFound, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Application, message)
    }

    /// Attach additional error data
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A call addressed to `/Service/Method`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "jsonrpc")]
    pub version: Version,

    /// Absent for notifications. An explicit `null` is kept as `Some(Null)`
    /// so that it can be rejected.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,

    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(version: Version, id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            version,
            id: Some(id.into()),
            method: method.into(),
            params: Some(params),
        }
    }
}

/// One frame of an endpoint's answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "jsonrpc")]
    pub version: Version,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// For a streaming response this denotes the immediate end of the stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub success: bool,
}

impl Response {
    pub fn result(result: Value) -> Self {
        Self {
            version: Version::Single,
            id: None,
            result: Some(result),
            error: None,
            success: false,
        }
    }

    pub fn error(error: RpcError) -> Self {
        Self {
            version: Version::Single,
            id: None,
            result: None,
            error: Some(error),
            success: false,
        }
    }

    pub fn success() -> Self {
        Self {
            version: Version::Single,
            id: None,
            result: None,
            error: None,
            success: true,
        }
    }
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Check that an id, when present, is a number or a string
pub fn check_id(id: Option<&Value>) -> Result<(), RpcError> {
    match id {
        None | Some(Value::Number(_)) | Some(Value::String(_)) => Ok(()),
        Some(other) => Err(RpcError::invalid_request(format!("invalid id: {}", other))),
    }
}

/// Split a `/Service/Method` path into its two segments
pub fn parse_method_path(path: &str) -> Option<(&str, &str)> {
    let (service, method) = path.trim_matches('/').split_once('/')?;
    if service.is_empty() || method.is_empty() {
        return None;
    }
    Some((service, method))
}
