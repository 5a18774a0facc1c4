//! aria2 JSON-RPC 2.0 wire types
//!
//! Outbound requests are built here; inbound frames are classified into
//! correlated responses and lifecycle notifications.

use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// JSON-RPC version string
pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_ADD_URI: &str = "aria2.addUri";
pub const METHOD_GET_VERSION: &str = "aria2.getVersion";

/// Id reserved for liveness probes; never matched against a waiter
pub const HEARTBEAT_ID: &str = "heartbeat";

/// Request ID (number or string)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, RequestId::String(s) if s == HEARTBEAT_ID)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

/// Outbound request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
}

impl RpcRequest {
    pub fn new(id: RequestId, method: &str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }

    /// Method-only liveness request
    pub fn heartbeat() -> Self {
        Self::new(
            RequestId::String(HEARTBEAT_ID.to_string()),
            METHOD_GET_VERSION,
            Vec::new(),
        )
    }

    pub fn to_json(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Per-download options of `aria2.addUri`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddUriOptions {
    #[serde(rename = "max-connection-per-server")]
    pub max_connection_per_server: String,
    pub header: Vec<String>,
    pub out: String,
    #[serde(rename = "allow-overwrite")]
    pub allow_overwrite: String,
}

impl AddUriOptions {
    pub fn new(connections: u32, header: Vec<String>, out: &str) -> Self {
        Self {
            max_connection_per_server: connections.to_string(),
            header,
            out: out.to_string(),
            allow_overwrite: "true".to_string(),
        }
    }
}

fn token(api_key: &str) -> Value {
    Value::String(format!("token:{}", api_key))
}

/// `aria2.addUri` for a single URL
pub fn add_uri(
    id: RequestId,
    api_key: &str,
    url: &str,
    options: &AddUriOptions,
) -> Result<RpcRequest, RelayError> {
    let params = vec![
        token(api_key),
        Value::Array(vec![Value::String(url.to_string())]),
        serde_json::to_value(options)?,
    ];
    Ok(RpcRequest::new(id, METHOD_ADD_URI, params))
}

/// `aria2.getVersion`, authenticated when a key is configured
pub fn get_version(id: RequestId, api_key: &str) -> RpcRequest {
    let params = if api_key.is_empty() {
        Vec::new()
    } else {
        vec![token(api_key)]
    };
    RpcRequest::new(id, METHOD_GET_VERSION, params)
}

/// Error object of a failed response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    #[serde(default)]
    pub code: Option<i64>,
    pub message: String,
}

/// Correlated response
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub id: RequestId,
    pub outcome: Result<Value, RpcError>,
}

/// Result of `aria2.getVersion`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: String,
    #[serde(default)]
    pub enabled_features: Vec<String>,
}

/// Download lifecycle notifications pushed by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DaemonEventKind {
    Started,
    Paused,
    Stopped,
    Completed,
    Errored,
    BtCompleted,
}

impl DaemonEventKind {
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "aria2.onDownloadStart" => Some(Self::Started),
            "aria2.onDownloadPause" => Some(Self::Paused),
            "aria2.onDownloadStop" => Some(Self::Stopped),
            "aria2.onDownloadComplete" => Some(Self::Completed),
            "aria2.onDownloadError" => Some(Self::Errored),
            "aria2.onBtDownloadComplete" => Some(Self::BtCompleted),
            _ => None,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::Started => "aria2.onDownloadStart",
            Self::Paused => "aria2.onDownloadPause",
            Self::Stopped => "aria2.onDownloadStop",
            Self::Completed => "aria2.onDownloadComplete",
            Self::Errored => "aria2.onDownloadError",
            Self::BtCompleted => "aria2.onBtDownloadComplete",
        }
    }
}

/// A notification frame. `gid` is kept for logging only; nothing
/// correlates it with a dispatched resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonEvent {
    pub kind: DaemonEventKind,
    pub gid: Option<String>,
}

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Response(RpcResponse),
    Event(DaemonEvent),
    /// Notification with a method we do not handle
    Unhandled(String),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Parse one inbound text frame
pub fn parse_frame(text: &str) -> Result<InboundFrame, RelayError> {
    let raw: RawFrame = serde_json::from_str(text)
        .map_err(|e| RelayError::MalformedServerFrame(e.to_string()))?;

    if let Some(method) = raw.method {
        return Ok(match DaemonEventKind::from_method(&method) {
            Some(kind) => InboundFrame::Event(DaemonEvent {
                kind,
                gid: raw.params.as_ref().and_then(first_gid),
            }),
            None => InboundFrame::Unhandled(method),
        });
    }

    let id = raw
        .id
        .ok_or_else(|| RelayError::MalformedServerFrame("frame has neither id nor method".into()))?;

    let outcome = match (raw.error, raw.result) {
        (Some(error), _) => Err(error),
        (None, Some(result)) => Ok(result),
        (None, None) => Ok(Value::Null),
    };

    Ok(InboundFrame::Response(RpcResponse { id, outcome }))
}

fn first_gid(params: &Value) -> Option<String> {
    params
        .get(0)?
        .get("gid")?
        .as_str()
        .map(str::to_string)
}
