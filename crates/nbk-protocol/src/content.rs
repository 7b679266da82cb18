//! Tagged request and reply payloads, one variant per message type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub code: String,
    /// Offset in unicode scalar values.
    pub cursor_pos: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectRequest {
    pub code: String,
    pub cursor_pos: usize,
    #[serde(default)]
    pub detail_level: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryRequest {
    #[serde(default)]
    pub hist_access_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub restart: bool,
}

/// Request content validated against the declared `msg_type`.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestContent {
    KernelInfo,
    Execute(ExecuteRequest),
    Complete(CompleteRequest),
    Inspect(InspectRequest),
    History(HistoryRequest),
    Shutdown(ShutdownRequest),
    /// Any type this kernel does not serve. Kept raw so the router can log it.
    Other(Value),
}

impl RequestContent {
    pub fn decode(msg_type: &str, content: Value) -> Result<Self, ProtocolError> {
        Ok(match msg_type {
            "kernel_info_request" => Self::KernelInfo,
            "execute_request" => Self::Execute(parse(msg_type, content)?),
            "complete_request" => Self::Complete(parse(msg_type, content)?),
            "inspect_request" => Self::Inspect(parse(msg_type, content)?),
            "history_request" => Self::History(parse(msg_type, content)?),
            "shutdown_request" => Self::Shutdown(parse(msg_type, content)?),
            _ => Self::Other(content),
        })
    }
}

fn parse<T: DeserializeOwned>(msg_type: &str, content: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(content).map_err(|source| ProtocolError::Content {
        msg_type: msg_type.to_string(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Structured error shared by `execute_reply`, `error` and failed replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContent {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

impl ErrorContent {
    /// Error with an empty value and the text split into traceback lines.
    pub fn new(ename: impl Into<String>, text: &str) -> Self {
        Self {
            ename: ename.into(),
            evalue: String::new(),
            traceback: text.split('\n').map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub file_extension: String,
    #[serde(default)]
    pub mimetype: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelInfoReply {
    pub status: String,
    pub protocol_version: String,
    pub implementation: String,
    pub implementation_version: String,
    pub language_info: LanguageInfo,
    pub banner: String,
    pub help_links: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecuteReply {
    Ok {
        execution_count: i64,
        payload: Vec<Value>,
        user_expressions: Map<String, Value>,
    },
    Error {
        execution_count: i64,
        #[serde(flatten)]
        error: ErrorContent,
    },
}

impl ExecuteReply {
    pub fn ok(execution_count: i64) -> Self {
        Self::Ok {
            execution_count,
            payload: Vec::new(),
            user_expressions: Map::new(),
        }
    }

    pub fn error(execution_count: i64, error: ErrorContent) -> Self {
        Self::Error {
            execution_count,
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteInput {
    pub code: String,
    pub execution_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub execution_count: i64,
    pub data: Map<String, Value>,
    pub metadata: Map<String, Value>,
}

/// Body of the `error` broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyError {
    pub execution_count: i64,
    #[serde(flatten)]
    pub error: ErrorContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CompleteReply {
    Ok {
        matches: Vec<String>,
        cursor_start: usize,
        cursor_end: usize,
        metadata: Map<String, Value>,
    },
    Error(ErrorContent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum InspectReply {
    Ok {
        found: bool,
        data: Map<String, Value>,
        metadata: Map<String, Value>,
    },
    Error(ErrorContent),
}

impl InspectReply {
    pub fn not_found() -> Self {
        Self::Ok {
            found: false,
            data: Map::new(),
            metadata: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryReply {
    pub status: String,
    pub history: Vec<Value>,
}

impl HistoryReply {
    pub fn empty() -> Self {
        Self {
            status: "ok".into(),
            history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownReply {
    pub status: String,
    pub restart: bool,
}

impl ShutdownReply {
    pub fn ok(restart: bool) -> Self {
        Self {
            status: "ok".into(),
            restart,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Busy,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub execution_state: ExecutionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub name: StreamName,
    pub text: String,
}

/// Every payload the kernel emits, tagged by its wire `msg_type`.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelMessage {
    KernelInfoReply(KernelInfoReply),
    ExecuteReply(ExecuteReply),
    ExecuteInput(ExecuteInput),
    ExecuteResult(ExecuteResult),
    Error(ReplyError),
    CompleteReply(CompleteReply),
    InspectReply(InspectReply),
    HistoryReply(HistoryReply),
    ShutdownReply(ShutdownReply),
    Status(Status),
    Stream(Stream),
}

impl KernelMessage {
    pub fn msg_type(&self) -> &'static str {
        match self {
            Self::KernelInfoReply(_) => "kernel_info_reply",
            Self::ExecuteReply(_) => "execute_reply",
            Self::ExecuteInput(_) => "execute_input",
            Self::ExecuteResult(_) => "execute_result",
            Self::Error(_) => "error",
            Self::CompleteReply(_) => "complete_reply",
            Self::InspectReply(_) => "inspect_reply",
            Self::HistoryReply(_) => "history_reply",
            Self::ShutdownReply(_) => "shutdown_reply",
            Self::Status(_) => "status",
            Self::Stream(_) => "stream",
        }
    }

    pub fn to_content(&self) -> Result<Value, ProtocolError> {
        let value = match self {
            Self::KernelInfoReply(c) => serde_json::to_value(c)?,
            Self::ExecuteReply(c) => serde_json::to_value(c)?,
            Self::ExecuteInput(c) => serde_json::to_value(c)?,
            Self::ExecuteResult(c) => serde_json::to_value(c)?,
            Self::Error(c) => serde_json::to_value(c)?,
            Self::CompleteReply(c) => serde_json::to_value(c)?,
            Self::InspectReply(c) => serde_json::to_value(c)?,
            Self::HistoryReply(c) => serde_json::to_value(c)?,
            Self::ShutdownReply(c) => serde_json::to_value(c)?,
            Self::Status(c) => serde_json::to_value(c)?,
            Self::Stream(c) => serde_json::to_value(c)?,
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_types_decode_as_other() {
        let content = RequestContent::decode("comm_open", json!({ "comm_id": "x" })).unwrap();
        assert_eq!(content, RequestContent::Other(json!({ "comm_id": "x" })));
    }

    #[test]
    fn known_type_with_bad_content_is_rejected() {
        let err = RequestContent::decode("complete_request", json!({ "code": "x" })).unwrap_err();
        assert!(matches!(err, ProtocolError::Content { ref msg_type, .. } if msg_type == "complete_request"));
    }

    #[test]
    fn shutdown_restart_defaults_to_false() {
        let content = RequestContent::decode("shutdown_request", json!({})).unwrap();
        assert_eq!(content, RequestContent::Shutdown(ShutdownRequest { restart: false }));
    }

    #[test]
    fn execute_error_reply_flattens_error() {
        let reply = ExecuteReply::error(3, ErrorContent::new("Compilation Error", "line one\nline two"));
        let value = KernelMessage::ExecuteReply(reply).to_content().unwrap();
        assert_eq!(
            value,
            json!({
                "status": "error",
                "execution_count": 3,
                "ename": "Compilation Error",
                "evalue": "",
                "traceback": ["line one", "line two"],
            })
        );
    }

    #[test]
    fn complete_reply_shape() {
        let reply = CompleteReply::Ok {
            matches: vec!["bar".into(), "baz".into()],
            cursor_start: 4,
            cursor_end: 6,
            metadata: Map::new(),
        };
        let value = KernelMessage::CompleteReply(reply).to_content().unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["matches"], json!(["bar", "baz"]));
        assert_eq!(value["cursor_start"], 4);
        assert_eq!(value["cursor_end"], 6);
    }
}
