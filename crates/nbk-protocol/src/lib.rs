//! Jupyter messaging protocol model for the notebook kernel.
//!
//! This crate knows nothing about sockets or tooling. It provides:
//! - [`WireMessage`]: the logical `{header, parent_header, metadata, content}` envelope
//! - [`wire`]: multipart framing and HMAC signing of that envelope
//! - [`RequestContent`] / [`KernelMessage`]: tagged payloads per message type
//! - [`ConnectionInfo`]: the connection descriptor handed over by the front-end

pub mod connection;
pub mod content;
pub mod error;
pub mod header;
pub mod wire;

pub use connection::ConnectionInfo;
pub use content::{
    CompleteReply, CompleteRequest, ErrorContent, ExecuteInput, ExecuteReply, ExecuteRequest,
    ExecuteResult, ExecutionState, HistoryReply, HistoryRequest, InspectReply, InspectRequest,
    KernelInfoReply, KernelMessage, LanguageInfo, ReplyError, RequestContent, ShutdownReply,
    ShutdownRequest, Status, Stream, StreamName,
};
pub use error::ProtocolError;
pub use header::{Header, Request, WireMessage};
pub use wire::Signer;

/// Protocol version stamped on every outbound header.
pub const PROTOCOL_VERSION: &str = "5.3";
