use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::PROTOCOL_VERSION;
use crate::content::{KernelMessage, RequestContent};
use crate::error::ProtocolError;

/// Message header as defined by the Jupyter messaging protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: String,
    #[serde(default)]
    pub username: String,
    pub session: String,
    #[serde(default)]
    pub date: String,
    pub msg_type: String,
    #[serde(default)]
    pub version: String,
}

impl Header {
    /// Fresh header with a new `msg_id` and the current timestamp.
    pub fn new(
        msg_type: impl Into<String>,
        session: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            msg_id: Uuid::new_v4().to_string(),
            username: username.into(),
            session: session.into(),
            date: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            msg_type: msg_type.into(),
            version: PROTOCOL_VERSION.into(),
        }
    }
}

/// Logical message envelope, independent of framing.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    /// Routing identities prepended by router sockets (or the pub topic).
    pub identities: Vec<Bytes>,
    pub header: Header,
    /// `None` is sent as `{}`.
    pub parent_header: Option<Header>,
    pub metadata: Map<String, Value>,
    pub content: Value,
    pub buffers: Vec<Bytes>,
}

impl WireMessage {
    pub fn new(header: Header, content: Value) -> Self {
        Self {
            identities: Vec::new(),
            header,
            parent_header: None,
            metadata: Map::new(),
            content,
            buffers: Vec::new(),
        }
    }
}

/// An inbound request whose content has been validated against its declared type.
#[derive(Debug, Clone)]
pub struct Request {
    pub identities: Vec<Bytes>,
    pub header: Header,
    pub metadata: Map<String, Value>,
    pub content: RequestContent,
}

impl Request {
    pub fn from_wire(msg: WireMessage) -> Result<Self, ProtocolError> {
        let content = RequestContent::decode(&msg.header.msg_type, msg.content)?;
        Ok(Self {
            identities: msg.identities,
            header: msg.header,
            metadata: msg.metadata,
            content,
        })
    }

    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    /// Reply routed back to the requester on the socket the request arrived on.
    pub fn reply(&self, message: KernelMessage) -> Result<WireMessage, ProtocolError> {
        let mut out = self.child(&message)?;
        out.identities = self.identities.clone();
        Ok(out)
    }

    /// Broadcast correlated to this request, topic-prefixed for subscribers.
    pub fn broadcast(&self, message: KernelMessage) -> Result<WireMessage, ProtocolError> {
        let mut out = self.child(&message)?;
        out.identities = vec![Bytes::from(format!("kernel.{}", message.msg_type()))];
        Ok(out)
    }

    fn child(&self, message: &KernelMessage) -> Result<WireMessage, ProtocolError> {
        let header = Header::new(
            message.msg_type(),
            self.header.session.clone(),
            self.header.username.clone(),
        );
        let mut out = WireMessage::new(header, message.to_content()?);
        out.parent_header = Some(self.header.clone());
        Ok(out)
    }
}
