//! Multipart framing and envelope signing.
//!
//! Frame layout, in order:
//! `identities.. | <IDS|MSG> | signature | header | parent_header | metadata | content | buffers..`
//!
//! The signature is the hex HMAC-SHA256 of the four JSON frames under the
//! connection key. An empty key disables signing and verification.

use std::fmt;

use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;

use crate::error::ProtocolError;
use crate::header::{Header, WireMessage};

pub const DELIMITER: &[u8] = b"<IDS|MSG>";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct Signer {
    mac: Option<HmacSha256>,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Signer {
    pub fn new(key: &[u8]) -> Self {
        if key.is_empty() {
            return Self::unsigned();
        }
        // HMAC accepts keys of any length.
        Self {
            mac: HmacSha256::new_from_slice(key).ok(),
        }
    }

    pub fn unsigned() -> Self {
        Self { mac: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.mac.is_some()
    }

    /// Hex signature over `parts`, or an empty string when signing is disabled.
    pub fn sign(&self, parts: &[&[u8]]) -> String {
        match &self.mac {
            Some(mac) => {
                let mut mac = mac.clone();
                for part in parts {
                    mac.update(part);
                }
                hex::encode(mac.finalize().into_bytes())
            }
            None => String::new(),
        }
    }

    pub fn verify(&self, signature: &[u8], parts: &[&[u8]]) -> bool {
        let Some(mac) = &self.mac else {
            return true;
        };
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let mut mac = mac.clone();
        for part in parts {
            mac.update(part);
        }
        mac.verify_slice(&expected).is_ok()
    }
}

pub fn encode(msg: &WireMessage, signer: &Signer) -> Result<Vec<Bytes>, ProtocolError> {
    let header = serde_json::to_vec(&msg.header)?;
    let parent = match &msg.parent_header {
        Some(parent) => serde_json::to_vec(parent)?,
        None => b"{}".to_vec(),
    };
    let metadata = serde_json::to_vec(&msg.metadata)?;
    let content = serde_json::to_vec(&msg.content)?;
    let signature = signer.sign(&[
        header.as_slice(),
        parent.as_slice(),
        metadata.as_slice(),
        content.as_slice(),
    ]);

    let mut frames = Vec::with_capacity(msg.identities.len() + 6 + msg.buffers.len());
    frames.extend(msg.identities.iter().cloned());
    frames.push(Bytes::from_static(DELIMITER));
    frames.push(Bytes::from(signature));
    frames.push(Bytes::from(header));
    frames.push(Bytes::from(parent));
    frames.push(Bytes::from(metadata));
    frames.push(Bytes::from(content));
    frames.extend(msg.buffers.iter().cloned());
    Ok(frames)
}

pub fn decode(frames: Vec<Bytes>, signer: &Signer) -> Result<WireMessage, ProtocolError> {
    let split = frames
        .iter()
        .position(|frame| frame.as_ref() == DELIMITER)
        .ok_or(ProtocolError::MissingDelimiter)?;
    let identities = frames[..split].to_vec();
    let mut rest = frames[split + 1..].iter();

    let signature = rest.next().ok_or(ProtocolError::MissingFrame("signature"))?;
    let header = rest.next().ok_or(ProtocolError::MissingFrame("header"))?;
    let parent = rest
        .next()
        .ok_or(ProtocolError::MissingFrame("parent_header"))?;
    let metadata = rest.next().ok_or(ProtocolError::MissingFrame("metadata"))?;
    let content = rest.next().ok_or(ProtocolError::MissingFrame("content"))?;

    if !signer.verify(signature, &[&header[..], &parent[..], &metadata[..], &content[..]]) {
        return Err(ProtocolError::BadSignature);
    }

    let header: Header = serde_json::from_slice(header)?;
    let parent: Value = serde_json::from_slice(parent)?;
    let parent_header = match parent {
        Value::Object(ref map) if map.is_empty() => None,
        other => Some(serde_json::from_value(other)?),
    };
    let metadata: Map<String, Value> = serde_json::from_slice(metadata)?;
    let content: Value = serde_json::from_slice(content)?;

    Ok(WireMessage {
        identities,
        header,
        parent_header,
        metadata,
        content,
        buffers: rest.cloned().collect(),
    })
}
