use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("missing <IDS|MSG> delimiter")]
    MissingDelimiter,
    #[error("missing {0} frame")]
    MissingFrame(&'static str),
    #[error("signature mismatch")]
    BadSignature,
    #[error("frame is not valid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid {msg_type} content: {source}")]
    Content {
        msg_type: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported signature scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("connection file {path}: {source}")]
    ConnectionFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
