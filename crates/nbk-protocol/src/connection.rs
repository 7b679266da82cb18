use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::wire::Signer;

/// Connection descriptor written by the front-end before launching the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default = "default_transport")]
    pub transport: String,
    pub ip: String,
    #[serde(default)]
    pub signature_scheme: String,
    #[serde(default)]
    pub key: String,
    pub hb_port: u16,
    pub shell_port: u16,
    pub control_port: u16,
    pub iopub_port: u16,
    #[serde(default)]
    pub stdin_port: Option<u16>,
    #[serde(default)]
    pub kernel_name: Option<String>,
}

fn default_transport() -> String {
    "tcp".into()
}

impl ConnectionInfo {
    pub fn from_file(path: &Path) -> Result<Self, ProtocolError> {
        let text = std::fs::read_to_string(path).map_err(|source| ProtocolError::ConnectionFile {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn endpoint(&self, port: u16) -> String {
        format!("{}://{}:{}", self.transport, self.ip, port)
    }

    /// Signer for this connection's key. Only HMAC-SHA256 is supported.
    pub fn signer(&self) -> Result<Signer, ProtocolError> {
        if self.key.is_empty() {
            return Ok(Signer::unsigned());
        }
        match self.signature_scheme.as_str() {
            "hmac-sha256" | "" => Ok(Signer::new(self.key.as_bytes())),
            other => Err(ProtocolError::UnsupportedScheme(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "shell_port": 53794,
        "iopub_port": 53795,
        "stdin_port": 53796,
        "control_port": 53797,
        "hb_port": 53798,
        "ip": "127.0.0.1",
        "key": "a0436f6c-1916-498b-8eb9-e81ab9368e84",
        "transport": "tcp",
        "signature_scheme": "hmac-sha256",
        "kernel_name": "nbk"
    }"#;

    #[test]
    fn parses_descriptor_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let info = ConnectionInfo::from_file(file.path()).unwrap();
        assert_eq!(info.endpoint(info.shell_port), "tcp://127.0.0.1:53794");
        assert_eq!(info.stdin_port, Some(53796));
        assert!(info.signer().unwrap().is_enabled());
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let err = ConnectionInfo::from_file(Path::new("/nonexistent/kernel-1.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/kernel-1.json"));
    }

    #[test]
    fn rejects_unknown_scheme() {
        let mut info: ConnectionInfo = serde_json::from_str(SAMPLE).unwrap();
        info.signature_scheme = "hmac-md5".into();
        assert!(matches!(
            info.signer(),
            Err(ProtocolError::UnsupportedScheme(s)) if s == "hmac-md5"
        ));
    }
}
