use crate::base::neterror::NetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// HTTP major version configured for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MajorVersion {
    #[default]
    Http1 = 1,
    Http2 = 2,
}

impl TryFrom<u8> for MajorVersion {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MajorVersion::Http1),
            2 => Ok(MajorVersion::Http2),
            other => Err(format!("unsupported HTTP major version {other}")),
        }
    }
}

impl From<MajorVersion> for u8 {
    fn from(version: MajorVersion) -> Self {
        version as u8
    }
}

/// A remote endpoint: host, port, major version and security flag.
///
/// Nodes are immutable values; the pool keys its idle set by them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub version: MajorVersion,
    #[serde(default)]
    pub secure: bool,
}

impl Node {
    pub fn new(host: impl Into<String>, port: u16, version: MajorVersion, secure: bool) -> Self {
        Self { host: host.into(), port, version, secure }
    }

    pub fn http1(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, MajorVersion::Http1, false)
    }

    pub fn http2(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, MajorVersion::Http2, false)
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Derive a node from an `http`/`https` URL.
    pub fn from_url(url: &Url, version: MajorVersion) -> Result<Self, NetError> {
        let secure = match url.scheme() {
            "http" => false,
            "https" => true,
            _ => return Err(NetError::InvalidUrl),
        };
        let host = url.host_str().ok_or(NetError::InvalidUrl)?;
        let port = url.port_or_known_default().ok_or(NetError::InvalidUrl)?;
        Ok(Self::new(host.trim_start_matches('[').trim_end_matches(']'), port, version, secure))
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The URL a server bound to this node publishes.
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.authority())
    }

    pub fn validate(&self) -> Result<(), NetError> {
        if self.port == 0 {
            return Err(NetError::InvalidConfig(format!("node {} has no port", self.host)));
        }
        self.validate_bind()
    }

    /// Like `validate`, but port 0 (ephemeral) is allowed.
    pub fn validate_bind(&self) -> Result<(), NetError> {
        if self.host.is_empty() {
            return Err(NetError::InvalidConfig("node host is empty".into()));
        }
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{} (HTTP/{})", self.scheme(), self.authority(), self.version as u8)
    }
}
