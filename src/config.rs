//! Plain configuration values.
//!
//! Every component takes one of these by value or reference. They are
//! deserializable with serde so an embedding application can load them
//! from JSON, and each exposes `validate()` which the constructors call
//! once before building anything.

use crate::base::neterror::NetError;
use crate::socket::negotiator::ProtocolDecision;
use crate::socket::node::Node;
use crate::socket::tls::encode_alpn;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 100 MiB, the aggregation limit for a single message body.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 100 * 1024 * 1024;

/// How the pool picks the node for the next acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeSelection {
    #[default]
    RoundRobin,
}

/// Where a connection-creation retry goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryTarget {
    /// Advance the round-robin cursor before each retry.
    #[default]
    NextNode,
    /// Retry the node that just failed.
    SameNode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub nodes: Vec<Node>,
    /// Total concurrency permits across all nodes.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Extra connection attempts after the first failure of one acquire.
    #[serde(default)]
    pub retries_per_node: usize,
    #[serde(default)]
    pub selection: NodeSelection,
    #[serde(default)]
    pub retry_target: RetryTarget,
}

fn default_capacity() -> usize {
    1
}

impl PoolConfig {
    pub fn new(nodes: Vec<Node>, capacity: usize) -> Self {
        Self {
            nodes,
            capacity,
            retries_per_node: 0,
            selection: NodeSelection::RoundRobin,
            retry_target: RetryTarget::NextNode,
        }
    }

    pub fn with_retries(mut self, retries_per_node: usize) -> Self {
        self.retries_per_node = retries_per_node;
        self
    }

    pub fn with_retry_target(mut self, retry_target: RetryTarget) -> Self {
        self.retry_target = retry_target;
        self
    }

    pub fn validate(&self) -> Result<(), NetError> {
        if self.nodes.is_empty() {
            return Err(NetError::InvalidConfig("pool requires at least one node".into()));
        }
        if self.capacity < 1 {
            return Err(NetError::InvalidConfig("pool capacity must be at least 1".into()));
        }
        for node in &self.nodes {
            node.validate()?;
        }
        Ok(())
    }
}

/// Demand thresholds for the backpressure bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_low_watermark")]
    pub low_watermark: usize,
    #[serde(default = "default_high_watermark")]
    pub high_watermark: usize,
}

fn default_low_watermark() -> usize {
    4
}

fn default_high_watermark() -> usize {
    16
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { low_watermark: default_low_watermark(), high_watermark: default_high_watermark() }
    }
}

impl BridgeConfig {
    pub fn new(low_watermark: usize, high_watermark: usize) -> Self {
        Self { low_watermark, high_watermark }
    }

    pub fn validate(&self) -> Result<(), NetError> {
        if self.high_watermark <= self.low_watermark {
            return Err(NetError::InvalidConfig(format!(
                "high watermark {} must exceed low watermark {}",
                self.high_watermark, self.low_watermark
            )));
        }
        Ok(())
    }
}

/// Client-side transport configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Pooled mode when present.
    #[serde(default)]
    pub pool: Option<PoolConfig>,
    /// Use ALPN on TLS connections; when false the node's version decides.
    #[serde(default = "default_true")]
    pub enable_negotiation: bool,
    /// Protocol to assume when the server selects no ALPN protocol.
    /// `None` treats an absent selection as a negotiation failure.
    #[serde(default)]
    pub alpn_fallback: Option<ProtocolDecision>,
    /// ALPN offer replacing the one derived from the node version.
    #[serde(default)]
    pub alpn_protocols: Vec<String>,
    #[serde(default = "default_true")]
    pub verify_certificates: bool,
    /// SNI names. Each node sends the name equal to its host; a single
    /// name applies to every node. The node host is used otherwise.
    #[serde(default)]
    pub server_names: Vec<String>,
    #[serde(default, with = "duration_millis")]
    pub connect_timeout: Option<Duration>,
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub debug: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_content_length() -> usize {
    DEFAULT_MAX_CONTENT_LENGTH
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pool: None,
            enable_negotiation: true,
            alpn_fallback: None,
            alpn_protocols: Vec::new(),
            verify_certificates: true,
            server_names: Vec::new(),
            connect_timeout: None,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            bridge: BridgeConfig::default(),
            debug: false,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("pool_nodes", &self.pool.as_ref().map(|p| p.nodes.len()))
            .field("enable_negotiation", &self.enable_negotiation)
            .field("alpn_fallback", &self.alpn_fallback)
            .field("verify_certificates", &self.verify_certificates)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.verify_certificates = false;
        self
    }

    pub fn validate(&self) -> Result<(), NetError> {
        if let Some(pool) = &self.pool {
            pool.validate()?;
        }
        self.bridge.validate()?;
        if !self.alpn_protocols.is_empty() {
            encode_alpn(&self.alpn_protocols)
                .map_err(|_| NetError::InvalidConfig("ALPN ids must be 1 to 255 bytes".into()))?;
        }
        if self.max_content_length == 0 {
            return Err(NetError::InvalidConfig("max_content_length must be positive".into()));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, NetError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| NetError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// PEM material for one domain, given inline or as file paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PemSource {
    Inline(String),
    Path(std::path::PathBuf),
}

impl PemSource {
    pub fn load(&self) -> Result<Vec<u8>, NetError> {
        match self {
            PemSource::Inline(pem) => Ok(pem.as_bytes().to_vec()),
            PemSource::Path(path) => std::fs::read(path).map_err(|e| {
                NetError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Primary host name, optionally a wildcard like `*.example.com`.
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub certificate_chain: Option<PemSource>,
    #[serde(default)]
    pub private_key: Option<PemSource>,
}

impl DomainConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), aliases: Vec::new(), certificate_chain: None, private_key: None }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_pem(mut self, certificate_chain: PemSource, private_key: PemSource) -> Self {
        self.certificate_chain = Some(certificate_chain);
        self.private_key = Some(private_key);
        self
    }
}

/// Server-side transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address; `version` and `secure` pick the plaintext pipeline and TLS.
    pub address: Node,
    #[serde(default)]
    pub enable_negotiation: Option<bool>,
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub debug: bool,
}

impl ServerConfig {
    pub fn new(address: Node) -> Self {
        Self {
            address,
            enable_negotiation: None,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            bridge: BridgeConfig::default(),
            debug: false,
        }
    }

    /// ALPN is used on secure listeners unless explicitly disabled.
    pub fn negotiation_enabled(&self) -> bool {
        self.address.secure && self.enable_negotiation.unwrap_or(true)
    }

    pub fn validate(&self) -> Result<(), NetError> {
        self.address.validate_bind()?;
        self.bridge.validate()
    }

    pub fn from_json(json: &str) -> Result<Self, NetError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| NetError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
