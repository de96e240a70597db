use crate::base::neterror::NetError;
use crate::config::ClientConfig;
use crate::socket::client::SocketType;
use crate::socket::connection::{Connection, ConnectionId, PipelineSender, ShutdownHandle};
use crate::socket::connectjob::ConnectJob;
use crate::socket::node::{MajorVersion, Node};
use crate::socket::tls::{TlsConfig, ALPN_H2, ALPN_HTTP1};
use futures::future::BoxFuture;
use futures::FutureExt;
use hyper::client::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// The resolved protocol of a connection. Fixed once made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolDecision {
    Http1,
    Http2,
}

impl ProtocolDecision {
    pub fn alpn_id(&self) -> &'static str {
        match self {
            ProtocolDecision::Http1 => ALPN_HTTP1,
            ProtocolDecision::Http2 => ALPN_H2,
        }
    }

    pub fn from_alpn(id: &[u8]) -> Option<Self> {
        match id {
            b"http/1.1" => Some(ProtocolDecision::Http1),
            b"h2" => Some(ProtocolDecision::Http2),
            _ => None,
        }
    }

    pub fn from_version(version: MajorVersion) -> Self {
        match version {
            MajorVersion::Http1 => ProtocolDecision::Http1,
            MajorVersion::Http2 => ProtocolDecision::Http2,
        }
    }

    pub fn http_version(&self) -> http::Version {
        match self {
            ProtocolDecision::Http1 => http::Version::HTTP_11,
            ProtocolDecision::Http2 => http::Version::HTTP_2,
        }
    }
}

impl fmt::Display for ProtocolDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alpn_id())
    }
}

/// Map a handshake's ALPN outcome to a pipeline.
///
/// `h2` and `http/1.1` select their pipelines. Any other identifier is a
/// negotiation failure. An absent selection fails too unless a fallback
/// protocol is configured.
pub fn decide(
    selected: Option<&[u8]>,
    fallback: Option<ProtocolDecision>,
) -> Result<ProtocolDecision, NetError> {
    match selected {
        Some(id) => ProtocolDecision::from_alpn(id).ok_or_else(|| NetError::NegotiationFailed {
            protocol: Some(String::from_utf8_lossy(id).into_owned()),
        }),
        None => fallback.ok_or(NetError::NegotiationFailed { protocol: None }),
    }
}

/// Opens connections and installs their HTTP pipeline.
///
/// Secure nodes with negotiation enabled offer ALPN per the node's
/// version and follow the server's choice. Plaintext nodes, and secure
/// nodes with negotiation disabled, use the node's configured version
/// (HTTP/2 over plaintext is prior knowledge).
pub struct ProtocolNegotiator {
    enable_negotiation: bool,
    alpn_fallback: Option<ProtocolDecision>,
    alpn_protocols: Vec<String>,
    verify_certificates: bool,
    server_names: Vec<String>,
    connect_timeout: Option<Duration>,
    debug: bool,
    next_id: AtomicU64,
}

impl ProtocolNegotiator {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            enable_negotiation: config.enable_negotiation,
            alpn_fallback: config.alpn_fallback,
            alpn_protocols: config.alpn_protocols.clone(),
            verify_certificates: config.verify_certificates,
            server_names: config.server_names.clone(),
            connect_timeout: config.connect_timeout,
            debug: config.debug,
            next_id: AtomicU64::new(1),
        }
    }

    /// TLS settings for `node`, or `None` for plaintext.
    pub fn tls_config(&self, node: &Node) -> Option<TlsConfig> {
        if !node.secure {
            return None;
        }
        let mut tls = TlsConfig::for_version(node.version).with_verification(self.verify_certificates);
        if !self.enable_negotiation {
            tls = tls.without_alpn();
        } else if !self.alpn_protocols.is_empty() {
            tls.alpn_protos = self.alpn_protocols.clone();
        }
        Some(tls)
    }

    /// SNI name for `node`.
    ///
    /// A configured name equal to the node host wins. A single configured
    /// name overrides every node, which is how IP-addressed nodes get a
    /// host name. Otherwise the node host is sent.
    pub fn server_name(&self, node: &Node) -> Option<&str> {
        let matching = self.server_names.iter().find(|name| name.eq_ignore_ascii_case(&node.host));
        match (matching, self.server_names.as_slice()) {
            (Some(name), _) => Some(name.as_str()),
            (None, [only]) => Some(only.as_str()),
            _ => None,
        }
    }

    /// Which protocol an established socket gets.
    pub fn resolve(&self, node: &Node, socket: &SocketType) -> Result<ProtocolDecision, NetError> {
        if socket.is_secure() && self.enable_negotiation {
            decide(socket.selected_alpn(), self.alpn_fallback)
        } else {
            Ok(ProtocolDecision::from_version(node.version))
        }
    }

    /// Open a connection to `node` with its pipeline installed.
    pub async fn connect(&self, node: &Node) -> Result<Connection, NetError> {
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, self.connect_inner(node))
                .await
                .map_err(|_| NetError::ConnectionTimedOut)?,
            None => self.connect_inner(node).await,
        }
    }

    async fn connect_inner(&self, node: &Node) -> Result<Connection, NetError> {
        let tls = self.tls_config(node);
        let mut socket = ConnectJob::connect(node, tls.as_ref(), self.server_name(node)).await?;

        let protocol = match self.resolve(node, &socket) {
            Ok(protocol) => protocol,
            Err(e) => {
                tracing::warn!(node = %node, error = %e, "closing connection after negotiation");
                let _ = socket.shutdown().await;
                return Err(e);
            }
        };

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let connection = self.install(id, node.clone(), protocol, socket).await?;
        tracing::debug!(node = %node, conn = %id, protocol = %protocol, "connection established");
        Ok(connection)
    }

    /// Run the client handshake for `protocol` and spawn the pipeline driver.
    pub async fn install(
        &self,
        id: ConnectionId,
        node: Node,
        protocol: ProtocolDecision,
        socket: SocketType,
    ) -> Result<Connection, NetError> {
        let io = TokioIo::new(socket);
        let shutdown = ShutdownHandle::new();
        let sender = match protocol {
            ProtocolDecision::Http1 => {
                let (sender, conn) = http1::handshake(io).await?;
                spawn_driver(id, conn.boxed(), &shutdown);
                PipelineSender::Http1(sender)
            }
            ProtocolDecision::Http2 => {
                let (sender, conn) = http2::handshake(TokioExecutor::new(), io).await?;
                spawn_driver(id, conn.boxed(), &shutdown);
                PipelineSender::Http2(sender)
            }
        };
        if self.debug {
            tracing::debug!(conn = %id, node = %node, pipeline = %protocol, "installed client pipeline");
        }
        Ok(Connection::new(id, node, protocol, sender, shutdown))
    }
}

impl fmt::Debug for ProtocolNegotiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolNegotiator")
            .field("enable_negotiation", &self.enable_negotiation)
            .field("alpn_fallback", &self.alpn_fallback)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

fn spawn_driver(
    id: ConnectionId,
    conn: BoxFuture<'static, Result<(), hyper::Error>>,
    shutdown: &ShutdownHandle,
) {
    let closed = shutdown.clone();
    let task = tokio::spawn(drive(id, conn, closed));
    shutdown.set_driver(task.abort_handle());
}

async fn drive<F>(id: ConnectionId, conn: F, shutdown: ShutdownHandle)
where
    F: Future<Output = Result<(), hyper::Error>>,
{
    if let Err(e) = conn.await {
        tracing::debug!(conn = %id, error = %e, "connection driver ended with error");
    }
    shutdown.mark_closed();
}

/// Connection factory used by the pool.
pub trait Connect<C>: Send + Sync + 'static {
    fn connect(&self, node: &Node) -> BoxFuture<'static, Result<C, NetError>>;
}

impl Connect<Connection> for std::sync::Arc<ProtocolNegotiator> {
    fn connect(&self, node: &Node) -> BoxFuture<'static, Result<Connection, NetError>> {
        let negotiator = self.clone();
        let node = node.clone();
        async move { ProtocolNegotiator::connect(&negotiator, &node).await }.boxed()
    }
}
