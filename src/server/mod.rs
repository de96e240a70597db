//! HTTP/1.1 and HTTP/2 server with virtual domains.
//!
//! - [`domain`]: a virtual host and its handler
//! - [`dispatch`]: routes each request to the domain its host names
//! - [`handler`]: the handler trait and response helpers
//! - [`registry`]: protocol id → pipeline factory
//!
//! ```rust,ignore
//! use portico::server::{Domain, Server};
//! use portico::server::handler::{text, ServerRequest};
//!
//! let site = Domain::new("localhost").with_handler(|_req: ServerRequest| async {
//!     Ok(text(StatusCode::OK, "hello"))
//! });
//! let mut server = Server::new(ServerConfig::new(Node::http2("127.0.0.1", 0)), site, vec![])?;
//! let addr = server.accept().await?;
//! ```

pub mod dispatch;
pub mod domain;
pub mod handler;
pub mod registry;

pub use crate::bridge::streaming_body;
pub use dispatch::Dispatcher;
pub use domain::Domain;
pub use handler::{Handler, ServerRequest, ServerResponse};
pub use registry::{ProtocolRegistry, ServeFactory};

use crate::base::context::IoResultExt;
use crate::base::counters::Counters;
use crate::base::neterror::NetError;
use crate::config::{DomainConfig, ServerConfig};
use crate::socket::client::SocketType;
use crate::socket::negotiator::ProtocolDecision;
use crate::socket::node::MajorVersion;
use crate::socket::tls::{TlsConfig, ALPN_HTTP1};
use crate::tls::acceptor::VirtualHostAcceptor;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

/// Listens on one address and serves every domain configured for it.
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    acceptor: Option<Arc<VirtualHostAcceptor>>,
    registry: ProtocolRegistry,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
}

/// What each accepted connection needs.
struct Listener {
    acceptor: Option<Arc<VirtualHostAcceptor>>,
    registry: ProtocolRegistry,
    dispatcher: Arc<Dispatcher>,
    negotiation: bool,
    version: MajorVersion,
    debug: bool,
}

impl Server {
    /// Build a server for `default_domain` plus `domains`.
    ///
    /// On a secure address every domain with key material gets its own
    /// TLS context; the default domain must have key material.
    pub fn new(config: ServerConfig, default_domain: Domain, domains: Vec<Domain>) -> Result<Self, NetError> {
        config.validate()?;

        let acceptor = if config.address.secure {
            let alpn = if config.negotiation_enabled() {
                TlsConfig::for_version(config.address.version).alpn_protos
            } else {
                Vec::new()
            };
            let configs: Vec<DomainConfig> = domains.iter().map(|d| d.config().clone()).collect();
            Some(Arc::new(VirtualHostAcceptor::new(default_domain.config(), &configs, &alpn)?))
        } else {
            None
        };

        tracing::debug!(address = %config.address, default = %default_domain, "default domain");
        for domain in &domains {
            tracing::debug!(address = %config.address, domain = %domain, handler = domain.handler().is_some(), "domain mapped");
        }

        let dispatcher = Arc::new(Dispatcher::new(default_domain, domains, config.max_content_length));
        Ok(Self {
            config,
            dispatcher,
            acceptor,
            registry: ProtocolRegistry::with_defaults(),
            local_addr: None,
            accept_task: None,
        })
    }

    /// Replace or add pipelines before `accept`.
    pub fn registry_mut(&mut self) -> &mut ProtocolRegistry {
        &mut self.registry
    }

    /// Bind the listener and start accepting connections.
    pub async fn accept(&mut self) -> Result<SocketAddr, NetError> {
        if self.accept_task.is_some() {
            return Err(NetError::IllegalStateTransition { state: "Accepting", event: "accept" });
        }
        let address = &self.config.address;
        let listener =
            TcpListener::bind((address.host.as_str(), address.port)).await.listen_context(address)?;
        let local_addr = listener.local_addr().listen_context(address)?;

        let shared = Arc::new(Listener {
            acceptor: self.acceptor.clone(),
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
            negotiation: self.config.negotiation_enabled(),
            version: address.version,
            debug: self.config.debug,
        });
        self.accept_task = Some(tokio::spawn(accept_loop(listener, shared)));
        self.local_addr = Some(local_addr);
        tracing::debug!(address = %local_addr, secure = address.secure, "server accepting");
        Ok(local_addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// `scheme://ip:port` of the bound listener.
    pub fn base_url(&self) -> Option<String> {
        self.local_addr.map(|addr| format!("{}://{}", self.config.address.scheme(), addr))
    }

    pub fn is_running(&self) -> bool {
        self.accept_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn counters(&self) -> &Counters {
        self.dispatcher.counters()
    }

    /// Stop accepting and abort every connection task.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            tracing::debug!(address = ?self.local_addr, "server shut down");
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.config.address)
            .field("local_addr", &self.local_addr)
            .field("dispatcher", &self.dispatcher)
            .field("registry", &self.registry)
            .finish()
    }
}

// Connection tasks live in the JoinSet, so aborting this task aborts them.
async fn accept_loop(listener: TcpListener, shared: Arc<Listener>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let shared = shared.clone();
                    connections.spawn(async move {
                        if let Err(e) = serve(stream, peer, shared).await {
                            tracing::debug!(peer = %peer, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve(stream: TcpStream, peer: SocketAddr, shared: Arc<Listener>) -> Result<(), NetError> {
    let _ = stream.set_nodelay(true);
    let mut socket = match &shared.acceptor {
        Some(acceptor) => acceptor.accept(stream).await?,
        None => SocketType::Tcp(stream),
    };

    let protocol = match select_protocol(&shared, &socket) {
        Ok(protocol) => protocol,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "closing connection after negotiation");
            let _ = socket.shutdown().await;
            return Err(e);
        }
    };
    let Some(factory) = shared.registry.get(&protocol).cloned() else {
        tracing::warn!(peer = %peer, protocol = %protocol, "no pipeline registered");
        let _ = socket.shutdown().await;
        return Err(NetError::NegotiationFailed { protocol: Some(protocol) });
    };

    if shared.debug {
        tracing::debug!(peer = %peer, sni = ?socket.server_name(), pipeline = %protocol, "installed server pipeline");
    }
    factory(socket, shared.dispatcher.clone()).await
}

/// Protocol id for an accepted socket. Without a selection over TLS the
/// server falls back to HTTP/1.1.
fn select_protocol(shared: &Listener, socket: &SocketType) -> Result<String, NetError> {
    if !(socket.is_secure() && shared.negotiation) {
        return Ok(ProtocolDecision::from_version(shared.version).alpn_id().to_owned());
    }
    match socket.selected_alpn() {
        Some(id) => {
            let id = String::from_utf8_lossy(id).into_owned();
            if shared.registry.contains(&id) {
                Ok(id)
            } else {
                Err(NetError::NegotiationFailed { protocol: Some(id) })
            }
        }
        None => Ok(ALPN_HTTP1.to_owned()),
    }
}
