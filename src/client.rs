//! HTTP client over a connection pool or direct connections.
//!
//! # Example
//!
//! ```rust,ignore
//! use portico::client::Client;
//! use portico::config::{ClientConfig, PoolConfig};
//! use portico::http::Request;
//! use portico::socket::node::Node;
//!
//! let pool = PoolConfig::new(vec![Node::http2("api.internal", 8080)], 4);
//! let client = Client::new(ClientConfig::default().with_pool(pool)).await?;
//!
//! let (session, response) = client.execute(Request::get("http://api.internal:8080/v1")?).await?;
//! let response = response.await?;
//! client.close_session(session);
//! ```

use crate::base::counters::Counters;
use crate::base::neterror::NetError;
use crate::config::ClientConfig;
use crate::http::session::{SessionShared, SessionSource};
use crate::http::{HttpResponse, LiveSessions, Request, ResponseFuture, SessionId, TransportSession};
use crate::socket::negotiator::ProtocolNegotiator;
use crate::socket::node::Node;
use crate::socket::pool::ConnectionPool;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// HTTP client owning a negotiator, an optional pool and its live sessions.
///
/// Cloning is cheap; clones share everything.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    negotiator: Arc<ProtocolNegotiator>,
    pool: Option<ConnectionPool>,
    shared: SessionShared,
    next_session: AtomicU64,
}

impl Client {
    /// Create a client. With a pool configured, `capacity` connections are
    /// prepared up front; a failure there is logged and left to the caller
    /// to retry through [`Client::pool`].
    pub async fn new(config: ClientConfig) -> Result<Self, NetError> {
        config.validate()?;
        let negotiator = Arc::new(ProtocolNegotiator::new(&config));

        let pool = match &config.pool {
            Some(pool_config) => {
                let pool = ConnectionPool::new(pool_config, negotiator.clone())?;
                if let Err(e) = pool.prepare(pool_config.capacity).await {
                    tracing::error!(error = %e, "failed to prepare connection pool");
                }
                Some(pool)
            }
            None => None,
        };

        let shared = SessionShared {
            counters: Arc::new(Counters::new()),
            live: Arc::new(DashMap::new()),
            max_content_length: config.max_content_length,
            bridge: config.bridge,
        };
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                negotiator,
                pool,
                shared,
                next_session: AtomicU64::new(1),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> Option<&ConnectionPool> {
        self.inner.pool.as_ref()
    }

    pub fn negotiator(&self) -> &Arc<ProtocolNegotiator> {
        &self.inner.negotiator
    }

    /// Open a session. With `node` the session connects to it directly;
    /// without, it draws from the pool.
    pub fn new_session(&self, node: Option<Node>) -> Result<TransportSession, NetError> {
        let source = match (node, &self.inner.pool) {
            (Some(node), _) => {
                node.validate()?;
                SessionSource::Direct { negotiator: self.inner.negotiator.clone(), node }
            }
            (None, Some(pool)) => SessionSource::Pooled(pool.clone()),
            (None, None) => {
                return Err(NetError::InvalidConfig("no pool configured and no node given".into()))
            }
        };
        let id = SessionId(self.inner.next_session.fetch_add(1, Ordering::Relaxed));
        tracing::trace!(session = %id, pooled = matches!(source, SessionSource::Pooled(_)), "session opened");
        Ok(TransportSession::new(id, source, self.inner.shared.clone()))
    }

    fn session_for(&self, request: &Request) -> Result<TransportSession, NetError> {
        if self.inner.pool.is_some() {
            self.new_session(None)
        } else {
            self.new_session(Some(request.node()?))
        }
    }

    /// Execute `request` on a new session. The session stays open until
    /// the caller closes it.
    pub async fn execute(
        &self,
        request: Request,
    ) -> Result<(TransportSession, ResponseFuture<HttpResponse>), NetError> {
        let mut session = self.session_for(&request)?;
        let response = session.execute(request).await?;
        Ok((session, response))
    }

    /// Execute, wait and close.
    pub async fn send(&self, request: Request) -> Result<HttpResponse, NetError> {
        let (session, response) = self.execute(request).await?;
        let result = response.await;
        session.close();
        result
    }

    /// Continue from `prior` with `request` on a fresh session.
    ///
    /// Cookies of `prior` carry over. Both sessions are closed once the
    /// new exchange completes.
    pub async fn continuation(
        &self,
        prior: TransportSession,
        request: Request,
    ) -> Result<HttpResponse, NetError> {
        let mut next = self.session_for(&request)?;
        next.cookies().copy_from(prior.cookies());
        tracing::debug!(prior = %prior.id(), next = %next.id(), url = %request.url(), "continuing on new session");

        let result = match next.execute(request).await {
            Ok(response) => response.await,
            Err(e) => Err(e),
        };
        prior.close();
        next.close();
        result
    }

    /// Resubmit `request` on `session`, wait, then close it.
    pub async fn retry(
        &self,
        mut session: TransportSession,
        request: Request,
    ) -> Result<HttpResponse, NetError> {
        tracing::debug!(session = %session.id(), url = %request.url(), "retrying exchange");
        let result = match session.resubmit(request).await {
            Ok(response) => response.await,
            Err(e) => Err(e),
        };
        session.close();
        result
    }

    pub fn close_session(&self, session: TransportSession) {
        session.close();
    }

    /// Close every live session's connection, then the pool.
    pub fn close(&self) {
        let live: LiveSessions = self.inner.shared.live.clone();
        for entry in live.iter() {
            if let Some(handle) = entry.value() {
                handle.close();
            }
        }
        live.clear();
        if let Some(pool) = &self.inner.pool {
            pool.close();
        }
        tracing::debug!("client closed");
    }

    pub fn counters(&self) -> &Counters {
        &self.inner.shared.counters
    }

    pub fn live_session_count(&self) -> usize {
        self.inner.shared.live.len()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .field("live_sessions", &self.live_session_count())
            .finish()
    }
}
