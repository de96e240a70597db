use crate::base::counters::Counters;
use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::config::BridgeConfig;
use crate::http::{CookieBox, HttpResponse, Request};
use crate::socket::connection::{Connection, Poolable, ShutdownHandle};
use crate::socket::negotiator::{ProtocolDecision, ProtocolNegotiator};
use crate::socket::node::Node;
use crate::socket::pool::ConnectionPool;
use dashmap::DashMap;
use http::header::COOKIE;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Sessions an owner has open, with the shutdown handle of the connection
/// each one is bound to.
pub type LiveSessions = Arc<DashMap<SessionId, Option<ShutdownHandle>>>;

/// Where a session gets its connection from.
#[derive(Clone)]
pub enum SessionSource {
    Pooled(ConnectionPool),
    Direct { negotiator: Arc<ProtocolNegotiator>, node: Node },
}

/// Owner state every session of one client shares.
#[derive(Clone)]
pub(crate) struct SessionShared {
    pub(crate) counters: Arc<Counters>,
    pub(crate) live: LiveSessions,
    pub(crate) max_content_length: usize,
    pub(crate) bridge: BridgeConfig,
}

/// Completion of one exchange.
///
/// Fulfilled by the task reading the response, not by the session; a
/// response task that disappears fails it with `ConnectionClosed`.
pub struct ResponseFuture<T> {
    rx: oneshot::Receiver<Result<T, NetError>>,
}

impl<T> Future for ResponseFuture<T> {
    type Output = Result<T, NetError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(NetError::ConnectionClosed)))
    }
}

impl<T> fmt::Debug for ResponseFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture").finish_non_exhaustive()
    }
}

/// One request/response exchange bound to one connection.
///
/// The connection is acquired on the first `execute` and given back on
/// `close` (or drop): to the pool when pooled, closed outright when the
/// session connected directly. A session runs exactly one initial
/// exchange; follow-ups on the same session go through `resubmit`.
pub struct TransportSession {
    id: SessionId,
    source: SessionSource,
    connection: Option<Connection>,
    cookies: CookieBox,
    shared: SessionShared,
    state: LoadState,
    executed: bool,
    closed: bool,
}

impl TransportSession {
    pub(crate) fn new(id: SessionId, source: SessionSource, shared: SessionShared) -> Self {
        shared.live.insert(id, None);
        Self {
            id,
            source,
            connection: None,
            cookies: CookieBox::new(),
            shared,
            state: LoadState::Idle,
            executed: false,
            closed: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn cookies(&self) -> &CookieBox {
        &self.cookies
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self.source, SessionSource::Pooled(_))
    }

    /// The bound connection's protocol, once bound.
    pub fn protocol(&self) -> Option<ProtocolDecision> {
        self.connection.as_ref().map(Connection::protocol)
    }

    pub fn node(&self) -> Option<&Node> {
        self.connection.as_ref().map(Poolable::node)
    }

    /// Send `request` and return the future of its aggregated response.
    pub async fn execute(&mut self, request: Request) -> Result<ResponseFuture<HttpResponse>, NetError> {
        self.execute_with(request, Ok).await
    }

    /// Like `execute`, applying `transform` to the response before the
    /// future is fulfilled.
    pub async fn execute_with<T, F>(
        &mut self,
        request: Request,
        transform: F,
    ) -> Result<ResponseFuture<T>, NetError>
    where
        T: Send + 'static,
        F: FnOnce(HttpResponse) -> Result<T, NetError> + Send + 'static,
    {
        if self.executed {
            return Err(NetError::IllegalStateTransition { state: "Executed", event: "execute" });
        }
        self.executed = true;
        self.dispatch(request, transform).await
    }

    /// Send `request` again on this session after a failed exchange.
    ///
    /// A connection that is no longer usable is given back and a fresh one
    /// bound first.
    pub async fn resubmit(&mut self, request: Request) -> Result<ResponseFuture<HttpResponse>, NetError> {
        self.executed = true;
        self.dispatch(request, Ok).await
    }

    async fn dispatch<T, F>(&mut self, request: Request, transform: F) -> Result<ResponseFuture<T>, NetError>
    where
        T: Send + 'static,
        F: FnOnce(HttpResponse) -> Result<T, NetError> + Send + 'static,
    {
        if self.closed {
            return Err(NetError::IllegalStateTransition { state: "Closed", event: "execute" });
        }
        self.bind().await?;
        let conn = self.connection.as_mut().ok_or(NetError::ConnectionClosed)?;

        self.state = LoadState::SendingRequest;
        conn.ready().await?;
        let mut req = request.into_http(conn.protocol(), self.shared.bridge)?;
        if !req.headers().contains_key(COOKIE) {
            if let Some(cookie) = self.cookies.header_value() {
                req.headers_mut().insert(COOKIE, cookie);
            }
        }
        let pending = conn.send_request(req);
        let sent = self.shared.counters.record_request();
        self.state = LoadState::WaitingForResponse;
        tracing::trace!(session = %self.id, conn = %conn.id(), sent, "request dispatched");

        let (tx, rx) = oneshot::channel();
        let session = self.id;
        let cookies = self.cookies.clone();
        let counters = self.shared.counters.clone();
        let max_content_length = self.shared.max_content_length;
        tokio::spawn(async move {
            let result = async {
                let response = pending.await?;
                let response = HttpResponse::from_hyper(response, max_content_length).await?;
                cookies.store_from_headers(response.headers());
                counters.record_response();
                transform(response)
            }
            .await;
            if let Err(e) = &result {
                tracing::debug!(session = %session, error = %e, "exchange failed");
            }
            let _ = tx.send(result);
        });
        Ok(ResponseFuture { rx })
    }

    async fn bind(&mut self) -> Result<(), NetError> {
        if let Some(conn) = self.connection.take() {
            if conn.is_usable() {
                self.connection = Some(conn);
                return Ok(());
            }
            tracing::debug!(session = %self.id, conn = %conn.id(), "rebinding after connection loss");
            self.give_back(conn, true);
        }

        let conn = match &self.source {
            SessionSource::Pooled(pool) => {
                self.state = LoadState::WaitingForAvailableConnection;
                pool.acquire().await?
            }
            SessionSource::Direct { negotiator, node } => {
                self.state = LoadState::Connecting;
                negotiator.connect(node).await?
            }
        };
        self.shared.live.insert(self.id, Some(conn.shutdown_handle()));
        self.connection = Some(conn);
        Ok(())
    }

    fn give_back(&self, conn: Connection, close: bool) {
        match &self.source {
            SessionSource::Pooled(pool) => pool.release(conn, close),
            SessionSource::Direct { .. } => conn.close(),
        }
    }

    /// Give the connection back and leave the owner's live set.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(conn) = self.connection.take() {
            self.give_back(conn, false);
        }
        self.shared.live.remove(&self.id);
        self.state = LoadState::Closed;
        tracing::trace!(session = %self.id, "session closed");
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("connection", &self.connection)
            .field("executed", &self.executed)
            .finish()
    }
}
