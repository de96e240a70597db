use crate::base::neterror::NetError;
use crate::http::TransportBody;
use crate::socket::negotiator::ProtocolDecision;
use crate::socket::node::Node;
use futures::future::BoxFuture;
use futures::FutureExt;
use hyper::body::Incoming;
use hyper::client::conn::{http1, http2};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::task::AbortHandle;

/// Identifies a connection inside the pool's tracking maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Force-close handle for a connection, shareable with its owner.
///
/// Closing marks the connection unusable and aborts the task driving its
/// pipeline, which drops the socket. The driver also marks the handle
/// closed when the peer goes away.
#[derive(Clone, Default)]
pub struct ShutdownHandle {
    inner: Arc<ShutdownInner>,
}

#[derive(Default)]
struct ShutdownInner {
    closed: AtomicBool,
    driver: OnceLock<AbortHandle>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_driver(&self, driver: AbortHandle) {
        if self.inner.driver.set(driver).is_err() {
            tracing::warn!("connection driver registered twice");
        }
        if self.is_closed() {
            self.close();
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn close(&self) {
        self.mark_closed();
        if let Some(driver) = self.inner.driver.get() {
            driver.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHandle").field("closed", &self.is_closed()).finish()
    }
}

/// Request side of an installed pipeline.
pub enum PipelineSender {
    Http1(http1::SendRequest<TransportBody>),
    Http2(http2::SendRequest<TransportBody>),
}

/// What the pool needs from a connection.
///
/// `Connection` is the production implementation; the trait keeps the
/// pool's bookkeeping independent of real sockets.
pub trait Poolable: Send + 'static {
    fn id(&self) -> ConnectionId;
    fn node(&self) -> &Node;
    fn is_usable(&self) -> bool;
    fn shutdown_handle(&self) -> ShutdownHandle;

    fn close(&self) {
        self.shutdown_handle().close();
    }
}

/// A live connection to one node with its finalized pipeline.
pub struct Connection {
    id: ConnectionId,
    node: Node,
    protocol: ProtocolDecision,
    sender: PipelineSender,
    shutdown: ShutdownHandle,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        node: Node,
        protocol: ProtocolDecision,
        sender: PipelineSender,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self { id, node, protocol, sender, shutdown }
    }

    /// The protocol fixed at negotiation time.
    pub fn protocol(&self) -> ProtocolDecision {
        self.protocol
    }

    /// Wait until the pipeline can take another request.
    pub async fn ready(&mut self) -> Result<(), NetError> {
        let result = match &mut self.sender {
            PipelineSender::Http1(sender) => sender.ready().await,
            PipelineSender::Http2(sender) => sender.ready().await,
        };
        result.map_err(|e| {
            self.shutdown.mark_closed();
            NetError::from(e)
        })
    }

    /// Send one request; the returned future does not borrow the connection.
    pub fn send_request(
        &mut self,
        request: http::Request<TransportBody>,
    ) -> BoxFuture<'static, Result<http::Response<Incoming>, NetError>> {
        match &mut self.sender {
            PipelineSender::Http1(sender) => {
                sender.send_request(request).map(|r| r.map_err(NetError::from)).boxed()
            }
            PipelineSender::Http2(sender) => {
                sender.send_request(request).map(|r| r.map_err(NetError::from)).boxed()
            }
        }
    }

    fn sender_closed(&self) -> bool {
        match &self.sender {
            PipelineSender::Http1(sender) => sender.is_closed(),
            PipelineSender::Http2(sender) => sender.is_closed(),
        }
    }
}

impl Poolable for Connection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn node(&self) -> &Node {
        &self.node
    }

    fn is_usable(&self) -> bool {
        !self.shutdown.is_closed() && !self.sender_closed()
    }

    fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("protocol", &self.protocol)
            .field("closed", &self.shutdown.is_closed())
            .finish()
    }
}
