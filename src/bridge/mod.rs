//! Credit-based backpressure between a pull-based body producer and a
//! push-based write path.
//!
//! - [`state`]: the bridge state machine and demand bookkeeping
//! - [`driver`]: the executor task that serializes all bridge events, and
//!   the [`BridgeHandle`] used to talk to it from anywhere
//! - [`publisher`]: adapts a `futures::Stream` into a producer honoring
//!   `request(n)` / `cancel()`
//! - [`body`]: the write path as the HTTP pipeline sees it, a body whose
//!   frames are the bridge's writes

pub mod body;
pub mod driver;
pub mod publisher;
pub mod state;

pub use driver::{BridgeHandle, BridgeSnapshot};
pub use state::{
    BridgeState, ShutdownAction, ShutdownHook, ShutdownPolicy, ShutdownReason, ShutdownTiming,
};

use crate::base::neterror::NetError;
use crate::config::BridgeConfig;
use crate::http::TransportBody;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::Stream;
use http_body_util::BodyExt;

/// Completion of one element write.
pub type WriteFuture = BoxFuture<'static, Result<(), NetError>>;

/// The network write path a bridge pushes elements into.
pub trait Outbound<T>: Send + 'static {
    /// Whether the underlying connection is up.
    fn is_active(&self) -> bool;

    /// Whether another write can be accepted without growing the backlog.
    fn is_writable(&self) -> bool;

    /// Start writing `item`; the returned future resolves when the write
    /// has been taken by the transport.
    fn write(&mut self, item: T) -> WriteFuture;

    /// Resolves at the next writability change.
    fn writability_changed(&self) -> BoxFuture<'static, ()>;

    /// Graceful shutdown after the last write.
    fn close(&mut self);

    /// Shutdown after a failure. Defaults to `close`.
    fn abort(&mut self, _error: NetError) {
        self.close();
    }
}

/// The producer side of a subscription.
pub trait Subscription: Send + 'static {
    /// Grant `n` more elements of demand.
    fn request(&mut self, n: usize);

    /// Stop producing. Calls after the first have no effect.
    fn cancel(&mut self);
}

/// Stream a body through a fresh bridge.
///
/// The stream is pulled only as demand is granted. The body buffers at
/// most `low_watermark` unread frames; with that many waiting the write
/// path reports itself congested, so a slow reader stalls the refill
/// until it catches up.
pub fn streaming_body<S>(stream: S, config: BridgeConfig) -> TransportBody
where
    S: Stream<Item = Result<Bytes, NetError>> + Send + 'static,
{
    let bridge = BridgeHandle::spawn(config);
    let (outbound, body) = body::channel(config.low_watermark, bridge.clone());

    if let Err(e) = publisher::publish(stream, &bridge) {
        tracing::warn!(error = %e, "body stream could not subscribe");
    }
    tokio::spawn(async move {
        if let Err(e) = bridge.attach(outbound).await {
            tracing::error!(error = %e, "failed to attach body bridge");
        }
    });
    body.boxed()
}
