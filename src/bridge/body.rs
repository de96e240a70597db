use crate::base::neterror::NetError;
use crate::bridge::{BridgeHandle, Outbound, WriteFuture};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use http_body::{Body, Frame};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, Notify};

enum Message {
    Data(Bytes, oneshot::Sender<()>),
    Error(NetError),
}

struct Shared {
    buffered: AtomicUsize,
    capacity: usize,
    writable: Notify,
}

/// Write side of a body channel.
///
/// A write completes once the HTTP pipeline has pulled the frame; the
/// channel is writable while fewer than `capacity` frames are waiting.
pub struct ChannelOutbound {
    tx: Option<mpsc::UnboundedSender<Message>>,
    shared: Arc<Shared>,
}

/// Read side of a body channel, handed to hyper as a message body.
pub struct ChannelBody {
    rx: mpsc::UnboundedReceiver<Message>,
    shared: Arc<Shared>,
    bridge: Option<BridgeHandle<Bytes>>,
    done: bool,
}

/// Create a body channel. Dropping the body deactivates `bridge`.
pub fn channel(capacity: usize, bridge: BridgeHandle<Bytes>) -> (ChannelOutbound, ChannelBody) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared =
        Arc::new(Shared { buffered: AtomicUsize::new(0), capacity: capacity.max(1), writable: Notify::new() });
    (
        ChannelOutbound { tx: Some(tx), shared: shared.clone() },
        ChannelBody { rx, shared, bridge: Some(bridge), done: false },
    )
}

impl Outbound<Bytes> for ChannelOutbound {
    fn is_active(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn is_writable(&self) -> bool {
        self.is_active() && self.shared.buffered.load(Ordering::Acquire) < self.shared.capacity
    }

    fn write(&mut self, item: Bytes) -> WriteFuture {
        let Some(tx) = self.tx.as_ref() else {
            return async { Err(NetError::WriteFailed) }.boxed();
        };
        let (done_tx, done_rx) = oneshot::channel();
        self.shared.buffered.fetch_add(1, Ordering::AcqRel);
        if tx.send(Message::Data(item, done_tx)).is_err() {
            self.shared.buffered.fetch_sub(1, Ordering::AcqRel);
            return async { Err(NetError::WriteFailed) }.boxed();
        }
        async move { done_rx.await.map_err(|_| NetError::WriteFailed) }.boxed()
    }

    fn writability_changed(&self) -> BoxFuture<'static, ()> {
        let shared = self.shared.clone();
        async move { shared.writable.notified().await }.boxed()
    }

    fn close(&mut self) {
        self.tx = None;
    }

    fn abort(&mut self, error: NetError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Message::Error(error));
        }
    }
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = NetError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Message::Data(bytes, done))) => {
                self.shared.buffered.fetch_sub(1, Ordering::AcqRel);
                self.shared.writable.notify_one();
                let _ = done.send(());
                Poll::Ready(Some(Ok(Frame::data(bytes))))
            }
            Poll::Ready(Some(Message::Error(e))) => {
                self.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }
}

impl Drop for ChannelBody {
    fn drop(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            if !self.done {
                bridge.deactivate();
            }
        }
    }
}
