use crate::base::neterror::NetError;
use crate::bridge::{BridgeHandle, Subscription};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

enum Demand {
    Request(usize),
    Cancel,
}

/// Subscription backed by a publisher task.
#[derive(Debug)]
pub struct StreamSubscription {
    demand: mpsc::UnboundedSender<Demand>,
    cancelled: bool,
}

impl Subscription for StreamSubscription {
    fn request(&mut self, n: usize) {
        if !self.cancelled && n > 0 {
            let _ = self.demand.send(Demand::Request(n));
        }
    }

    fn cancel(&mut self) {
        if !self.cancelled {
            self.cancelled = true;
            let _ = self.demand.send(Demand::Cancel);
        }
    }
}

/// Pull elements from `stream` into `bridge`, never more than granted.
///
/// The stream is only polled while there is unspent demand. It is dropped
/// on completion, on its first error, or on cancellation.
pub fn publish<T, S>(stream: S, bridge: &BridgeHandle<T>) -> Result<(), NetError>
where
    T: Send + 'static,
    S: Stream<Item = Result<T, NetError>> + Send + 'static,
{
    let (demand, requests) = mpsc::unbounded_channel();
    bridge.subscribe(StreamSubscription { demand, cancelled: false })?;
    tokio::spawn(pump(stream, requests, bridge.clone()));
    Ok(())
}

async fn pump<T, S>(stream: S, mut requests: mpsc::UnboundedReceiver<Demand>, bridge: BridgeHandle<T>)
where
    T: Send + 'static,
    S: Stream<Item = Result<T, NetError>> + Send + 'static,
{
    let mut stream = std::pin::pin!(stream);
    let mut credit = 0usize;
    let mut produced = 0usize;

    loop {
        if credit == 0 {
            match requests.recv().await {
                Some(Demand::Request(n)) => credit += n,
                Some(Demand::Cancel) | None => break,
            }
            continue;
        }

        tokio::select! {
            biased;
            demand = requests.recv() => match demand {
                Some(Demand::Request(n)) => credit += n,
                Some(Demand::Cancel) | None => break,
            },
            item = stream.next() => match item {
                Some(Ok(item)) => {
                    credit -= 1;
                    produced += 1;
                    bridge.on_next(item);
                }
                Some(Err(e)) => {
                    bridge.on_error(e);
                    break;
                }
                None => {
                    bridge.on_complete();
                    break;
                }
            },
        }
    }
    tracing::trace!(produced, "publisher finished");
}
