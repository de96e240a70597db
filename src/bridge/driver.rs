use crate::base::neterror::NetError;
use crate::bridge::state::{Bridge, BridgeState, CloseOnShutdown, ShutdownHook, ShutdownPolicy};
use crate::bridge::{Outbound, Subscription, WriteFuture};
use crate::config::BridgeConfig;
use futures::future::{BoxFuture, OptionFuture};
use futures::stream::FuturesOrdered;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Observable bridge state, published after every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BridgeSnapshot {
    pub state: BridgeState,
    pub outstanding: usize,
    pub in_flight: usize,
}

enum Event<T> {
    Attach(Box<dyn Outbound<T>>, oneshot::Sender<Result<(), NetError>>),
    Subscribe(Box<dyn Subscription>),
    Active,
    Inactive,
    WritabilityChanged,
    Next(T),
    Complete,
    Error(NetError),
    Cancel,
}

/// Cloneable handle to a bridge's executor task.
///
/// Every call is queued to the task, so the state machine only ever runs
/// on that one task no matter which thread the caller is on. The single
/// exception is the subscription race, settled here with a
/// compare-and-set before anything is queued.
pub struct BridgeHandle<T> {
    events: mpsc::UnboundedSender<Event<T>>,
    subscribed: Arc<AtomicBool>,
    snapshot: watch::Receiver<BridgeSnapshot>,
}

impl<T> Clone for BridgeHandle<T> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
            subscribed: Arc::clone(&self.subscribed),
            snapshot: self.snapshot.clone(),
        }
    }
}

impl<T> std::fmt::Debug for BridgeHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHandle").field("snapshot", &self.snapshot()).finish()
    }
}

impl<T> BridgeHandle<T> {
    pub fn snapshot(&self) -> BridgeSnapshot {
        *self.snapshot.borrow()
    }

    /// Wait until the bridge reaches `Cancelled` or `Complete`.
    pub async fn terminated(&self) -> BridgeState {
        let mut snapshot = self.snapshot.clone();
        let result = snapshot.wait_for(|s| s.state.is_terminal()).await.map(|s| s.state);
        // The executor publishes its last state before it exits.
        result.unwrap_or_else(|_| self.snapshot().state)
    }
}

impl<T: Send + 'static> BridgeHandle<T> {
    /// Start a bridge with the default shutdown policy.
    pub fn spawn(config: BridgeConfig) -> Self {
        Self::spawn_with(config, ShutdownPolicy::default(), Box::new(CloseOnShutdown))
    }

    pub fn spawn_with(
        config: BridgeConfig,
        policy: ShutdownPolicy,
        hook: Box<dyn ShutdownHook>,
    ) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(BridgeSnapshot::default());
        let bridge = Bridge::with_policy(config, policy, hook);
        tokio::spawn(run(bridge, rx, snapshot_tx));
        Self { events, subscribed: Arc::new(AtomicBool::new(false)), snapshot }
    }

    /// Attach the write path. Attaching twice is an illegal transition;
    /// attaching after completion closes `outbound`.
    pub async fn attach(&self, outbound: impl Outbound<T>) -> Result<(), NetError> {
        let (tx, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(event)) =
            self.events.send(Event::Attach(Box::new(outbound), tx))
        {
            // Executor already finished; settle against the final state.
            let Event::Attach(mut outbound, _) = event else {
                return Err(NetError::ConnectionClosed);
            };
            let state = self.snapshot().state;
            if state == BridgeState::Complete {
                outbound.close();
                return Ok(());
            }
            return Err(NetError::IllegalStateTransition { state: state.as_str(), event: "attach" });
        }
        rx.await.map_err(|_| NetError::ConnectionClosed)?
    }

    /// Offer the producer's subscription. Only the first one is accepted;
    /// any later one is cancelled and rejected.
    pub fn subscribe(&self, mut subscription: impl Subscription) -> Result<(), NetError> {
        if self.subscribed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err()
        {
            subscription.cancel();
            return Err(NetError::SubscriptionAlreadyAttached);
        }
        if let Err(mpsc::error::SendError(event)) =
            self.events.send(Event::Subscribe(Box::new(subscription)))
        {
            if let Event::Subscribe(mut subscription) = event {
                subscription.cancel();
            }
            return Err(NetError::ConnectionClosed);
        }
        Ok(())
    }

    pub fn on_next(&self, item: T) {
        self.send(Event::Next(item));
    }

    pub fn on_complete(&self) {
        self.send(Event::Complete);
    }

    pub fn on_error(&self, error: NetError) {
        self.send(Event::Error(error));
    }

    /// The connection became active.
    pub fn activate(&self) {
        self.send(Event::Active);
    }

    /// The connection went away; cancels the producer.
    pub fn deactivate(&self) {
        self.send(Event::Inactive);
    }

    pub fn writability_changed(&self) {
        self.send(Event::WritabilityChanged);
    }

    pub fn cancel(&self) {
        self.send(Event::Cancel);
    }

    fn send(&self, event: Event<T>) {
        if self.events.send(event).is_err() {
            tracing::trace!("bridge executor gone; event dropped");
        }
    }
}

/// The bridge's executor.
///
/// Runs until every handle is dropped and no write is outstanding.
/// Losing all handles before completion cancels the producer.
async fn run<T: Send + 'static>(
    mut bridge: Bridge<T>,
    mut events: mpsc::UnboundedReceiver<Event<T>>,
    snapshot: watch::Sender<BridgeSnapshot>,
) {
    let mut writes: FuturesOrdered<WriteFuture> = FuturesOrdered::new();
    let mut writability: OptionFuture<BoxFuture<'static, ()>> = None.into();
    let mut watching = false;
    let mut open = true;

    loop {
        if !watching && bridge.is_stalled() {
            writability = bridge.writability_changed().into();
            watching = true;
        }

        tokio::select! {
            event = events.recv(), if open => match event {
                Some(event) => handle(&mut bridge, event, &mut writes),
                None => {
                    open = false;
                    if !bridge.has_deferred_shutdown() {
                        bridge.cancel();
                    }
                }
            },
            Some(result) = writes.next(), if !writes.is_empty() => {
                bridge.on_write_complete(result);
            }
            _ = &mut writability, if watching => {
                watching = false;
                writability = None.into();
                bridge.on_writability_changed();
            }
            else => break,
        }

        snapshot.send_replace(BridgeSnapshot {
            state: bridge.state(),
            outstanding: bridge.outstanding(),
            in_flight: bridge.in_flight(),
        });

        if !open && writes.is_empty() {
            break;
        }
    }
    tracing::trace!(state = %bridge.state(), "bridge executor finished");
}

fn handle<T: 'static>(bridge: &mut Bridge<T>, event: Event<T>, writes: &mut FuturesOrdered<WriteFuture>) {
    match event {
        Event::Attach(outbound, reply) => {
            let result = bridge.on_attach(outbound);
            if let Err(e) = &result {
                tracing::error!(error = %e, "bridge attach rejected");
            }
            let _ = reply.send(result);
        }
        Event::Subscribe(subscription) => bridge.on_subscribe(subscription),
        Event::Active => bridge.on_active(),
        Event::Inactive => bridge.on_inactive(),
        Event::WritabilityChanged => bridge.on_writability_changed(),
        Event::Next(item) => {
            if let Some(write) = bridge.on_next(item) {
                writes.push_back(write);
            }
        }
        Event::Complete => bridge.on_complete(),
        Event::Error(e) => bridge.on_error(e),
        Event::Cancel => bridge.cancel(),
    }
}
