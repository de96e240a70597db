use crate::base::neterror::NetError;
use crate::bridge::{Outbound, Subscription, WriteFuture};
use crate::config::BridgeConfig;
use futures::future::BoxFuture;
use std::fmt;

/// Lifecycle of a bridge.
///
/// Startup is two-phase: the write path (attachment) and the producer
/// (subscription) may arrive in either order. `Cancelled` and `Complete`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeState {
    #[default]
    Uninitialized,
    AwaitingSubscription,
    AwaitingAttachment,
    Inactive,
    Running,
    Cancelled,
    Complete,
}

impl BridgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Uninitialized => "Uninitialized",
            BridgeState::AwaitingSubscription => "AwaitingSubscription",
            BridgeState::AwaitingAttachment => "AwaitingAttachment",
            BridgeState::Inactive => "Inactive",
            BridgeState::Running => "Running",
            BridgeState::Cancelled => "Cancelled",
            BridgeState::Complete => "Complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BridgeState::Cancelled | BridgeState::Complete)
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When the shutdown action runs relative to writes still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTiming {
    /// Wait for every in-flight write's completion first.
    AfterInFlightWrites,
    /// Run at once.
    Immediate,
}

/// Shutdown timing for the two terminal signals of a producer.
///
/// The default waits for in-flight writes on completion, so the last
/// element is flushed before the write path closes, and shuts down at
/// once on error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownPolicy {
    pub on_complete: ShutdownTiming,
    pub on_error: ShutdownTiming,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self { on_complete: ShutdownTiming::AfterInFlightWrites, on_error: ShutdownTiming::Immediate }
    }
}

#[derive(Debug, Clone)]
pub enum ShutdownReason {
    Completed,
    Failed(NetError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownAction {
    /// Close the write path (abort it on failure).
    Close,
    /// Leave the write path open; the bridge still becomes `Complete`.
    Leave,
}

/// Decides what happens to the write path when the producer finishes.
pub trait ShutdownHook: Send + 'static {
    fn on_shutdown(&mut self, reason: &ShutdownReason) -> ShutdownAction;
}

/// Default hook: always close.
#[derive(Debug, Default)]
pub struct CloseOnShutdown;

impl ShutdownHook for CloseOnShutdown {
    fn on_shutdown(&mut self, _reason: &ShutdownReason) -> ShutdownAction {
        ShutdownAction::Close
    }
}

/// The bridge state machine.
///
/// Not thread-safe by itself: the driver task owns it and feeds it events
/// one at a time.
pub struct Bridge<T> {
    low_watermark: usize,
    high_watermark: usize,
    state: BridgeState,
    outbound: Option<Box<dyn Outbound<T>>>,
    subscription: Option<Box<dyn Subscription>>,
    outstanding: usize,
    in_flight: usize,
    deferred: Option<ShutdownReason>,
    policy: ShutdownPolicy,
    hook: Box<dyn ShutdownHook>,
}

impl<T> fmt::Debug for Bridge<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("state", &self.state)
            .field("outstanding", &self.outstanding)
            .field("in_flight", &self.in_flight)
            .field("deferred", &self.deferred)
            .finish()
    }
}

impl<T: 'static> Bridge<T> {
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_policy(config, ShutdownPolicy::default(), Box::new(CloseOnShutdown))
    }

    pub fn with_policy(
        config: BridgeConfig,
        policy: ShutdownPolicy,
        hook: Box<dyn ShutdownHook>,
    ) -> Self {
        Self {
            low_watermark: config.low_watermark,
            high_watermark: config.high_watermark,
            state: BridgeState::Uninitialized,
            outbound: None,
            subscription: None,
            outstanding: 0,
            in_flight: 0,
            deferred: None,
            policy,
            hook,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Demand granted to the producer and not yet consumed by a write.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Running with credit at or below the low watermark, held back only
    /// because the write path is congested.
    pub fn is_stalled(&self) -> bool {
        self.state == BridgeState::Running
            && self.outstanding <= self.low_watermark
            && self.outbound.as_ref().is_some_and(|o| !o.is_writable())
    }

    /// Future resolving at the next writability change of the write path.
    pub fn writability_changed(&self) -> Option<BoxFuture<'static, ()>> {
        self.outbound.as_ref().map(|o| o.writability_changed())
    }

    pub fn on_attach(&mut self, mut outbound: Box<dyn Outbound<T>>) -> Result<(), NetError> {
        match self.state {
            BridgeState::Uninitialized => {
                self.outbound = Some(outbound);
                self.transition(BridgeState::AwaitingSubscription);
                Ok(())
            }
            BridgeState::AwaitingAttachment => {
                self.outbound = Some(outbound);
                self.maybe_start();
                Ok(())
            }
            BridgeState::Complete => {
                outbound.close();
                Ok(())
            }
            state => Err(NetError::IllegalStateTransition { state: state.as_str(), event: "attach" }),
        }
    }

    /// The single accepted subscription, already checked by the handle.
    pub fn on_subscribe(&mut self, mut subscription: Box<dyn Subscription>) {
        match self.state {
            BridgeState::Uninitialized => {
                self.subscription = Some(subscription);
                self.transition(BridgeState::AwaitingAttachment);
            }
            BridgeState::AwaitingSubscription => {
                self.subscription = Some(subscription);
                self.maybe_start();
            }
            BridgeState::Cancelled | BridgeState::Complete => subscription.cancel(),
            state => {
                tracing::warn!(state = %state, "unexpected subscription ignored");
                subscription.cancel();
            }
        }
    }

    pub fn on_active(&mut self) {
        if self.state == BridgeState::Inactive {
            self.transition(BridgeState::Running);
            self.maybe_request_more();
        }
    }

    /// The write path went away.
    pub fn on_inactive(&mut self) {
        self.cancel();
    }

    pub fn on_writability_changed(&mut self) {
        self.maybe_request_more();
    }

    /// Hand one produced element to the write path.
    ///
    /// Returns the write's completion, which must be fed back through
    /// `on_write_complete`. Elements arriving after a terminal state are
    /// dropped.
    pub fn on_next(&mut self, item: T) -> Option<WriteFuture> {
        if self.state.is_terminal() {
            tracing::trace!(state = %self.state, "element after termination dropped");
            return None;
        }
        let outbound = self.outbound.as_mut()?;
        self.in_flight += 1;
        Some(outbound.write(item))
    }

    pub fn on_write_complete(&mut self, result: Result<(), NetError>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match result {
            Ok(()) => {
                self.outstanding = self.outstanding.saturating_sub(1);
                self.maybe_request_more();
                if self.in_flight == 0 {
                    if let Some(reason) = self.deferred.take() {
                        self.shutdown(reason);
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "element write failed");
                if let Some(subscription) = self.subscription.as_mut() {
                    if !self.state.is_terminal() {
                        subscription.cancel();
                    }
                }
                self.deferred = None;
                self.shutdown(ShutdownReason::Failed(NetError::WriteFailed));
            }
        }
    }

    pub fn on_complete(&mut self) {
        self.finish(ShutdownReason::Completed, self.policy.on_complete);
    }

    pub fn on_error(&mut self, error: NetError) {
        self.finish(ShutdownReason::Failed(error), self.policy.on_error);
    }

    /// Stop the producer. Idempotent.
    pub fn cancel(&mut self) {
        match self.state {
            BridgeState::AwaitingSubscription => self.transition(BridgeState::Cancelled),
            BridgeState::Running | BridgeState::Inactive => {
                if let Some(subscription) = self.subscription.as_mut() {
                    subscription.cancel();
                }
                self.transition(BridgeState::Cancelled);
            }
            _ => {}
        }
    }

    /// A completion that is waiting for in-flight writes.
    pub fn has_deferred_shutdown(&self) -> bool {
        self.deferred.is_some()
    }

    fn finish(&mut self, reason: ShutdownReason, timing: ShutdownTiming) {
        if timing == ShutdownTiming::AfterInFlightWrites && self.in_flight > 0 {
            tracing::trace!(in_flight = self.in_flight, "shutdown deferred until writes complete");
            self.deferred = Some(reason);
        } else {
            self.shutdown(reason);
        }
    }

    fn shutdown(&mut self, reason: ShutdownReason) {
        let action = self.hook.on_shutdown(&reason);
        match self.state {
            BridgeState::AwaitingSubscription | BridgeState::Inactive | BridgeState::Running => {
                if action == ShutdownAction::Close {
                    if let Some(outbound) = self.outbound.as_mut() {
                        match reason {
                            ShutdownReason::Completed => outbound.close(),
                            ShutdownReason::Failed(e) => outbound.abort(e),
                        }
                    }
                }
                self.transition(BridgeState::Complete);
            }
            // Nothing to close yet; a late attachment is closed on arrival.
            BridgeState::AwaitingAttachment => self.transition(BridgeState::Complete),
            _ => {}
        }
    }

    fn maybe_start(&mut self) {
        let active = self.outbound.as_ref().is_some_and(|o| o.is_active());
        if active {
            self.transition(BridgeState::Running);
            self.maybe_request_more();
        } else {
            self.transition(BridgeState::Inactive);
        }
    }

    fn maybe_request_more(&mut self) {
        // A producer that already finished gets no more demand.
        if self.state != BridgeState::Running
            || self.deferred.is_some()
            || self.outstanding > self.low_watermark
        {
            return;
        }
        let writable = self.outbound.as_ref().is_some_and(|o| o.is_writable());
        if !writable {
            return;
        }
        if let Some(subscription) = self.subscription.as_mut() {
            let n = self.high_watermark - self.outstanding;
            self.outstanding = self.high_watermark;
            subscription.request(n);
        }
    }

    fn transition(&mut self, next: BridgeState) {
        tracing::trace!(from = %self.state, to = %next, "bridge transition");
        self.state = next;
    }
}
