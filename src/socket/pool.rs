use crate::base::neterror::NetError;
use crate::config::{PoolConfig, RetryTarget};
use crate::socket::connection::{Connection, ConnectionId, Poolable, ShutdownHandle};
use crate::socket::negotiator::Connect;
use crate::socket::node::Node;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bookkeeping for a connection handed out by `acquire`.
struct InUse {
    node: Node,
    shutdown: ShutdownHandle,
    /// Returned to the semaphore when the entry is dropped.
    _permit: OwnedSemaphorePermit,
}

struct PoolInner<C> {
    nodes: Vec<Node>,
    capacity: usize,
    retries_per_node: usize,
    retry_target: RetryTarget,
    connector: Box<dyn Connect<C>>,
    permits: Arc<Semaphore>,
    cursor: AtomicUsize,
    idle: DashMap<Node, VecDeque<C>>,
    in_use: DashMap<ConnectionId, InUse>,
    closed: AtomicBool,
}

/// Bounded pool of reusable connections over a fixed node list.
///
/// `capacity` permits bound the number of connections in use across all
/// nodes. Permits are granted in FIFO order; once one is held the next
/// node is chosen round robin and an idle connection for it is reused or
/// a new one is created through the connector.
///
/// A connection's way back into the pool is its id: `release` looks it up
/// in the in-use map, so connections carry no reference to the pool.
pub struct ConnectionPool<C: Poolable = Connection> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Poolable> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: Poolable> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("nodes", &self.inner.nodes.len())
            .field("capacity", &self.inner.capacity)
            .field("in_use", &self.in_use_count())
            .field("idle", &self.idle_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<C: Poolable> ConnectionPool<C> {
    pub fn new(config: &PoolConfig, connector: impl Connect<C>) -> Result<Self, NetError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                nodes: config.nodes.clone(),
                capacity: config.capacity,
                retries_per_node: config.retries_per_node,
                retry_target: config.retry_target,
                connector: Box::new(connector),
                permits: Arc::new(Semaphore::new(config.capacity)),
                cursor: AtomicUsize::new(0),
                idle: DashMap::new(),
                in_use: DashMap::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Eagerly create `n` idle connections, distributed over the nodes in
    /// configured order. The first creation failure is returned.
    pub async fn prepare(&self, n: usize) -> Result<(), NetError> {
        let nodes = &self.inner.nodes;
        for i in 0..n {
            if self.is_closed() {
                return Err(NetError::PoolClosed);
            }
            let node = &nodes[i % nodes.len()];
            let conn = self.inner.connector.connect(node).await?;
            if !self.park_idle(node, conn) {
                return Err(NetError::PoolClosed);
            }
        }
        tracing::debug!(count = n, nodes = nodes.len(), "pool prepared");
        Ok(())
    }

    /// Wait for a permit, then hand out a connection to the next node.
    ///
    /// Creation failures are retried up to `retries_per_node` times; the
    /// node retried is chosen by the configured `RetryTarget`. When the
    /// budget is spent the permit is returned and `PoolExhausted` is
    /// reported, carrying the last attempt's error.
    pub async fn acquire(&self) -> Result<C, NetError> {
        if self.is_closed() {
            return Err(NetError::PoolClosed);
        }
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| NetError::PoolClosed)?;
        if self.is_closed() {
            return Err(NetError::PoolClosed);
        }

        let budget = self.inner.retries_per_node + 1;
        let mut index = self.next_index();
        let mut attempts = 0;
        loop {
            let node = &self.inner.nodes[index];
            if let Some(conn) = self.take_idle(node) {
                tracing::trace!(node = %node, conn = %conn.id(), "reusing idle connection");
                return self.track(conn, permit);
            }

            attempts += 1;
            let last = match self.inner.connector.connect(node).await {
                Ok(conn) => return self.track(conn, permit),
                Err(e) => {
                    tracing::warn!(node = %node, attempt = attempts, error = %e, "connection attempt failed");
                    e
                }
            };

            if self.is_closed() {
                return Err(NetError::PoolClosed);
            }
            if attempts >= budget {
                tracing::error!(attempts, error = %last, "pool exhausted");
                return Err(NetError::PoolExhausted { attempts, last: Box::new(last) });
            }
            if self.inner.retry_target == RetryTarget::NextNode {
                index = self.next_index();
            }
        }
    }

    /// Return a connection handed out by `acquire`.
    ///
    /// The permit is released. The connection goes back to its node's
    /// idle set unless `close` is set, it is no longer usable, or the pool
    /// has been closed, in which case it is closed. Connections the pool
    /// is not tracking leave the pool untouched.
    pub fn release(&self, conn: C, close: bool) {
        let Some((_, entry)) = self.inner.in_use.remove(&conn.id()) else {
            tracing::trace!(conn = %conn.id(), "release of untracked connection ignored");
            return;
        };

        if close || !conn.is_usable() || self.is_closed() {
            tracing::debug!(conn = %conn.id(), node = %entry.node, close, "discarding connection");
            conn.close();
        } else {
            self.park_idle(&entry.node, conn);
        }
        // Permit returns only after the connection is idle again.
        drop(entry);
    }

    /// Close every tracked connection and fail current and future acquires.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.permits.close();

        let mut closed = 0;
        for mut idle in self.inner.idle.iter_mut() {
            for conn in idle.drain(..) {
                conn.close();
                closed += 1;
            }
        }
        self.inner.idle.clear();

        for entry in self.inner.in_use.iter() {
            entry.shutdown.close();
            closed += 1;
        }
        self.inner.in_use.clear();
        tracing::debug!(closed, "pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn nodes(&self) -> &[Node] {
        &self.inner.nodes
    }

    pub fn available_permits(&self) -> usize {
        self.inner.permits.available_permits()
    }

    pub fn in_use_count(&self) -> usize {
        self.inner.in_use.len()
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.iter().map(|e| e.len()).sum()
    }

    /// Whether `id` is currently handed out by this pool.
    pub fn is_tracked(&self, id: ConnectionId) -> bool {
        self.inner.in_use.contains_key(&id)
    }

    fn next_index(&self) -> usize {
        self.inner.cursor.fetch_add(1, Ordering::Relaxed) % self.inner.nodes.len()
    }

    fn take_idle(&self, node: &Node) -> Option<C> {
        let mut idle = self.inner.idle.get_mut(node)?;
        while let Some(conn) = idle.pop_front() {
            if conn.is_usable() {
                return Some(conn);
            }
            tracing::debug!(conn = %conn.id(), node = %node, "dropping stale idle connection");
            conn.close();
        }
        None
    }

    /// Put `conn` in its node's idle set. Returns false when the pool was
    /// closed meanwhile, in which case the connection has been closed.
    fn park_idle(&self, node: &Node, conn: C) -> bool {
        self.inner.idle.entry(node.clone()).or_default().push_back(conn);
        // `close` may have swept the idle sets before the push.
        if !self.is_closed() {
            return true;
        }
        if let Some((_, stranded)) = self.inner.idle.remove(node) {
            for conn in stranded {
                conn.close();
            }
        }
        false
    }

    fn track(&self, conn: C, permit: OwnedSemaphorePermit) -> Result<C, NetError> {
        let id = conn.id();
        self.inner.in_use.insert(
            id,
            InUse { node: conn.node().clone(), shutdown: conn.shutdown_handle(), _permit: permit },
        );
        // `close` may have swept the in-use map before the insert.
        if self.is_closed() {
            self.inner.in_use.remove(&id);
            conn.close();
            return Err(NetError::PoolClosed);
        }
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;
    use std::time::Duration;

    struct MockConn {
        id: ConnectionId,
        node: Node,
        shutdown: ShutdownHandle,
    }

    impl Poolable for MockConn {
        fn id(&self) -> ConnectionId {
            self.id
        }
        fn node(&self) -> &Node {
            &self.node
        }
        fn is_usable(&self) -> bool {
            !self.shutdown.is_closed()
        }
        fn shutdown_handle(&self) -> ShutdownHandle {
            self.shutdown.clone()
        }
    }

    #[derive(Clone, Default)]
    struct MockConnector {
        next_id: Arc<AtomicU64>,
        attempts: Arc<Mutex<Vec<u16>>>,
        failing: Arc<Mutex<HashSet<u16>>>,
    }

    impl MockConnector {
        fn failing(ports: &[u16]) -> Self {
            let connector = Self::default();
            connector.failing.lock().unwrap().extend(ports);
            connector
        }

        fn attempts(&self) -> Vec<u16> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl Connect<MockConn> for MockConnector {
        fn connect(&self, node: &Node) -> BoxFuture<'static, Result<MockConn, NetError>> {
            self.attempts.lock().unwrap().push(node.port);
            let result = if self.failing.lock().unwrap().contains(&node.port) {
                Err(NetError::ConnectionRefused)
            } else {
                Ok(MockConn {
                    id: ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed)),
                    node: node.clone(),
                    shutdown: ShutdownHandle::new(),
                })
            };
            async move { result }.boxed()
        }
    }

    /// Connector whose connects finish only when the test opens the gate.
    #[derive(Clone)]
    struct GatedConnector {
        gate: Arc<tokio::sync::Semaphore>,
        created: Arc<Mutex<Vec<ShutdownHandle>>>,
    }

    impl GatedConnector {
        fn new() -> Self {
            Self { gate: Arc::new(tokio::sync::Semaphore::new(0)), created: Arc::default() }
        }
    }

    impl Connect<MockConn> for GatedConnector {
        fn connect(&self, node: &Node) -> BoxFuture<'static, Result<MockConn, NetError>> {
            let gate = self.gate.clone();
            let created = self.created.clone();
            let node = node.clone();
            async move {
                gate.acquire().await.map_err(|_| NetError::ConnectionAborted)?.forget();
                let shutdown = ShutdownHandle::new();
                let id = {
                    let mut created = created.lock().unwrap();
                    created.push(shutdown.clone());
                    ConnectionId(created.len() as u64)
                };
                Ok::<_, NetError>(MockConn { id, node, shutdown })
            }
            .boxed()
        }
    }

    fn nodes(ports: &[u16]) -> Vec<Node> {
        ports.iter().map(|p| Node::http1("127.0.0.1", *p)).collect()
    }

    fn pool(ports: &[u16], capacity: usize, connector: MockConnector) -> ConnectionPool<MockConn> {
        ConnectionPool::new(&PoolConfig::new(nodes(ports), capacity), connector).unwrap()
    }

    #[tokio::test]
    async fn test_capacity_blocks_until_release() {
        let pool = pool(&[1, 2], 2, MockConnector::default());
        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.available_permits(), 0);

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "third acquire must wait for a permit");

        pool.release(a, false);
        let c = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(c.is_ok());
        assert_eq!(pool.in_use_count(), 2);
    }

    #[tokio::test]
    async fn test_one_release_wakes_exactly_one_waiter() {
        let pool = pool(&[1], 1, MockConnector::default());
        let held = pool.acquire().await.unwrap();

        let spawn_waiter = || {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        let w1 = spawn_waiter();
        let w2 = spawn_waiter();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!w1.is_finished() && !w2.is_finished());

        pool.release(held, false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(w1.is_finished() ^ w2.is_finished(), "one release must wake exactly one waiter");

        let (winner, loser) = if w1.is_finished() { (w1, w2) } else { (w2, w1) };
        let conn = winner.await.unwrap().unwrap();
        pool.release(conn, false);
        let second = tokio::time::timeout(Duration::from_secs(1), loser).await.unwrap().unwrap();
        assert!(second.is_ok());
        assert_eq!(pool.in_use_count(), 1);
    }

    #[tokio::test]
    async fn test_close_during_prepare_closes_late_connection() {
        let connector = GatedConnector::new();
        let pool: ConnectionPool<MockConn> =
            ConnectionPool::new(&PoolConfig::new(nodes(&[1]), 1), connector.clone()).unwrap();
        let preparing = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.prepare(1).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.close();
        connector.gate.add_permits(1);
        let result = tokio::time::timeout(Duration::from_secs(1), preparing).await.unwrap().unwrap();
        assert!(matches!(result, Err(NetError::PoolClosed)));
        assert_eq!(pool.idle_count(), 0);
        let created = connector.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert!(created[0].is_closed());
    }

    #[tokio::test]
    async fn test_park_after_close_sweep_closes_connection() {
        let pool = pool(&[1], 1, MockConnector::default());
        let conn = pool.acquire().await.unwrap();
        let handle = conn.shutdown_handle();
        // A release that passed its closed check before `close` swept the idle sets.
        pool.inner.closed.store(true, Ordering::SeqCst);
        assert!(!pool.park_idle(&Node::http1("127.0.0.1", 1), conn));
        assert!(handle.is_closed());
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_round_robin_order() {
        let pool = pool(&[1, 2, 3], 1, MockConnector::default());
        let mut visited = Vec::new();
        for _ in 0..6 {
            let conn = pool.acquire().await.unwrap();
            visited.push(conn.node().port);
            pool.release(conn, false);
        }
        assert_eq!(visited, vec![1, 2, 3, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_idle_connection_is_reused() {
        let connector = MockConnector::default();
        let pool = pool(&[1], 1, connector.clone());
        let conn = pool.acquire().await.unwrap();
        let id = conn.id();
        pool.release(conn, false);
        assert_eq!(pool.idle_count(), 1);

        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(connector.attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_release_with_close_discards() {
        let pool = pool(&[1], 1, MockConnector::default());
        let conn = pool.acquire().await.unwrap();
        let handle = conn.shutdown_handle();
        pool.release(conn, true);
        assert!(handle.is_closed());
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_release_unusable_discards() {
        let pool = pool(&[1], 1, MockConnector::default());
        let conn = pool.acquire().await.unwrap();
        conn.shutdown_handle().mark_closed();
        pool.release(conn, false);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_release_untracked_is_noop() {
        let pool = pool(&[1], 1, MockConnector::default());
        let held = pool.acquire().await.unwrap();
        let stranger = MockConn {
            id: ConnectionId(999),
            node: Node::http1("127.0.0.1", 1),
            shutdown: ShutdownHandle::new(),
        };
        pool.release(stranger, false);
        assert_eq!(pool.available_permits(), 0);
        assert_eq!(pool.in_use_count(), 1);
        assert_eq!(pool.idle_count(), 0);
        pool.release(held, false);
        assert_eq!(pool.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_retry_advances_to_next_node() {
        let connector = MockConnector::failing(&[1]);
        let config = PoolConfig::new(nodes(&[1, 2]), 1).with_retries(1);
        let pool = ConnectionPool::new(&config, connector.clone()).unwrap();
        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.node().port, 2);
        assert_eq!(connector.attempts(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_retry_same_node_then_exhausted() {
        let connector = MockConnector::failing(&[1]);
        let config = PoolConfig::new(nodes(&[1, 2]), 1)
            .with_retries(2)
            .with_retry_target(RetryTarget::SameNode);
        let pool = ConnectionPool::new(&config, connector.clone()).unwrap();
        let err = pool.acquire().await.unwrap_err();
        match err {
            NetError::PoolExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, NetError::ConnectionRefused));
            }
            other => panic!("expected PoolExhausted, got {other:?}"),
        }
        assert_eq!(connector.attempts(), vec![1, 1, 1]);
        assert_eq!(pool.available_permits(), 1, "permit must be returned on exhaustion");
    }

    #[tokio::test]
    async fn test_close_unblocks_waiters_and_closes_connections() {
        let pool = pool(&[1], 1, MockConnector::default());
        let held = pool.acquire().await.unwrap();
        let handle = held.shutdown_handle();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.close();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(NetError::PoolClosed)));
        assert!(handle.is_closed());
        assert!(matches!(pool.acquire().await, Err(NetError::PoolClosed)));

        // Late release after close is harmless.
        pool.release(held, false);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_prepare_distributes_and_propagates_errors() {
        let pool = pool(&[1, 2], 4, MockConnector::default());
        pool.prepare(3).await.unwrap();
        assert_eq!(pool.idle_count(), 3);

        let failing = self::pool(&[1, 2], 4, MockConnector::failing(&[2]));
        assert!(matches!(failing.prepare(2).await, Err(NetError::ConnectionRefused)));
        assert_eq!(failing.idle_count(), 1);
    }
}
