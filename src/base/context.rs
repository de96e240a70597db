//! IO error context keyed by the node being dialled or bound.

use crate::base::neterror::NetError;
use crate::socket::node::Node;
use std::io;

/// Attach node context to IO failures.
pub trait IoResultExt<T> {
    /// Dialling `node` failed.
    ///
    /// ```ignore
    /// use portico::base::context::IoResultExt;
    ///
    /// let stream = TcpStream::connect(addr).await.connect_context(&node)?;
    /// // Error: "Connection to example.com:443 failed: connection refused"
    /// ```
    fn connect_context(self, node: &Node) -> Result<T, NetError>;

    /// Resolving `node`'s host failed.
    fn resolve_context(self, node: &Node) -> Result<T, NetError>;

    /// Binding a listener for `node` failed. A taken port is `AddressInUse`.
    fn listen_context(self, node: &Node) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn connect_context(self, node: &Node) -> Result<T, NetError> {
        self.map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut => NetError::ConnectionTimedOut,
            _ => NetError::connection_failed_to(&node.host, node.port, e),
        })
    }

    fn resolve_context(self, node: &Node) -> Result<T, NetError> {
        self.map_err(|e| NetError::dns_failed(&node.host, e))
    }

    fn listen_context(self, node: &Node) -> Result<T, NetError> {
        self.map_err(|e| match e.kind() {
            io::ErrorKind::AddrInUse => NetError::AddressInUse,
            _ => NetError::connection_failed_to(&node.host, node.port, e),
        })
    }
}
