//! Sockets, protocol negotiation and connection pooling.
//!
//! - [`node`]: remote endpoint identity
//! - [`connectjob`]: DNS → TCP → TLS connection flow
//! - [`tls`]: client TLS configuration with BoringSSL
//! - [`negotiator`]: picks HTTP/1.1 or HTTP/2 per connection and installs the pipeline
//! - [`connection`]: a connection with its finalized pipeline
//! - [`pool`]: bounded pool over a fixed node list

pub mod client;
pub mod connection;
pub mod connectjob;
pub mod negotiator;
pub mod node;
pub mod pool;
pub mod tls;

pub use connection::{Connection, ConnectionId, Poolable, ShutdownHandle};
pub use negotiator::{Connect, ProtocolDecision, ProtocolNegotiator};
pub use node::{MajorVersion, Node};
pub use pool::ConnectionPool;
