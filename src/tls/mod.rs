//! Server-side TLS: virtual-host context selection by SNI, and ALPN.

pub mod acceptor;
pub mod mapping;

pub use acceptor::VirtualHostAcceptor;
pub use mapping::DomainNameMapping;
