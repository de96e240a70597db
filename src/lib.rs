//! # portico
//!
//! Asynchronous HTTP/1.1 and HTTP/2 transport for clients and servers.
//!
//! The transport core is three pieces that decide how connections are
//! created, reused and driven:
//!
//! - **Connection pool**: a bounded set of reusable connections over a
//!   fixed node list, handed out round robin under a global permit count
//! - **Protocol negotiator**: fixes HTTP/1.1 or HTTP/2 per connection from
//!   ALPN, or from the node's configured version on plaintext
//! - **Backpressure bridge**: grants body elements to a pull-based
//!   producer only as fast as the write path drains them
//!
//! On top sit [`http::TransportSession`] (one exchange on one connection),
//! the [`client::Client`] owning pool and sessions, and a multi-domain
//! [`server::Server`] selecting TLS contexts by SNI.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use portico::client::Client;
//! use portico::config::ClientConfig;
//! use portico::http::Request;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::new(ClientConfig::default()).await.unwrap();
//!     let response = client.send(Request::get("https://example.com").unwrap()).await.unwrap();
//!     println!("Status: {}", response.status());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error taxonomy, session load states and counters
//! - [`config`] - Serde configuration values
//! - [`socket`] - Nodes, negotiation, connections and the pool
//! - [`bridge`] - Credit-based backpressure for streamed bodies
//! - [`http`] - Requests, responses, cookies and sessions
//! - [`client`] - The client
//! - [`tls`] - Server-side SNI and ALPN
//! - [`server`] - The server

pub mod base;
pub mod bridge;
pub mod client;
pub mod config;
pub mod http;
pub mod server;
pub mod socket;
pub mod tls;

pub use base::neterror::NetError;
pub use client::Client;
