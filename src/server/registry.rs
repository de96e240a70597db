use crate::base::neterror::NetError;
use crate::server::dispatch::Dispatcher;
use crate::socket::client::SocketType;
use crate::socket::tls::{ALPN_H2, ALPN_HTTP1};
use futures::future::BoxFuture;
use futures::FutureExt;
use hyper::server::conn::{http1, http2};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

pub type ServeFuture = BoxFuture<'static, Result<(), NetError>>;

/// Installs a server pipeline on a socket and drives it to the end of the
/// connection.
pub type ServeFactory = Arc<dyn Fn(SocketType, Arc<Dispatcher>) -> ServeFuture + Send + Sync>;

/// Protocol identifier → serve factory.
///
/// Identifiers are ALPN ids. The server looks up the id a handshake
/// selected, or the id of its configured version on plaintext listeners.
#[derive(Clone, Default)]
pub struct ProtocolRegistry {
    factories: HashMap<String, ServeFactory>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the HTTP/1.1 and HTTP/2 pipelines.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ALPN_HTTP1, Arc::new(serve_http1));
        registry.register(ALPN_H2, Arc::new(serve_http2));
        registry
    }

    /// Register `factory` for `protocol`, returning the one it replaces.
    pub fn register(&mut self, protocol: &str, factory: ServeFactory) -> Option<ServeFactory> {
        self.factories.insert(protocol.to_owned(), factory)
    }

    pub fn get(&self, protocol: &str) -> Option<&ServeFactory> {
        self.factories.get(protocol)
    }

    pub fn contains(&self, protocol: &str) -> bool {
        self.factories.contains_key(protocol)
    }

    pub fn protocols(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRegistry").field("protocols", &self.protocols()).finish()
    }
}

/// HTTP/1.1 with keep-alive.
pub fn serve_http1(socket: SocketType, dispatcher: Arc<Dispatcher>) -> ServeFuture {
    async move {
        let service = service_fn(move |req| {
            let dispatcher = dispatcher.clone();
            async move { Ok::<_, Infallible>(dispatcher.dispatch(req).await) }
        });
        http1::Builder::new()
            .keep_alive(true)
            .serve_connection(TokioIo::new(socket), service)
            .await
            .map_err(NetError::from)
    }
    .boxed()
}

/// HTTP/2, over TLS after ALPN or over plaintext by prior knowledge.
pub fn serve_http2(socket: SocketType, dispatcher: Arc<Dispatcher>) -> ServeFuture {
    async move {
        let service = service_fn(move |req| {
            let dispatcher = dispatcher.clone();
            async move { Ok::<_, Infallible>(dispatcher.dispatch(req).await) }
        });
        http2::Builder::new(TokioExecutor::new())
            .serve_connection(TokioIo::new(socket), service)
            .await
            .map_err(NetError::from)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_both_versions() {
        let registry = ProtocolRegistry::with_defaults();
        assert_eq!(registry.protocols(), vec!["h2", "http/1.1"]);
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = ProtocolRegistry::with_defaults();
        let custom: ServeFactory = Arc::new(|_socket: SocketType, _dispatcher: Arc<Dispatcher>| {
            async { Ok::<_, NetError>(()) }.boxed()
        });
        assert!(registry.register(ALPN_HTTP1, custom).is_some());
        assert!(registry.register("h2c", Arc::new(serve_http2)).is_none());
        assert!(registry.contains("h2c"));
    }
}
