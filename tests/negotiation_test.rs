mod common;

use boring::pkey::PKey;
use boring::ssl::{select_next_proto, AlpnError, SslAcceptor, SslMethod};
use boring::x509::X509;
use http::Version;
use portico::base::neterror::NetError;
use portico::config::{ClientConfig, PoolConfig, ServerConfig};
use portico::http::Request;
use portico::socket::negotiator::{ProtocolDecision, ProtocolNegotiator};
use portico::socket::node::{MajorVersion, Node};
use portico::socket::pool::ConnectionPool;
use portico::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// A TLS endpoint that selects `selected` from whatever the client offers
/// and reports when the client closes the connection.
async fn raw_tls_server(selected: &'static [u8]) -> (u16, oneshot::Receiver<()>) {
    let (cert, key) = common::self_signed("localhost");
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    builder.set_certificate(&X509::from_pem(cert.as_bytes()).unwrap()).unwrap();
    builder.set_private_key(&PKey::private_key_from_pem(key.as_bytes()).unwrap()).unwrap();
    builder.set_alpn_select_callback(move |_ssl, client| {
        select_next_proto(selected, client).ok_or(AlpnError::NOACK)
    });
    let acceptor = builder.build();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (closed_tx, closed_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut tls = tokio_boring::accept(&acceptor, stream).await.unwrap();
        let mut buf = [0u8; 64];
        while let Ok(n) = tls.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
        let _ = closed_tx.send(());
    });
    (port, closed_rx)
}

fn insecure(config: ClientConfig) -> ClientConfig {
    config.danger_accept_invalid_certs()
}

#[tokio::test]
async fn test_unrecognized_alpn_fails_and_closes() {
    let (port, closed) = raw_tls_server(b"\x06spdy/3").await;
    let config = insecure(ClientConfig {
        alpn_protocols: vec!["spdy/3".into(), "h2".into()],
        ..ClientConfig::default()
    });
    let negotiator = ProtocolNegotiator::new(&config);

    let err = negotiator.connect(&Node::http2("127.0.0.1", port).secure()).await.unwrap_err();
    match err {
        NetError::NegotiationFailed { protocol } => assert_eq!(protocol.as_deref(), Some("spdy/3")),
        other => panic!("expected NegotiationFailed, got {other:?}"),
    }
    tokio::time::timeout(Duration::from_secs(5), closed)
        .await
        .expect("connection was not closed")
        .unwrap();
}

#[tokio::test]
async fn test_negotiation_failure_through_pool_carries_cause() {
    let (port, _closed) = raw_tls_server(b"\x06spdy/3").await;
    let config = insecure(ClientConfig {
        alpn_protocols: vec!["spdy/3".into()],
        ..ClientConfig::default()
    });
    let pool = PoolConfig::new(vec![Node::http2("127.0.0.1", port).secure()], 1);
    let negotiator = Arc::new(ProtocolNegotiator::new(&config));
    let pool = ConnectionPool::new(&pool, negotiator).unwrap();
    match pool.acquire().await {
        Err(NetError::PoolExhausted { attempts: 1, last }) => match *last {
            NetError::NegotiationFailed { protocol } => assert_eq!(protocol.as_deref(), Some("spdy/3")),
            other => panic!("expected NegotiationFailed as the cause, got {other:?}"),
        },
        other => panic!("expected PoolExhausted, got {:?}", other.err()),
    }
}

#[tokio::test]
async fn test_absent_alpn_without_fallback_fails() {
    let mut config = ServerConfig::new(Node::http1("127.0.0.1", 0).secure());
    config.enable_negotiation = Some(false);
    let (_server, addr) =
        common::start(config, common::with_certificate(common::site("localhost")), vec![]).await;

    let negotiator = ProtocolNegotiator::new(&insecure(ClientConfig::default()));
    let node = Node::http1("127.0.0.1", addr.port()).secure();
    let err = negotiator.connect(&node).await.unwrap_err();
    assert!(matches!(err, NetError::NegotiationFailed { protocol: None }));

    let config = insecure(ClientConfig {
        alpn_fallback: Some(ProtocolDecision::Http1),
        ..ClientConfig::default()
    });
    let conn = ProtocolNegotiator::new(&config).connect(&node).await.unwrap();
    assert_eq!(conn.protocol(), ProtocolDecision::Http1);
}

#[tokio::test]
async fn test_alpn_selects_pipeline_per_node_version() {
    let config = ServerConfig::new(Node::http2("127.0.0.1", 0).secure());
    let (_server, addr) =
        common::start(config, common::with_certificate(common::site("localhost")), vec![]).await;
    let client = Client::new(insecure(ClientConfig::default())).await.unwrap();

    let url = format!("https://127.0.0.1:{}/", addr.port());
    let h2 = client
        .send(Request::get(&url).unwrap().with_version(MajorVersion::Http2))
        .await
        .unwrap();
    assert_eq!(h2.version(), Version::HTTP_2);
    assert_eq!(h2.text().unwrap(), "localhost HTTP/2.0");

    // An HTTP/1 node offers only http/1.1, so the server settles on it.
    let h1 = client.send(Request::get(&url).unwrap()).await.unwrap();
    assert_eq!(h1.version(), Version::HTTP_11);
    assert_eq!(h1.text().unwrap(), "localhost HTTP/1.1");
}

#[tokio::test]
async fn test_negotiation_disabled_uses_node_version() {
    let mut server_config = ServerConfig::new(Node::http2("127.0.0.1", 0).secure());
    server_config.enable_negotiation = Some(false);
    let (_server, addr) =
        common::start(server_config, common::with_certificate(common::site("localhost")), vec![]).await;

    let config = insecure(ClientConfig { enable_negotiation: false, ..ClientConfig::default() });
    let conn = ProtocolNegotiator::new(&config)
        .connect(&Node::http2("127.0.0.1", addr.port()).secure())
        .await
        .unwrap();
    assert_eq!(conn.protocol(), ProtocolDecision::Http2);
}

#[tokio::test]
async fn test_plaintext_prior_knowledge_http2() {
    let (_server, addr) =
        common::start(ServerConfig::new(Node::http2("127.0.0.1", 0)), common::site("plain"), vec![]).await;
    let client = Client::new(ClientConfig::default()).await.unwrap();
    let url = format!("http://127.0.0.1:{}/", addr.port());
    let resp = client
        .send(Request::get(&url).unwrap().with_version(MajorVersion::Http2))
        .await
        .unwrap();
    assert_eq!(resp.text().unwrap(), "plain HTTP/2.0");
}
