mod common;

use bytes::Bytes;
use http::StatusCode;
use portico::base::loadstate::LoadState;
use portico::base::neterror::NetError;
use portico::config::{ClientConfig, PoolConfig, ServerConfig};
use portico::http::{Request, RequestBody};
use portico::server::Server;
use portico::socket::node::{MajorVersion, Node};
use portico::Client;

async fn plain_server(version: MajorVersion) -> (Server, String) {
    let node = Node::new("127.0.0.1", 0, version, false);
    let (server, addr) = common::start(ServerConfig::new(node), common::site("site"), vec![]).await;
    (server, format!("http://127.0.0.1:{}", addr.port()))
}

async fn direct_client() -> Client {
    Client::new(ClientConfig::default()).await.unwrap()
}

#[tokio::test]
async fn test_execute_completes_future_and_tracks_session() {
    let (_server, base) = plain_server(MajorVersion::Http1).await;
    let client = direct_client().await;

    let (session, response) = client.execute(Request::get(&format!("{base}/")).unwrap()).await.unwrap();
    assert_eq!(client.live_session_count(), 1);
    assert_eq!(session.state(), LoadState::WaitingForResponse);

    let response = response.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().unwrap(), "site HTTP/1.1");

    client.close_session(session);
    assert_eq!(client.live_session_count(), 0);
    assert_eq!(client.counters().requests(), 1);
    assert_eq!(client.counters().responses(), 1);
}

#[tokio::test]
async fn test_session_executes_only_once() {
    let (_server, base) = plain_server(MajorVersion::Http1).await;
    let client = direct_client().await;
    let (mut session, response) = client.execute(Request::get(&format!("{base}/")).unwrap()).await.unwrap();
    response.await.unwrap();

    let again = session.execute(Request::get(&format!("{base}/")).unwrap()).await;
    assert!(matches!(again, Err(NetError::IllegalStateTransition { event: "execute", .. })));
}

#[tokio::test]
async fn test_transform_applied_before_fulfilment() {
    let (_server, base) = plain_server(MajorVersion::Http2).await;
    let client = direct_client().await;
    let mut session = client.new_session(Some(Node::http2("127.0.0.1", base_port(&base)))).unwrap();

    let request = Request::get(&format!("{base}/")).unwrap().with_version(MajorVersion::Http2);
    let length = session.execute_with(request, |resp| Ok(resp.body().len())).await.unwrap();
    assert_eq!(length.await.unwrap(), "site HTTP/2.0".len());
    session.close();
}

#[tokio::test]
async fn test_continuation_carries_cookies() {
    let (_server, base) = plain_server(MajorVersion::Http1).await;
    let client = direct_client().await;

    let (login, response) = client.execute(Request::get(&format!("{base}/login")).unwrap()).await.unwrap();
    response.await.unwrap();
    assert_eq!(login.cookies().get("session").as_deref(), Some("s3cr3t"));

    let whoami = client.continuation(login, Request::get(&format!("{base}/whoami")).unwrap()).await.unwrap();
    assert_eq!(whoami.text().unwrap(), "session=s3cr3t");
    assert_eq!(client.live_session_count(), 0, "both sessions are closed");
}

#[tokio::test]
async fn test_redirect_opens_new_session() {
    let (_server, base) = plain_server(MajorVersion::Http1).await;
    let client = direct_client().await;

    let original = Request::get(&format!("{base}/redirect")).unwrap();
    let follow_up = original.try_clone().unwrap();
    let (session, response) = client.execute(original).await.unwrap();
    let response = response.await.unwrap();
    assert!(response.is_redirect());

    let next = follow_up.redirect(response.status(), response.location().unwrap()).unwrap();
    assert_eq!(next.url().path(), "/whoami");
    let final_response = client.continuation(session, next).await.unwrap();
    assert_eq!(final_response.text().unwrap(), "anonymous");
}

#[tokio::test]
async fn test_retry_resubmits_on_same_session() {
    let (_server, base) = plain_server(MajorVersion::Http1).await;
    let client = direct_client().await;

    let request = Request::get(&format!("{base}/fail")).unwrap();
    let (session, response) = client.execute(request).await.unwrap();
    let failed = response.await.unwrap();
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(failed.text().unwrap().contains("deliberate failure"));

    let retried = client.retry(session, Request::get(&format!("{base}/")).unwrap()).await.unwrap();
    assert_eq!(retried.status(), StatusCode::OK);
    assert_eq!(client.live_session_count(), 0);
    assert_eq!(client.counters().pending(), 0);
}

#[tokio::test]
async fn test_streamed_request_body_round_trips() {
    let (_server, base) = plain_server(MajorVersion::Http2).await;
    let client = direct_client().await;

    let chunks: Vec<Result<Bytes, NetError>> = (0..64).map(|i| Ok(Bytes::from(format!("{i:02}|")))).collect();
    let expected: String = (0..64).map(|i| format!("{i:02}|")).collect();
    let request = Request::post(&format!("{base}/echo"))
        .unwrap()
        .with_version(MajorVersion::Http2)
        .body(RequestBody::stream(futures::stream::iter(chunks)));

    let echoed = client.send(request).await.unwrap();
    assert_eq!(echoed.text().unwrap(), expected);
}

#[tokio::test]
async fn test_streamed_response_and_content_limit() {
    let (_server, base) = plain_server(MajorVersion::Http1).await;

    let client = direct_client().await;
    let resp = client.send(Request::get(&format!("{base}/stream")).unwrap()).await.unwrap();
    assert_eq!(resp.text().unwrap(), common::stream_body());

    let limited = Client::new(ClientConfig { max_content_length: 64, ..ClientConfig::default() }).await.unwrap();
    let err = limited.send(Request::get(&format!("{base}/stream")).unwrap()).await.unwrap_err();
    assert!(matches!(err, NetError::ResponseBodyTooBig));
}

#[tokio::test]
async fn test_pooled_client_under_concurrency() {
    let (_server, base) = plain_server(MajorVersion::Http1).await;
    let pool = PoolConfig::new(vec![Node::http1("127.0.0.1", base_port(&base))], 2);
    let client = Client::new(ClientConfig::default().with_pool(pool)).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let client = client.clone();
        let url = format!("{base}/");
        tasks.push(tokio::spawn(async move { client.send(Request::get(&url).unwrap()).await }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().status(), StatusCode::OK);
    }

    let pool = client.pool().unwrap();
    assert_eq!(pool.available_permits(), 2);
    assert!(pool.idle_count() <= 2);
    assert_eq!(client.counters().requests(), 10);
    assert_eq!(client.live_session_count(), 0);
}

#[tokio::test]
async fn test_client_close_force_closes_live_sessions() {
    let (_server, base) = plain_server(MajorVersion::Http1).await;
    let pool = PoolConfig::new(vec![Node::http1("127.0.0.1", base_port(&base))], 1);
    let client = Client::new(ClientConfig::default().with_pool(pool)).await.unwrap();

    let (session, response) = client.execute(Request::get(&format!("{base}/")).unwrap()).await.unwrap();
    response.await.unwrap();
    client.close();

    assert_eq!(client.live_session_count(), 0);
    let err = client.send(Request::get(&format!("{base}/")).unwrap()).await.unwrap_err();
    assert!(matches!(err, NetError::PoolClosed));
    drop(session);
}

fn base_port(base: &str) -> u16 {
    base.rsplit(':').next().unwrap().parse().unwrap()
}
