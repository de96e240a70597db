use crate::base::neterror::NetError;
use crate::bridge;
use crate::config::BridgeConfig;
use crate::http::TransportBody;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream};
use http::{header, HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full};
use std::future::Future;

/// A request as handlers see it, body fully read.
pub type ServerRequest = http::Request<Bytes>;

pub type ServerResponse = http::Response<TransportBody>;

pub type HandlerFuture = BoxFuture<'static, Result<ServerResponse, NetError>>;

/// Serves the requests of one domain.
///
/// Implemented for any `Fn(ServerRequest) -> impl Future<Output =
/// Result<ServerResponse, NetError>>`. An error becomes a 500 response
/// carrying the error text.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: ServerRequest) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(ServerRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ServerResponse, NetError>> + Send + 'static,
{
    fn handle(&self, request: ServerRequest) -> HandlerFuture {
        self(request).boxed()
    }
}

/// A response with a buffered body.
pub fn full(status: StatusCode, body: impl Into<Bytes>) -> ServerResponse {
    let mut response = http::Response::new(Full::new(body.into()).map_err(|never| match never {}).boxed());
    *response.status_mut() = status;
    response
}

/// A plain text response.
pub fn text(status: StatusCode, body: impl Into<String>) -> ServerResponse {
    let mut response = full(status, body.into());
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// A response whose body is pulled from `stream` through a backpressure
/// bridge.
pub fn streaming<S>(status: StatusCode, stream: S, config: BridgeConfig) -> ServerResponse
where
    S: Stream<Item = Result<Bytes, NetError>> + Send + 'static,
{
    let mut response = http::Response::new(bridge::streaming_body(stream, config));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closure_is_a_handler() {
        let handler = |req: ServerRequest| async move {
            Ok::<_, NetError>(text(StatusCode::OK, format!("{} bytes", req.body().len())))
        };
        let request = http::Request::new(Bytes::from_static(b"abc"));
        let response = handler.handle(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"3 bytes"));
    }
}
