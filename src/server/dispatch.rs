use crate::base::counters::Counters;
use crate::base::neterror::NetError;
use crate::http::response::collect_limited;
use crate::server::domain::Domain;
use crate::server::handler::{full, text, ServerResponse};
use crate::tls::mapping::DomainNameMapping;
use bytes::Bytes;
use http::uri::Authority;
use http::StatusCode;
use http_body::Body;

/// Routes requests to the domain their host names.
pub struct Dispatcher {
    domains: DomainNameMapping<Domain>,
    counters: Counters,
    max_content_length: usize,
}

impl Dispatcher {
    pub fn new(default: Domain, domains: Vec<Domain>, max_content_length: usize) -> Self {
        let mut mapping = DomainNameMapping::new(default);
        for domain in domains {
            for name in domain.names().map(str::to_owned).collect::<Vec<_>>() {
                mapping.add(&name, domain.clone());
            }
        }
        Self { domains: mapping, counters: Counters::new(), max_content_length }
    }

    pub fn domains(&self) -> &DomainNameMapping<Domain> {
        &self.domains
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// The domain serving `host`, port ignored.
    pub fn resolve(&self, host: Option<&str>) -> &Domain {
        match host.and_then(host_name) {
            Some(name) => self.domains.resolve(&name),
            None => self.domains.default_value(),
        }
    }

    /// Serve one request. Never fails; failures become error responses.
    pub async fn dispatch<B>(&self, request: http::Request<B>) -> ServerResponse
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.counters.record_request();
        let response = self.serve(request).await;
        self.counters.record_response();
        response
    }

    async fn serve<B>(&self, request: http::Request<B>) -> ServerResponse
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let host = request
            .uri()
            .authority()
            .map(|a| a.as_str().to_owned())
            .or_else(|| {
                request
                    .headers()
                    .get(http::header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned)
            });
        let domain = self.resolve(host.as_deref());

        let Some(handler) = domain.handler().cloned() else {
            tracing::debug!(domain = %domain.name(), path = %request.uri().path(), "no handler");
            return full(StatusCode::NOT_IMPLEMENTED, Bytes::new());
        };

        let (parts, body) = request.into_parts();
        let body = match collect_limited(body, self.max_content_length).await {
            Ok(body) => body,
            Err(NetError::ResponseBodyTooBig) => {
                return full(StatusCode::PAYLOAD_TOO_LARGE, Bytes::new());
            }
            Err(e) => {
                tracing::debug!(error = %e, "request body read failed");
                return text(StatusCode::BAD_REQUEST, e.to_string());
            }
        };

        let path = parts.uri.path().to_owned();
        match handler.handle(http::Request::from_parts(parts, body)).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(domain = %domain.name(), path = %path, error = %e, "handler failed");
                text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("default", self.domains.default_value())
            .field("domains", &self.domains.len())
            .finish()
    }
}

fn host_name(authority: &str) -> Option<String> {
    let authority: Authority = authority.parse().ok()?;
    let host = authority.host();
    Some(host.trim_start_matches('[').trim_end_matches(']').to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::handler::ServerRequest;
    use http_body_util::{BodyExt, Full};

    fn dispatcher() -> Dispatcher {
        let default = Domain::new("default").with_handler(|_req: ServerRequest| async {
            Ok::<_, NetError>(text(StatusCode::OK, "default"))
        });
        let api = Domain::new("api.test").with_alias("*.api.test").with_handler(|req: ServerRequest| async move {
            if req.uri().path() == "/fail" {
                return Err(NetError::HandlerFailed("boom".into()));
            }
            Ok(text(StatusCode::OK, format!("api {}", req.body().len())))
        });
        let bare = Domain::new("bare.test");
        Dispatcher::new(default, vec![api, bare], 8)
    }

    fn request(host: &str, path: &str, body: &'static str) -> http::Request<Full<Bytes>> {
        http::Request::builder()
            .uri(path)
            .header(http::header::HOST, host)
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    async fn body_of(response: ServerResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_routes_by_host_with_port_stripped() {
        let d = dispatcher();
        let response = d.dispatch(request("v2.api.test:8443", "/", "abc")).await;
        assert_eq!(body_of(response).await, "api 3");
        let response = d.dispatch(request("unknown.org", "/", "")).await;
        assert_eq!(body_of(response).await, "default");
        assert_eq!(d.counters().requests(), 2);
        assert_eq!(d.counters().pending(), 0);
    }

    #[tokio::test]
    async fn test_domain_without_handler_is_not_implemented() {
        let response = dispatcher().dispatch(request("bare.test", "/", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_handler_error_is_internal_server_error() {
        let response = dispatcher().dispatch(request("api.test", "/fail", "")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_of(response).await.contains("boom"));
    }

    #[tokio::test]
    async fn test_oversized_request_body() {
        let response = dispatcher().dispatch(request("api.test", "/", "more than eight")).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_host_name_parsing() {
        assert_eq!(host_name("example.com:80").as_deref(), Some("example.com"));
        assert_eq!(host_name("[::1]:8080").as_deref(), Some("::1"));
        assert_eq!(host_name("plain").as_deref(), Some("plain"));
    }
}
