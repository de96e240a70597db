//! HTTP response aggregated to a full body.

use crate::base::neterror::NetError;
use bytes::Bytes;
use http::header::LOCATION;
use http::{HeaderMap, StatusCode, Version};
use http_body::Body;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Incoming;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// HTTP Response with its body fully read.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, version: Version, headers: HeaderMap, body: Bytes) -> Self {
        Self { status, version, headers, body }
    }

    /// Read a hyper response to completion, failing with
    /// `ResponseBodyTooBig` past `max_content_length` bytes.
    pub async fn from_hyper(
        resp: http::Response<Incoming>,
        max_content_length: usize,
    ) -> Result<Self, NetError> {
        let (parts, body) = resp.into_parts();
        let body = collect_limited(body, max_content_length).await?;
        Ok(Self { status: parts.status, version: parts.version, headers: parts.headers, body })
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Get a reference to the headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|_| NetError::InvalidUtf8)
    }

    /// Body deserialized from JSON.
    #[cfg(feature = "json")]
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::JsonParseError(e.to_string()))
    }

    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection() && self.headers.contains_key(LOCATION)
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }
}

/// Collect any body, bounded by `limit` bytes.
pub(crate) async fn collect_limited<B>(body: B, limit: usize) -> Result<Bytes, NetError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) => Err(body_error(e)),
    }
}

fn body_error(e: BoxError) -> NetError {
    if e.is::<LengthLimitError>() {
        return NetError::ResponseBodyTooBig;
    }
    match e.downcast::<NetError>() {
        Ok(net) => *net,
        Err(e) => match e.downcast::<hyper::Error>() {
            Ok(hyper) => NetError::from(*hyper),
            Err(other) => {
                tracing::debug!(error = %other, "body read failed");
                NetError::HttpBodyError
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;

    fn response(status: StatusCode, location: Option<&str>) -> HttpResponse {
        let mut headers = HeaderMap::new();
        if let Some(location) = location {
            headers.insert(LOCATION, location.parse().unwrap());
        }
        HttpResponse::new(status, Version::HTTP_11, headers, Bytes::from_static(b"{\"ok\":true}"))
    }

    #[tokio::test]
    async fn test_collect_within_limit() {
        let body = Full::new(Bytes::from_static(b"hello"));
        assert_eq!(collect_limited(body, 5).await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_collect_over_limit() {
        let body = Full::new(Bytes::from_static(b"hello world"));
        assert!(matches!(collect_limited(body, 5).await, Err(NetError::ResponseBodyTooBig)));
    }

    #[test]
    fn test_redirect_detection() {
        assert!(response(StatusCode::FOUND, Some("/next")).is_redirect());
        assert!(!response(StatusCode::FOUND, None).is_redirect());
        assert!(!response(StatusCode::OK, Some("/next")).is_redirect());
        assert_eq!(response(StatusCode::FOUND, Some("/next")).location(), Some("/next"));
    }

    #[test]
    fn test_text_and_json() {
        let resp = response(StatusCode::OK, None);
        assert_eq!(resp.text().unwrap(), "{\"ok\":true}");
        let value: serde_json::Value = resp.json().unwrap();
        assert_eq!(value["ok"], true);
    }
}
