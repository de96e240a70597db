//! Outgoing request value.

use crate::base::neterror::NetError;
use crate::config::BridgeConfig;
use crate::http::{RequestBody, TransportBody};
use crate::socket::negotiator::ProtocolDecision;
use crate::socket::node::{MajorVersion, Node};
use http::header::{HeaderValue, IntoHeaderName, HOST};
use http::{HeaderMap, Method, StatusCode};
use url::Url;

/// An HTTP request addressed by absolute URL.
///
/// `version` names the protocol the request's own node is configured
/// for; the protocol actually used is whatever the connection negotiated.
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    version: MajorVersion,
    headers: HeaderMap,
    body: RequestBody,
}

impl Request {
    pub fn new(method: Method, url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|_| NetError::InvalidUrl)?;
        match url.scheme() {
            "http" | "https" if url.host_str().is_some() => {}
            _ => return Err(NetError::InvalidUrl),
        }
        Ok(Self {
            method,
            url,
            version: MajorVersion::default(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        })
    }

    pub fn get(url: &str) -> Result<Self, NetError> {
        Self::new(Method::GET, url)
    }

    pub fn post(url: &str) -> Result<Self, NetError> {
        Self::new(Method::POST, url)
    }

    pub fn with_version(mut self, version: MajorVersion) -> Self {
        self.version = version;
        self
    }

    /// Add a header. Values that are not valid header values are skipped.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: IntoHeaderName,
        V: TryInto<HeaderValue>,
    {
        if let Ok(val) = value.try_into() {
            self.headers.insert(key, val);
        }
        self
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Set JSON body.
    #[cfg(feature = "json")]
    pub fn json<T: serde::Serialize>(mut self, json: &T) -> Result<Self, NetError> {
        let bytes = serde_json::to_vec(json).map_err(|e| NetError::JsonParseError(e.to_string()))?;
        self.body = RequestBody::from(bytes);
        self.headers
            .insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn version(&self) -> MajorVersion {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn request_body(&self) -> &RequestBody {
        &self.body
    }

    /// The node this request addresses when sent without a pool.
    pub fn node(&self) -> Result<Node, NetError> {
        Node::from_url(&self.url, self.version)
    }

    /// Copy the request for a resubmission. Fails for streamed bodies.
    pub fn try_clone(&self) -> Option<Self> {
        Some(Self {
            method: self.method.clone(),
            url: self.url.clone(),
            version: self.version,
            headers: self.headers.clone(),
            body: self.body.try_clone()?,
        })
    }

    /// Build the follow-up request for a redirect response.
    ///
    /// `location` is resolved against this request's URL. 307 and 308 keep
    /// the method and body; every other status becomes a bodiless GET.
    pub fn redirect(&self, status: StatusCode, location: &str) -> Result<Self, NetError> {
        let url = self.url.join(location).map_err(|_| NetError::InvalidUrl)?;
        let preserve = matches!(
            status,
            StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT
        );
        let (method, body) = if preserve {
            (self.method.clone(), self.body.try_clone().ok_or(NetError::HttpBodyError)?)
        } else {
            (Method::GET, RequestBody::Empty)
        };

        let mut headers = self.headers.clone();
        headers.remove(HOST);
        if !preserve {
            headers.remove(http::header::CONTENT_TYPE);
            headers.remove(http::header::CONTENT_LENGTH);
        }
        if url.origin() != self.url.origin() {
            headers.remove(http::header::AUTHORIZATION);
            headers.remove(http::header::COOKIE);
        }

        let mut next = Self::new(method, url.as_str())?.with_version(self.version);
        next.headers = headers;
        next.body = body;
        Ok(next)
    }

    /// Convert to the form sent over a connection running `protocol`.
    ///
    /// HTTP/1.1 uses origin-form targets with a `Host` header; HTTP/2 uses
    /// the absolute URI so the pipeline can fill in its pseudo-headers.
    pub fn into_http(
        self,
        protocol: ProtocolDecision,
        bridge_config: BridgeConfig,
    ) -> Result<http::Request<TransportBody>, NetError> {
        let uri = match protocol {
            ProtocolDecision::Http1 => {
                let mut target = self.url.path().to_owned();
                if let Some(query) = self.url.query() {
                    target.push('?');
                    target.push_str(query);
                }
                target
            }
            ProtocolDecision::Http2 => {
                let mut url = self.url.clone();
                url.set_fragment(None);
                url.into()
            }
        };

        let mut headers = self.headers;
        if protocol == ProtocolDecision::Http1 && !headers.contains_key(HOST) {
            let host = self.url.host_str().ok_or(NetError::InvalidUrl)?;
            let value = match self.url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_owned(),
            };
            headers.insert(HOST, HeaderValue::from_str(&value).map_err(|_| NetError::InvalidUrl)?);
        }

        let mut request = http::Request::builder()
            .method(self.method)
            .uri(uri)
            .version(protocol.http_version())
            .body(self.body.into_transport(bridge_config))
            .map_err(|_| NetError::InvalidUrl)?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}
