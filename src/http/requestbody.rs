//! Request body for POST/PUT operations.

use crate::base::neterror::NetError;
use crate::bridge;
use crate::config::BridgeConfig;
use crate::http::TransportBody;
use bytes::Bytes;
use futures::Stream;
use http_body_util::{BodyExt, Empty, Full};
use std::fmt;
use std::pin::Pin;

/// A body produced element by element.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, NetError>> + Send>>;

/// Request body for HTTP methods that send data.
#[derive(Default)]
pub enum RequestBody {
    /// No body (GET, HEAD, DELETE).
    #[default]
    Empty,
    /// Body with raw bytes.
    Bytes(Bytes),
    /// Body pulled from a stream through a backpressure bridge.
    Stream(BodyStream),
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Bytes(Bytes::from(s))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(v: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(v))
    }
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        RequestBody::Bytes(Bytes::from(s.to_owned()))
    }
}

impl From<Bytes> for RequestBody {
    fn from(b: Bytes) -> Self {
        RequestBody::Bytes(b)
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            RequestBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl RequestBody {
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, NetError>> + Send + 'static,
    {
        RequestBody::Stream(Box::pin(stream))
    }

    /// Check if the body is empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// Length in bytes, unknown for streams.
    pub fn len(&self) -> Option<usize> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Bytes(b) => Some(b.len()),
            RequestBody::Stream(_) => None,
        }
    }

    /// Copy a buffered body. Streams can be consumed only once.
    pub fn try_clone(&self) -> Option<Self> {
        match self {
            RequestBody::Empty => Some(RequestBody::Empty),
            RequestBody::Bytes(b) => Some(RequestBody::Bytes(b.clone())),
            RequestBody::Stream(_) => None,
        }
    }

    /// The body as the pipeline sends it. Streams get their own bridge.
    pub fn into_transport(self, bridge_config: BridgeConfig) -> TransportBody {
        match self {
            RequestBody::Empty => Empty::<Bytes>::new().map_err(|never| match never {}).boxed(),
            RequestBody::Bytes(b) => Full::new(b).map_err(|never| match never {}).boxed(),
            RequestBody::Stream(stream) => bridge::streaming_body(stream, bridge_config),
        }
    }
}
