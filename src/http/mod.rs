//! Request/response exchange over pooled or direct connections.
//!
//! - [`request`]: the outgoing request value and its wire form per protocol
//! - [`requestbody`]: buffered or streamed request bodies
//! - [`response`]: aggregated responses bounded by a content length limit
//! - [`cookiebox`]: per-session cookie state
//! - [`session`]: `TransportSession`, one exchange bound to one connection

pub mod cookiebox;
pub mod request;
pub mod requestbody;
pub mod response;
pub mod session;

use crate::base::neterror::NetError;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;

/// Body type every pipeline in the crate sends.
pub type TransportBody = BoxBody<Bytes, NetError>;

pub use cookiebox::CookieBox;
pub use request::Request;
pub use requestbody::RequestBody;
pub use response::HttpResponse;
pub use session::{LiveSessions, ResponseFuture, SessionId, TransportSession};
