use std::sync::Arc;
use thiserror::Error;

/// Transport error taxonomy.
///
/// Network-stack failures keep their conventional negative codes; errors
/// specific to the pool, the negotiator and the backpressure bridge live
/// in the custom range starting at -10000.
#[derive(Debug, Error, Clone)]
pub enum NetError {
    // Connection Errors
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection reset")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Connection to {host}:{port} failed: {source}")]
    ConnectionFailedTo {
        host: String,
        port: u16,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Could not resolve {domain}: {source}")]
    NameNotResolvedFor {
        domain: String,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Address in use")]
    AddressInUse,

    // HTTP Errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Invalid response")]
    InvalidResponse,
    #[error("HTTP/2 protocol error")]
    Http2ProtocolError,
    #[error("Response body exceeds the configured maximum content length")]
    ResponseBodyTooBig,
    #[error("HTTP body error")]
    HttpBodyError,
    #[error("Response body is not valid UTF-8")]
    InvalidUtf8,
    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    // Transport core errors (custom codes starting at -10000)
    #[error("Pool exhausted after {attempts} connection attempts: {last}")]
    PoolExhausted {
        attempts: usize,
        /// The error of the final attempt.
        #[source]
        last: Box<NetError>,
    },
    #[error("Pool closed")]
    PoolClosed,
    #[error("Protocol negotiation failed: {}", protocol.as_deref().unwrap_or("no protocol selected"))]
    NegotiationFailed { protocol: Option<String> },
    #[error("Write failed")]
    WriteFailed,
    #[error("Subscription already attached")]
    SubscriptionAlreadyAttached,
    #[error("Illegal state transition: {event} while {state}")]
    IllegalStateTransition { state: &'static str, event: &'static str },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed | NetError::ConnectionFailedTo { .. } => -104,
            NetError::NameNotResolved | NetError::NameNotResolvedFor { .. } => -105,
            NetError::SslProtocolError => -107,
            NetError::ConnectionTimedOut => -118,
            NetError::AddressInUse => -147,

            NetError::InvalidUrl => -300,
            NetError::InvalidResponse => -320,
            NetError::Http2ProtocolError => -337,
            NetError::ResponseBodyTooBig => -345,
            NetError::HttpBodyError => -354,

            NetError::InvalidUtf8 => -10000,
            NetError::JsonParseError(_) => -10001,
            NetError::PoolExhausted { .. } => -10010,
            NetError::PoolClosed => -10011,
            NetError::NegotiationFailed { .. } => -10012,
            NetError::WriteFailed => -10013,
            NetError::SubscriptionAlreadyAttached => -10014,
            NetError::IllegalStateTransition { .. } => -10015,
            NetError::InvalidConfig(_) => -10016,
            NetError::HandlerFailed(_) => -10017,
            NetError::Unknown(code) => *code,
        }
    }

    /// Create a connection error with host/port context.
    pub fn connection_failed_to(host: &str, port: u16, source: std::io::Error) -> Self {
        NetError::ConnectionFailedTo { host: host.to_string(), port, source: Arc::new(source) }
    }

    /// Create a DNS resolution error with domain context.
    pub fn dns_failed(domain: &str, source: std::io::Error) -> Self {
        NetError::NameNotResolvedFor { domain: domain.to_string(), source: Arc::new(source) }
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,
            -107 => NetError::SslProtocolError,
            -118 => NetError::ConnectionTimedOut,
            -147 => NetError::AddressInUse,

            -300 => NetError::InvalidUrl,
            -320 => NetError::InvalidResponse,
            -337 => NetError::Http2ProtocolError,
            -345 => NetError::ResponseBodyTooBig,
            -354 => NetError::HttpBodyError,

            -10000 => NetError::InvalidUtf8,
            -10011 => NetError::PoolClosed,
            -10013 => NetError::WriteFailed,
            -10014 => NetError::SubscriptionAlreadyAttached,
            _ => NetError::Unknown(code),
        }
    }
}

impl From<hyper::Error> for NetError {
    fn from(err: hyper::Error) -> Self {
        if err.is_canceled() || err.is_closed() || err.is_incomplete_message() {
            NetError::ConnectionClosed
        } else if err.is_parse() {
            NetError::InvalidResponse
        } else if err.is_body_write_aborted() {
            NetError::WriteFailed
        } else if err.is_timeout() {
            NetError::ConnectionTimedOut
        } else {
            tracing::debug!(error = %err, "hyper error");
            NetError::ConnectionFailed
        }
    }
}
