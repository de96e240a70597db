use crate::base::neterror::NetError;
use crate::socket::node::MajorVersion;
use boring::ssl::{ConnectConfiguration, SslConnector, SslConnectorBuilder, SslMethod, SslVerifyMode, SslVersion};

/// ALPN identifier for HTTP/1.1.
pub const ALPN_HTTP1: &str = "http/1.1";
/// ALPN identifier for HTTP/2.
pub const ALPN_H2: &str = "h2";

/// Client-side TLS settings for one connection attempt.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub min_version: Option<SslVersion>,
    pub max_version: Option<SslVersion>,
    /// Offered ALPN protocols, most preferred first. Empty disables ALPN.
    pub alpn_protos: Vec<String>,
    pub verify_certificates: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self::for_version(MajorVersion::Http2)
    }
}

impl TlsConfig {
    /// ALPN offer derived from the node's major version: HTTP/1 nodes
    /// offer only `http/1.1`, HTTP/2 nodes offer `h2` then `http/1.1`.
    pub fn for_version(version: MajorVersion) -> Self {
        let alpn_protos = match version {
            MajorVersion::Http1 => vec![ALPN_HTTP1.to_string()],
            MajorVersion::Http2 => vec![ALPN_H2.to_string(), ALPN_HTTP1.to_string()],
        };
        Self {
            min_version: Some(SslVersion::TLS1_2),
            max_version: Some(SslVersion::TLS1_3),
            alpn_protos,
            verify_certificates: true,
        }
    }

    /// TLS without ALPN; the pipeline then follows the node's static version.
    pub fn without_alpn(mut self) -> Self {
        self.alpn_protos.clear();
        self
    }

    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify_certificates = verify;
        self
    }

    /// Apply this configuration to an SSL connector builder.
    pub fn apply_to_builder(&self, builder: &mut SslConnectorBuilder) -> Result<(), NetError> {
        if let Some(min) = self.min_version {
            builder.set_min_proto_version(Some(min)).map_err(|_| NetError::SslProtocolError)?;
        }
        if let Some(max) = self.max_version {
            builder.set_max_proto_version(Some(max)).map_err(|_| NetError::SslProtocolError)?;
        }

        if !self.alpn_protos.is_empty() {
            let alpn_wire = encode_alpn(&self.alpn_protos)?;
            builder.set_alpn_protos(&alpn_wire).map_err(|_| NetError::SslProtocolError)?;
        }

        if self.verify_certificates {
            builder.set_verify(SslVerifyMode::PEER);
        } else {
            builder.set_verify(SslVerifyMode::NONE);
        }
        Ok(())
    }

    /// Build the per-connection handshake configuration for `server_name`.
    pub fn configure(&self, server_name: &str) -> Result<ConnectConfiguration, NetError> {
        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(|_| NetError::SslProtocolError)?;
        self.apply_to_builder(&mut builder)?;
        let mut config = builder.build().configure().map_err(|_| NetError::SslProtocolError)?;
        if !Self::should_set_sni(server_name) {
            config.set_use_server_name_indication(false);
        }
        if !self.verify_certificates {
            config.set_verify_hostname(false);
        }
        Ok(config)
    }

    /// Check if SNI (Server Name Indication) should be set for this host.
    /// Per RFC 6066, SNI MUST NOT be set for raw IP addresses.
    pub fn should_set_sni(host: &str) -> bool {
        host.parse::<std::net::IpAddr>().is_err()
    }
}

/// Encode protocol identifiers into the length-prefixed ALPN wire format.
pub fn encode_alpn<S: AsRef<str>>(protos: &[S]) -> Result<Vec<u8>, NetError> {
    let mut wire = Vec::new();
    for proto in protos {
        let proto = proto.as_ref().as_bytes();
        if proto.is_empty() || proto.len() > 255 {
            return Err(NetError::SslProtocolError);
        }
        wire.push(proto.len() as u8);
        wire.extend_from_slice(proto);
    }
    Ok(wire)
}
