use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::socket::client::SocketType;
use crate::socket::node::Node;
use crate::socket::tls::TlsConfig;
use tokio::net::TcpStream;

/// Opens the raw transport for a node: DNS -> TCP -> TLS handshake.
///
/// The handshake is performed here; what to do with its ALPN outcome is
/// the negotiator's decision.
pub struct ConnectJob;

impl ConnectJob {
    pub async fn connect(
        node: &Node,
        tls: Option<&TlsConfig>,
        server_name: Option<&str>,
    ) -> Result<SocketType, NetError> {
        let stream = Self::connect_tcp(node).await?;

        let Some(tls) = tls else {
            return Ok(SocketType::Tcp(stream));
        };

        let server_name = server_name.unwrap_or(&node.host);
        let config = tls.configure(server_name)?;
        let tls_stream = tokio_boring::connect(config, server_name, stream).await.map_err(|e| {
            tracing::debug!(node = %node, error = ?e, "TLS handshake failed");
            NetError::SslProtocolError
        })?;
        Ok(SocketType::Ssl(tls_stream))
    }

    async fn connect_tcp(node: &Node) -> Result<TcpStream, NetError> {
        let addrs: Vec<_> = tokio::net::lookup_host((node.host.as_str(), node.port))
            .await
            .resolve_context(node)?
            .collect();
        tracing::trace!(host = %node.host, count = addrs.len(), "resolved node");

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(e) => Err(e).connect_context(node),
            None => Err(NetError::NameNotResolved),
        }
    }
}
