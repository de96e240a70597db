use crate::base::neterror::NetError;
use crate::config::DomainConfig;
use crate::socket::client::SocketType;
use crate::socket::tls::encode_alpn;
use crate::tls::mapping::DomainNameMapping;
use boring::pkey::PKey;
use boring::ssl::{
    select_next_proto, AlpnError, NameType, SniError, SslAcceptor, SslAcceptorBuilder, SslContext,
    SslMethod, SslVersion,
};
use boring::x509::X509;
use std::sync::Arc;
use tokio::net::TcpStream;

/// Server-side TLS for several virtual domains on one listener.
///
/// Every domain with key material gets its own context. The handshake
/// starts on the default domain's context; the SNI callback swaps in the
/// context the mapping resolves for the requested name. Each context
/// selects ALPN from the same server preference list.
pub struct VirtualHostAcceptor {
    acceptor: SslAcceptor,
    mapping: Arc<DomainNameMapping<SslContext>>,
}

impl VirtualHostAcceptor {
    /// `alpn` is the server's protocol preference; empty disables ALPN.
    pub fn new<S: AsRef<str>>(
        default: &DomainConfig,
        domains: &[DomainConfig],
        alpn: &[S],
    ) -> Result<Self, NetError> {
        let alpn_wire = if alpn.is_empty() { None } else { Some(encode_alpn(alpn)?) };

        let default_context = domain_builder(default, alpn_wire.as_deref())?.build().into_context();
        let mut mapping = DomainNameMapping::new(default_context);
        for domain in domains {
            if domain.certificate_chain.is_none() {
                tracing::debug!(domain = %domain.name, "domain without certificate uses the default context");
                continue;
            }
            let context = domain_builder(domain, alpn_wire.as_deref())?.build().into_context();
            for name in std::iter::once(&domain.name).chain(&domain.aliases) {
                mapping.add(name, context.clone());
            }
        }
        let mapping = Arc::new(mapping);

        let mut builder = domain_builder(default, alpn_wire.as_deref())?;
        let contexts = mapping.clone();
        builder.set_servername_callback(move |ssl, _alert| {
            let Some(name) = ssl.servername(NameType::HOST_NAME).map(str::to_owned) else {
                return Ok(());
            };
            match contexts.lookup(&name) {
                Some(context) => ssl.set_ssl_context(context).map_err(|e| {
                    tracing::warn!(sni = %name, error = %e, "failed to switch TLS context");
                    SniError::ALERT_FATAL
                }),
                None => Ok(()),
            }
        });

        Ok(Self { acceptor: builder.build(), mapping })
    }

    /// Run the server handshake on an accepted stream.
    pub async fn accept(&self, stream: TcpStream) -> Result<SocketType, NetError> {
        match tokio_boring::accept(&self.acceptor, stream).await {
            Ok(stream) => Ok(SocketType::Ssl(stream)),
            Err(e) => {
                tracing::debug!(error = %e, "TLS handshake failed");
                Err(NetError::SslProtocolError)
            }
        }
    }

    /// Number of host templates with their own context.
    pub fn domain_count(&self) -> usize {
        self.mapping.len()
    }
}

impl std::fmt::Debug for VirtualHostAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.mapping.entries().map(|(name, _)| name).collect();
        f.debug_struct("VirtualHostAcceptor").field("domains", &names).finish()
    }
}

fn domain_builder(domain: &DomainConfig, alpn_wire: Option<&[u8]>) -> Result<SslAcceptorBuilder, NetError> {
    let (Some(chain), Some(key)) = (&domain.certificate_chain, &domain.private_key) else {
        return Err(NetError::InvalidConfig(format!(
            "domain {} needs a certificate chain and private key",
            domain.name
        )));
    };
    let chain = X509::stack_from_pem(&chain.load()?)
        .map_err(|e| NetError::InvalidConfig(format!("bad certificate for {}: {e}", domain.name)))?;
    let key = PKey::private_key_from_pem(&key.load()?)
        .map_err(|e| NetError::InvalidConfig(format!("bad private key for {}: {e}", domain.name)))?;
    let mut chain = chain.into_iter();
    let leaf = chain
        .next()
        .ok_or_else(|| NetError::InvalidConfig(format!("empty certificate chain for {}", domain.name)))?;

    let mut builder =
        SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).map_err(|_| NetError::SslProtocolError)?;
    builder.set_min_proto_version(Some(SslVersion::TLS1_2)).map_err(|_| NetError::SslProtocolError)?;
    builder.set_certificate(&leaf).map_err(|_| NetError::SslProtocolError)?;
    for intermediate in chain {
        builder.add_extra_chain_cert(intermediate).map_err(|_| NetError::SslProtocolError)?;
    }
    builder.set_private_key(&key).map_err(|_| NetError::SslProtocolError)?;
    builder.check_private_key().map_err(|_| {
        NetError::InvalidConfig(format!("private key does not match certificate for {}", domain.name))
    })?;

    if let Some(wire) = alpn_wire {
        let wire = wire.to_vec();
        builder.set_alpn_select_callback(move |_ssl, client| {
            select_next_proto(&wire, client).ok_or(AlpnError::NOACK)
        });
    }
    Ok(builder)
}
