use crate::config::{DomainConfig, PemSource};
use crate::server::handler::Handler;
use std::fmt;
use std::sync::Arc;

/// A virtual host: names, optional key material, and the handler serving it.
#[derive(Clone)]
pub struct Domain {
    config: DomainConfig,
    handler: Option<Arc<dyn Handler>>,
}

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_config(DomainConfig::new(name))
    }

    pub fn from_config(config: DomainConfig) -> Self {
        Self { config, handler: None }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.config = self.config.with_alias(alias);
        self
    }

    pub fn with_pem(mut self, certificate_chain: PemSource, private_key: PemSource) -> Self {
        self.config = self.config.with_pem(certificate_chain, private_key);
        self
    }

    pub fn with_handler(mut self, handler: impl Handler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The primary name followed by the aliases.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.config.name.as_str()).chain(self.config.aliases.iter().map(String::as_str))
    }

    pub fn config(&self) -> &DomainConfig {
        &self.config
    }

    pub fn handler(&self) -> Option<&Arc<dyn Handler>> {
        self.handler.as_ref()
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("name", &self.config.name)
            .field("aliases", &self.config.aliases)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.config.name, self.config.aliases)
    }
}
