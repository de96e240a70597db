use std::collections::HashMap;

/// Host name lookup with wildcard templates and a default value.
///
/// `*.example.com` matches `example.com` and every name below it. Exact
/// entries win over wildcards, and the most specific wildcard wins over
/// broader ones. Names are compared case-insensitively, ignoring a
/// trailing dot.
#[derive(Debug, Clone)]
pub struct DomainNameMapping<V> {
    exact: HashMap<String, V>,
    wildcards: HashMap<String, V>,
    default: V,
}

fn normalize(hostname: &str) -> String {
    hostname.trim().trim_end_matches('.').to_ascii_lowercase()
}

impl<V> DomainNameMapping<V> {
    pub fn new(default: V) -> Self {
        Self { exact: HashMap::new(), wildcards: HashMap::new(), default }
    }

    /// Map `hostname` (optionally `*.`-prefixed) to `value`, replacing any
    /// previous mapping for the same template.
    pub fn add(&mut self, hostname: &str, value: V) -> &mut Self {
        let name = normalize(hostname);
        match name.strip_prefix("*.") {
            Some(suffix) => self.wildcards.insert(suffix.to_owned(), value),
            None => self.exact.insert(name, value),
        };
        self
    }

    pub fn with(mut self, hostname: &str, value: V) -> Self {
        self.add(hostname, value);
        self
    }

    /// The value for `hostname`, or the default when nothing matches.
    pub fn resolve(&self, hostname: &str) -> &V {
        self.lookup(hostname).unwrap_or(&self.default)
    }

    /// The value for `hostname` if an entry matches it.
    pub fn lookup(&self, hostname: &str) -> Option<&V> {
        let name = normalize(hostname);
        if let Some(value) = self.exact.get(&name) {
            return Some(value);
        }
        let mut suffix = name.as_str();
        loop {
            if let Some(value) = self.wildcards.get(suffix) {
                return Some(value);
            }
            suffix = suffix.split_once('.')?.1;
        }
    }

    pub fn default_value(&self) -> &V {
        &self.default
    }

    /// Number of templates, not counting the default.
    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every template with its value, wildcards spelled with `*.`.
    pub fn entries(&self) -> impl Iterator<Item = (String, &V)> {
        self.exact
            .iter()
            .map(|(k, v)| (k.clone(), v))
            .chain(self.wildcards.iter().map(|(k, v)| (format!("*.{k}"), v)))
    }
}
