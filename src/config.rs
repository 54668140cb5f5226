use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Global configuration for the dev server
///
/// Loaded once at startup and immutable for the server's lifetime.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Names of plugins to activate (resolved against the built-in registry)
    #[serde(default)]
    pub plugins: Vec<String>,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Listen port (default: 5173)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 127.0.0.1)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Directory served by the static pipeline (default: current directory)
    #[serde(default = "default_root")]
    pub root: String,

    /// Serve the root index.html for unmatched HTML navigations (default: true)
    #[serde(default = "default_spa_fallback")]
    pub spa_fallback: bool,

    /// Max time to wait for a proxy target response, in seconds (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum idle connections per proxy target (default: 10)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Idle connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,

    /// Proxy rules, keyed by URL path prefix
    ///
    /// Prefix keys are unique by construction (map keys). A request whose
    /// path matches a prefix is forwarded to that rule's target instead of
    /// being served from `root`.
    #[serde(default)]
    pub proxy: HashMap<String, ProxyRule>,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
            root: default_root(),
            spa_fallback: default_spa_fallback(),
            request_timeout_secs: default_request_timeout(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
            proxy: HashMap::new(),
        }
    }
}

/// A single proxy rule: forward requests under a path prefix to a backend origin
#[derive(Debug, Deserialize, Clone)]
pub struct ProxyRule {
    /// Target origin, e.g. "http://localhost:8000" (scheme + authority only)
    pub target: String,

    /// Rewrite the outbound Host header to the target authority (default: false)
    #[serde(default)]
    pub change_origin: bool,

    /// Tunnel WebSocket/upgrade requests to the target (default: false)
    #[serde(default)]
    pub ws: bool,
}

impl ProxyRule {
    /// Create a rule with defaults for the given target
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            change_origin: false,
            ws: false,
        }
    }

    /// Enable Host header rewriting (builder pattern)
    pub fn with_change_origin(mut self) -> Self {
        self.change_origin = true;
        self
    }

    /// Enable WebSocket tunneling (builder pattern)
    pub fn with_ws(mut self) -> Self {
        self.ws = true;
        self
    }

    /// Validate the rule against its prefix key
    pub fn validate(&self, prefix: &str) -> Result<(), String> {
        if !prefix.starts_with('/') {
            return Err(format!(
                "Proxy rule '{}': prefix must start with '/'",
                prefix
            ));
        }

        let uri: http::Uri = match self.target.parse() {
            Ok(uri) => uri,
            Err(e) => {
                return Err(format!(
                    "Proxy rule '{}': invalid target '{}': {}",
                    prefix, self.target, e
                ));
            }
        };

        match uri.scheme_str() {
            Some("http") => {}
            Some(other) => {
                return Err(format!(
                    "Proxy rule '{}': unsupported target scheme '{}' (only http)",
                    prefix, other
                ));
            }
            None => {
                return Err(format!(
                    "Proxy rule '{}': target '{}' must include a scheme",
                    prefix, self.target
                ));
            }
        }

        if uri.authority().is_none() {
            return Err(format!(
                "Proxy rule '{}': target '{}' must include a host",
                prefix, self.target
            ));
        }

        // Targets are origins; path rewriting is not supported
        if uri.path() != "/" && !uri.path().is_empty() {
            return Err(format!(
                "Proxy rule '{}': target '{}' must not include a path",
                prefix, self.target
            ));
        }
        if uri.query().is_some() {
            return Err(format!(
                "Proxy rule '{}': target '{}' must not include a query",
                prefix, self.target
            ));
        }

        Ok(())
    }
}

// Default value functions
fn default_listen_port() -> u16 {
    5173
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_root() -> String {
    ".".to_string()
}

fn default_spa_fallback() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30 // 30 seconds max for the target to respond
}

fn default_pool_max_idle_per_host() -> usize {
    10 // Keep up to 10 idle connections per target
}

fn default_pool_idle_timeout() -> u64 {
    90 // Close idle connections after 90 seconds
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        for (prefix, rule) in &self.server.proxy {
            if let Err(e) = rule.validate(prefix) {
                errors.push(e);
            }
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
