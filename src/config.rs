//! Configuration loaded from environment variables.
//!
//! Every setting has a default so both binaries start with zero
//! configuration for local development.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Where the roster blob lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// SQLite database file holding the roster blob.
    /// Env: `STAR_COINS_DB`
    /// Default: `star_coins.db`
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("star_coins.db"),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = env::var("STAR_COINS_DB") {
            if !path.trim().is_empty() {
                config.db_path = PathBuf::from(path);
            }
        }
        config
    }
}

/// Development reverse proxy settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Socket address the proxy listens on.
    /// Env: `PROXY_ADDR`
    /// Default: `0.0.0.0:3000`
    pub listen_addr: SocketAddr,

    /// Remote origin requests are forwarded to.
    /// Env: `PROXY_TARGET`
    /// Default: `https://steam.fun`
    pub target: String,

    /// Local path prefix that is forwarded.
    /// Env: `PROXY_PREFIX`
    /// Default: `/api`
    pub prefix: String,

    /// Remote path the prefix is rewritten to.
    /// Env: `PROXY_REWRITE`
    /// Default: `/java-api/points/sch`
    pub rewrite: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], 3000).into(),
            target: "https://steam.fun".to_string(),
            prefix: "/api".to_string(),
            rewrite: "/java-api/points/sch".to_string(),
        }
    }
}

impl ProxyConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(addr) = env::var("PROXY_ADDR").ok().and_then(|v| v.parse().ok()) {
            config.listen_addr = addr;
        }
        if let Ok(target) = env::var("PROXY_TARGET") {
            config.target = target.trim_end_matches('/').to_string();
        }
        if let Some(prefix) = env::var("PROXY_PREFIX").ok().and_then(|v| normalize_prefix(&v)) {
            config.prefix = prefix;
        }
        if let Ok(rewrite) = env::var("PROXY_REWRITE") {
            config.rewrite = rewrite;
        }

        config
    }

    /// Same config with an unusable prefix replaced by the default
    pub fn validated(mut self) -> Self {
        match normalize_prefix(&self.prefix) {
            Some(prefix) => self.prefix = prefix,
            None => self.prefix = Self::default().prefix,
        }
        self
    }

    /// Map a local path onto the remote path, `None` outside the prefix
    pub fn rewrite_path(&self, path: &str) -> Option<String> {
        let rest = path.strip_prefix(&self.prefix)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        Some(format!("{}{}", self.rewrite, rest))
    }

    /// Full upstream URL for a local path and optional query string
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> Option<String> {
        let path = self.rewrite_path(path)?;
        Some(match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", self.target, path, q),
            _ => format!("{}{}", self.target, path),
        })
    }
}

/// A route prefix must start with `/`, name at least one segment and hold no
/// route syntax. Trailing slashes are dropped.
pub fn normalize_prefix(raw: &str) -> Option<String> {
    let prefix = raw.trim().trim_end_matches('/');
    let usable = prefix.starts_with('/')
        && !prefix.contains("//")
        && !prefix.contains(|c: char| matches!(c, '*' | ':' | '{' | '}' | '?' | '#'));
    usable.then(|| prefix.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_path() {
        let config = ProxyConfig::default();
        assert_eq!(
            config.rewrite_path("/api/stuStar/queryList").as_deref(),
            Some("/java-api/points/sch/stuStar/queryList")
        );
        assert_eq!(config.rewrite_path("/api").as_deref(), Some("/java-api/points/sch"));
        assert_eq!(config.rewrite_path("/apix/thing"), None);
        assert_eq!(config.rewrite_path("/other"), None);
    }

    #[test]
    fn test_upstream_url_keeps_query() {
        let config = ProxyConfig::default();
        assert_eq!(
            config.upstream_url("/api/starGrant/activeGrant", Some("a=1&b=2")).as_deref(),
            Some("https://steam.fun/java-api/points/sch/starGrant/activeGrant?a=1&b=2")
        );
        assert_eq!(
            config.upstream_url("/api/x", Some("")).as_deref(),
            Some("https://steam.fun/java-api/points/sch/x")
        );
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("/api").as_deref(), Some("/api"));
        assert_eq!(normalize_prefix(" /api/v2/ ").as_deref(), Some("/api/v2"));
        assert_eq!(normalize_prefix(""), None);
        assert_eq!(normalize_prefix("/"), None);
        assert_eq!(normalize_prefix("api"), None);
        assert_eq!(normalize_prefix("/api/*rest"), None);
        assert_eq!(normalize_prefix("//api"), None);
    }

    #[test]
    fn test_validated_falls_back_to_default_prefix() {
        let config = ProxyConfig {
            prefix: "/".to_string(),
            ..ProxyConfig::default()
        };
        assert_eq!(config.validated().prefix, "/api");

        let config = ProxyConfig {
            prefix: "/v1/".to_string(),
            ..ProxyConfig::default()
        };
        assert_eq!(config.validated().prefix, "/v1");
    }

    #[test]
    fn test_defaults() {
        assert_eq!(StoreConfig::default().db_path, PathBuf::from("star_coins.db"));
        assert_eq!(ProxyConfig::default().listen_addr.port(), 3000);
    }
}
