//! Configuration loading and parsing.
//!
//! Every field is optional; a missing config file means "all defaults".

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::routes::{RouteTable, is_valid_route_id};

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_CHUNK_BYTES: usize = 64 * 1024;
pub const DEFAULT_CHUNK_DELAY_MS: u64 = 25;

/// Top-level proxy configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct ProxyConfig {
    /// Bind address (host:port).
    pub bind: Option<String>,
    /// Settings for the artificially chunked `/stream/audio/{id}` endpoint.
    pub stream: Option<StreamSettingsConfig>,
    /// Extra or overriding routes: audio id -> upstream URL.
    pub routes: Option<BTreeMap<String, String>>,
    /// Drop the built-in routes and serve only `routes`.
    pub replace_default_routes: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamSettingsConfig {
    pub chunk_bytes: Option<usize>,
    pub delay_ms: Option<u64>,
}

/// Resolved re-chunking parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RechunkSettings {
    pub chunk_bytes: usize,
    pub delay: Duration,
}

impl Default for RechunkSettings {
    fn default() -> Self {
        Self {
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            delay: Duration::from_millis(DEFAULT_CHUNK_DELAY_MS),
        }
    }
}

impl ProxyConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<ProxyConfig>(raw)?)
    }
}

pub fn bind_from_config(cfg: &ProxyConfig) -> Result<SocketAddr> {
    let raw = cfg.bind.as_deref().unwrap_or(DEFAULT_BIND);
    raw.parse()
        .with_context(|| format!("parse bind address {raw}"))
}

pub fn rechunk_from_config(cfg: &ProxyConfig) -> Result<RechunkSettings> {
    let defaults = RechunkSettings::default();
    let Some(stream) = cfg.stream.as_ref() else {
        return Ok(defaults);
    };
    let chunk_bytes = stream.chunk_bytes.unwrap_or(defaults.chunk_bytes);
    if chunk_bytes == 0 {
        return Err(anyhow!("stream.chunk_bytes must be greater than 0"));
    }
    Ok(RechunkSettings {
        chunk_bytes,
        delay: stream
            .delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.delay),
    })
}

/// Built-in routes merged with (or replaced by) configured ones.
pub fn routes_from_config(cfg: &ProxyConfig) -> Result<RouteTable> {
    let mut table = if cfg.replace_default_routes.unwrap_or(false) {
        RouteTable::default()
    } else {
        RouteTable::with_defaults()
    };
    for (id, url) in cfg.routes.iter().flatten() {
        if !is_valid_route_id(id) {
            return Err(anyhow!("invalid route id {id:?}"));
        }
        let url = url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(anyhow!("route {id} must point at an http(s) URL, got {url:?}"));
        }
        table.insert(id.clone(), url);
    }
    if table.is_empty() {
        return Err(anyhow!("no routes configured"));
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = ProxyConfig::parse("").unwrap();
        assert_eq!(bind_from_config(&cfg).unwrap().port(), 8080);
        assert_eq!(rechunk_from_config(&cfg).unwrap(), RechunkSettings::default());
        assert_eq!(routes_from_config(&cfg).unwrap().len(), 5);
    }

    #[test]
    fn configured_routes_extend_and_override() {
        let cfg = ProxyConfig::parse(
            r#"
bind = "127.0.0.1:9000"

[stream]
chunk_bytes = 1024
delay_ms = 0

[routes]
"1" = "http://mirror.local/one.mp3"
jazz = "https://radio.example/jazz.mp3"
"#,
        )
        .unwrap();
        assert_eq!(bind_from_config(&cfg).unwrap().to_string(), "127.0.0.1:9000");
        let rechunk = rechunk_from_config(&cfg).unwrap();
        assert_eq!(rechunk.chunk_bytes, 1024);
        assert_eq!(rechunk.delay, Duration::ZERO);
        let routes = routes_from_config(&cfg).unwrap();
        assert_eq!(routes.len(), 6);
        assert_eq!(routes.get("1"), Some("http://mirror.local/one.mp3"));
        assert_eq!(routes.get("jazz"), Some("https://radio.example/jazz.mp3"));
    }

    #[test]
    fn replace_default_routes_keeps_only_configured() {
        let cfg = ProxyConfig::parse(
            r#"
replace_default_routes = true
[routes]
only = "http://host/only.mp3"
"#,
        )
        .unwrap();
        let routes = routes_from_config(&cfg).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes.get("1"), None);
    }

    #[test]
    fn rejects_bad_values() {
        let cfg = ProxyConfig::parse("[stream]\nchunk_bytes = 0\n").unwrap();
        assert!(rechunk_from_config(&cfg).is_err());

        let cfg = ProxyConfig::parse("[routes]\n\"a/b\" = \"http://x/y\"\n").unwrap();
        assert!(routes_from_config(&cfg).is_err());

        let cfg = ProxyConfig::parse("[routes]\nx = \"ftp://x/y\"\n").unwrap();
        assert!(routes_from_config(&cfg).is_err());

        let cfg = ProxyConfig::parse("replace_default_routes = true\n").unwrap();
        assert!(routes_from_config(&cfg).is_err());

        let cfg = ProxyConfig::parse("bind = \"not an address\"\n").unwrap();
        assert!(bind_from_config(&cfg).is_err());
    }
}
