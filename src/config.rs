//! Mapper configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::CacheConfig;
use crate::error::{MapperError, MapperResult};

/// File looked up in the working directory.
pub const LOCAL_CONFIG: &str = "isomapper.toml";

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub peer: PeerConfig,
}

/// Connection settings for the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Driver name; only `pg` is shipped.
    pub client: String,
    pub url: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            client: "pg".to_string(),
            url: "postgres://localhost/isomapper".to_string(),
            max_connections: 5,
        }
    }
}

impl StoreConfig {
    /// Canonical key; equal settings give equal keys.
    pub fn key(&self) -> String {
        match serde_json::to_value(self) {
            Ok(value) => config_key(&value),
            Err(_) => format!("client{}url{}", self.client, self.url),
        }
    }
}

/// Remote peer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Address the WebSocket endpoint binds to.
    pub bind_address: String,
    /// Endpoint a client transport connects to.
    pub url: String,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            url: "ws://127.0.0.1:8080/ws".to_string(),
        }
    }
}

impl MapperConfig {
    pub fn builder() -> MapperConfigBuilder {
        MapperConfigBuilder::default()
    }

    pub fn from_toml(content: &str) -> MapperResult<Self> {
        toml::from_str(content).map_err(|e| MapperError::Config(e.to_string()))
    }

    /// Config file to use: `explicit`, then `./isomapper.toml`, then the
    /// user config dir. `None` when nothing exists.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        let local = PathBuf::from(LOCAL_CONFIG);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("isomapper").join("config.toml"))
            .filter(|path| path.exists())
    }

    /// Load from the located file, or defaults when there is none.
    pub fn load(explicit: Option<&Path>) -> MapperResult<Self> {
        match Self::locate(explicit) {
            Some(path) => {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    MapperError::Config(format!("failed to read {}: {}", path.display(), e))
                })?;
                let config = Self::from_toml(&content)?;
                tracing::info!("loaded configuration from {}", path.display());
                Ok(config)
            }
            None => {
                tracing::debug!("no configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Builder for MapperConfig
#[derive(Debug, Default)]
pub struct MapperConfigBuilder {
    config: MapperConfig,
}

impl MapperConfigBuilder {
    pub fn database(mut self, url: impl Into<String>) -> Self {
        self.config.store.url = url.into();
        self
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.config.store.max_connections = n;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.config.peer.bind_address = addr.into();
        self
    }

    pub fn peer_url(mut self, url: impl Into<String>) -> Self {
        self.config.peer.url = url.into();
        self
    }

    pub fn build(self) -> MapperConfig {
        self.config
    }
}

/// Flatten a configuration value into a string key.
///
/// Object keys are visited in sorted order; each contributes its name
/// followed by its value, nested objects and arrays recursively.
pub fn config_key(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_key(value, &mut out);
    out
}

fn write_key(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            for key in keys {
                out.push_str(key);
                if let Some(inner) = fields.get(key) {
                    write_key(inner, out);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                out.push_str(&i.to_string());
                write_key(item, out);
            }
        }
        serde_json::Value::String(s) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}
