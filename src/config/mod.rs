//! Configuration management.
//!
//! opsflow configuration can come from:
//! - Environment variables (OPSFLOW_*)
//! - Config file (~/.config/opsflow/config.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// opsflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Trigger ingress configuration
    #[serde(default)]
    pub ingress: IngressConfig,

    /// Domain operations API
    #[serde(default)]
    pub domain: DomainConfig,

    /// Engine tuning
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// Trigger ingress configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngressConfig {
    /// Shared secret webhook callers must present; unset disables the check
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

/// Domain operations API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Internal operations API endpoint
    #[serde(default = "default_domain_endpoint")]
    pub endpoint: String,

    /// Bearer token for the operations API
    #[serde(default)]
    pub secret: Option<String>,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            endpoint: default_domain_endpoint(),
            secret: None,
        }
    }
}

fn default_domain_endpoint() -> String {
    "http://localhost:4000".to_string()
}

/// Engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Resumer poll interval in milliseconds
    #[serde(default = "default_resumer_poll_ms")]
    pub resumer_poll_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resumer_poll_ms: default_resumer_poll_ms(),
        }
    }
}

fn default_resumer_poll_ms() -> u64 {
    1000
}

impl Config {
    /// Load configuration from default locations.
    pub fn load() -> Self {
        let mut config = Self::default();

        let path = Self::config_dir().join("config.toml");
        if let Ok(partial) = Self::load_partial_from_path(&path) {
            config.apply_partial(partial);
        }

        config.apply_env_overrides();
        config
    }

    /// Get the data directory.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("opsflow"))
            .unwrap_or_else(|| PathBuf::from(".opsflow"))
    }

    /// Get the config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("opsflow"))
            .unwrap_or_else(|| PathBuf::from(".opsflow"))
    }

    /// The database path: configured, or the default under the data dir.
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("opsflow.db"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("OPSFLOW_SERVER_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                self.server.port = parsed;
            }
        }
        if let Ok(host) = std::env::var("OPSFLOW_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(path) = std::env::var("OPSFLOW_DATABASE_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
        if let Ok(secret) = std::env::var("OPSFLOW_WEBHOOK_SECRET") {
            self.ingress.webhook_secret = Some(secret);
        }
        if let Ok(endpoint) = std::env::var("OPSFLOW_DOMAIN_ENDPOINT") {
            self.domain.endpoint = endpoint;
        }
        if let Ok(secret) = std::env::var("OPSFLOW_DOMAIN_SECRET") {
            self.domain.secret = Some(secret);
        }
        if let Ok(poll) = std::env::var("OPSFLOW_RESUMER_POLL_MS") {
            if let Ok(parsed) = poll.parse::<u64>() {
                self.engine.resumer_poll_ms = parsed;
            }
        }
    }

    fn load_partial_from_path(path: &Path) -> std::result::Result<PartialConfig, ()> {
        let content = std::fs::read_to_string(path).map_err(|_| ())?;
        toml::from_str(&content).map_err(|_| ())
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(server) = partial.server {
            self.server = server;
        }
        if let Some(storage) = partial.storage {
            self.storage = storage;
        }
        if let Some(ingress) = partial.ingress {
            self.ingress = ingress;
        }
        if let Some(domain) = partial.domain {
            self.domain = domain;
        }
        if let Some(engine) = partial.engine {
            self.engine = engine;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    server: Option<ServerConfig>,
    storage: Option<StorageConfig>,
    ingress: Option<IngressConfig>,
    domain: Option<DomainConfig>,
    engine: Option<EngineConfig>,
}
