//! Updates Server Configuration Module
//! Handles loading and validating updates-server.config.json

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "updates-server.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Root of the published bundles: `<updates_dir>/<runtimeVersion>/<bundle>/`
    #[serde(default = "default_updates_dir")]
    pub updates_dir: PathBuf,
    #[serde(default)]
    pub public_url: PublicUrl,
    #[serde(default)]
    pub listen: ListenConfig,
    /// PEM private key used when clients send `expo-expect-signature`
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    /// Headers the client attaches when fetching each asset
    #[serde(default)]
    pub asset_request_headers: BTreeMap<String, String>,
}

/// Externally visible base of asset URLs embedded in manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUrl {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_updates_dir() -> PathBuf {
    PathBuf::from("updates")
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for PublicUrl {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host: default_host(),
            port: None,
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            updates_dir: default_updates_dir(),
            public_url: PublicUrl::default(),
            listen: ListenConfig::default(),
            private_key_path: None,
            asset_request_headers: BTreeMap::new(),
        }
    }
}

impl PublicUrl {
    /// `{scheme}://{host}[:{port}]`
    pub fn origin(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.scheme, self.host, port),
            None => format!("{}://{}", self.scheme, self.host),
        }
    }
}

impl ServerConfig {
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: ServerConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load the config file when present, defaults otherwise.
    pub fn load_or_default(config_dir: &Path) -> Result<Self, ConfigError> {
        match Self::load(config_dir) {
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }
}
