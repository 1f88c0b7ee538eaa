//! Updates Server CLI Module
//! Command-line interface for serving and inspecting published updates

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod formatter;

use crate::engine::config::{ConfigError, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "expo-updates-server")]
#[command(author = "Expo Updates Server Team")]
#[command(version)]
#[command(about = "Serves Expo Updates protocol manifests, directives and assets", long_about = None)]
pub struct Cli {
    /// Directory holding updates-server.config.json (defaults to current directory)
    #[arg(short, long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Root directory of published bundles
    #[arg(long, global = true, env = "UPDATES_DIR")]
    pub updates_dir: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the updates HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        bind: Option<String>,

        /// Scheme of the public asset URLs
        #[arg(long, env = "SERVER_HTTP_PROTOCOL")]
        public_scheme: Option<String>,

        /// Host of the public asset URLs
        #[arg(long, env = "SERVER_HOST")]
        public_host: Option<String>,

        /// Port of the public asset URLs
        #[arg(long, env = "SERVER_PORT")]
        public_port: Option<u16>,

        /// PEM private key for code signing
        #[arg(long, env = "PRIVATE_KEY_PATH")]
        private_key_path: Option<PathBuf>,

        /// Header attached to every asset request, as name=value
        #[arg(long = "asset-request-header", value_parser = parse_header_pair)]
        asset_request_headers: Vec<(String, String)>,
    },

    /// Show which bundle would be served for a runtime version
    Inspect {
        /// Runtime version to resolve
        #[arg(short, long)]
        runtime_version: String,

        /// Platform to build the manifest for
        #[arg(short, long, default_value = "ios")]
        platform: String,
    },
}

fn parse_header_pair(value: &str) -> Result<(String, String), String> {
    let (name, header_value) = value
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{value}'"))?;
    if name.trim().is_empty() {
        return Err("header name must not be empty".to_string());
    }
    Ok((name.trim().to_string(), header_value.trim().to_string()))
}

impl Cli {
    pub fn get_config_dir(&self) -> PathBuf {
        self.config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Config file values with global flag overrides applied.
    pub fn load_config(&self) -> Result<ServerConfig, ConfigError> {
        let mut config = ServerConfig::load_or_default(&self.get_config_dir())?;
        if let Some(updates_dir) = &self.updates_dir {
            config.updates_dir = updates_dir.clone();
        }
        Ok(config)
    }
}

impl Commands {
    /// Apply `serve` flags on top of a loaded config.
    pub fn apply_serve_overrides(&self, config: &mut ServerConfig) {
        let Commands::Serve {
            port,
            bind,
            public_scheme,
            public_host,
            public_port,
            private_key_path,
            asset_request_headers,
        } = self
        else {
            return;
        };

        if let Some(port) = port {
            config.listen.port = *port;
        }
        if let Some(bind) = bind {
            config.listen.host = bind.clone();
        }
        if let Some(scheme) = public_scheme {
            config.public_url.scheme = scheme.clone();
        }
        if let Some(host) = public_host {
            config.public_url.host = host.clone();
        }
        if public_port.is_some() {
            config.public_url.port = *public_port;
        }
        if private_key_path.is_some() {
            config.private_key_path = private_key_path.clone();
        }
        config
            .asset_request_headers
            .extend(asset_request_headers.iter().cloned());
    }
}
