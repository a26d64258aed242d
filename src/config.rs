//! Configuration management for the spatial view server

use crate::error::{Result, SpatialError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use tracing::Level;

/// Largest accepted per-request chunk channel capacity
pub const MAX_STREAM_BUFFER: usize = 4096;

/// Configuration for the spatial view server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address the HTTP server binds to (default: 127.0.0.1:5985)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Chunks buffered per row stream before the encoder waits on the client
    /// (default: 16)
    /// Valid range: 1 to 4096
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    /// Maximum log level: trace, debug, info, warn or error (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// JSON seed file loaded into the in-memory engine at startup (optional)
    #[serde(default)]
    pub seed_file: Option<String>,

    /// Whether to serve `/_metrics` (default: true)
    #[serde(default = "default_true")]
    pub expose_metrics: bool,
}

impl ServerConfig {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Ok(ServerConfig)` if the file was loaded and validated
    /// * `Err(SpatialError)` if loading, parsing or validation failed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            SpatialError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ServerConfig = serde_yaml::from_str(content)
            .map_err(|e| SpatialError::ConfigError(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load a config file, falling back to defaults when `allow_missing`
    /// is set and the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P, allow_missing: bool) -> Result<Self> {
        if allow_missing && !path.as_ref().exists() {
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.stream_buffer == 0 || self.stream_buffer > MAX_STREAM_BUFFER {
            return Err(SpatialError::ConfigError(format!(
                "stream_buffer must be between 1 and {}, got {}",
                MAX_STREAM_BUFFER, self.stream_buffer
            )));
        }

        self.log_level()?;
        Ok(())
    }

    /// The bind address, parsed
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_address.parse().map_err(|e| {
            SpatialError::ConfigError(format!(
                "Invalid listen_address {}: {}",
                self.listen_address, e
            ))
        })
    }

    /// The configured tracing level
    pub fn log_level(&self) -> Result<Level> {
        self.log_level.parse().map_err(|_| {
            SpatialError::ConfigError(format!(
                "Unknown log_level {}, expected one of trace, debug, info, warn, error",
                self.log_level
            ))
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            stream_buffer: default_stream_buffer(),
            log_level: default_log_level(),
            seed_file: None,
            expose_metrics: default_true(),
        }
    }
}

fn default_listen_address() -> String {
    "127.0.0.1:5985".to_string()
}

fn default_stream_buffer() -> usize {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
