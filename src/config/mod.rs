//! Configuration of the client-side socket registry.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Live-reloadable flag cells for the parameters that may change at runtime
mod flags;
mod tls;
pub use flags::*;
pub use tls::*;


//---
use std::env;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Tunables of the client-side socket map.
///
/// Configuration sources are merged in the following order (later sources
/// override earlier ones):
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables with `SOCKET_MAP__` prefix (highest priority)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SocketMapConfig {
    /// Seconds between consecutive health checks on created sockets.
    /// Must be strictly positive: health-checked sockets are never replaced
    /// while registered, which keeps removal without an expected id sound.
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_s: i64,

    /// Pooled connections without data transmission for this many seconds
    /// are closed. No effect for non-positive values.
    #[serde(default = "default_idle_timeout_second")]
    pub idle_timeout_second: i64,

    /// Defer close of connections for this many seconds even if nobody
    /// uses them anymore. Close immediately for non-positive values.
    #[serde(default = "default_defer_close_second")]
    pub defer_close_second: i64,

    /// Keep the first pooled sub-socket alive during idle sweeps.
    #[serde(default = "default_reserve_one_idle_socket")]
    pub reserve_one_idle_socket: bool,

    /// Expose per-map entry counts through the metrics registry.
    #[serde(default = "default_show_socketmap_in_vars")]
    pub show_socketmap_in_vars: bool,

    /// Pre-sized entry count of the socket map.
    #[serde(default = "default_suggested_map_size")]
    pub suggested_map_size: usize,

    /// Client TLS parameters handed to the socket factory.
    #[serde(default)]
    pub tls: TlsConfig,
}

impl Default for SocketMapConfig {
    fn default() -> Self {
        Self {
            health_check_interval_s: default_health_check_interval(),
            idle_timeout_second: default_idle_timeout_second(),
            defer_close_second: default_defer_close_second(),
            reserve_one_idle_socket: default_reserve_one_idle_socket(),
            show_socketmap_in_vars: default_show_socketmap_in_vars(),
            suggested_map_size: default_suggested_map_size(),
            tls: TlsConfig::default(),
        }
    }
}

impl SocketMapConfig {
    /// Creates a new configuration with hierarchical override support.
    ///
    /// # Example
    /// ```ignore
    /// // Load with default values only
    /// let cfg = SocketMapConfig::new()?;
    ///
    /// // Load with config file and environment variables
    /// std::env::set_var("CONFIG_PATH", "config/client.toml");
    /// std::env::set_var("SOCKET_MAP__IDLE_TIMEOUT_SECOND", "60");
    /// let cfg = SocketMapConfig::new()?;
    /// ```
    pub fn new() -> Result<Self> {
        // 1. Default values as the base layer
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        // 2. Conditionally add configuration files
        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path));
        }

        // 3. Add environment variable source
        builder = builder.add_source(
            Environment::with_prefix("SOCKET_MAP")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validates configuration consistency.
    pub fn validate(&self) -> Result<()> {
        if self.health_check_interval_s <= 0 {
            return Err(Error::Config(ConfigError::Message(
                "health_check_interval_s must be positive".into(),
            )));
        }

        if self.suggested_map_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "suggested_map_size must be greater than 0".into(),
            )));
        }

        self.tls.validate()?;

        Ok(())
    }
}

// Default value implementations
fn default_health_check_interval() -> i64 {
    3
}
fn default_idle_timeout_second() -> i64 {
    30
}
fn default_defer_close_second() -> i64 {
    0
}
fn default_reserve_one_idle_socket() -> bool {
    false
}
fn default_show_socketmap_in_vars() -> bool {
    false
}
fn default_suggested_map_size() -> usize {
    1024
}
