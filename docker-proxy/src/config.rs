//! # Configuration
//!
//! Settings are read from a YAML or JSON file (chosen by extension) and can be
//! overridden per field through `DOCKER_PROXY_*` environment variables:
//!
//! ```yaml
//! listen_addr: ":8443"
//! use_tls: true
//! cert_file_path: cert.pem
//! key_file_path: key.pem
//! read_timeout_secs: 30
//! write_timeout_secs: 60
//! idle_timeout_secs: 120
//! cache_eviction_secs: 3600
//! ```
//!
//! Timeouts of `0` disable the corresponding limit.

use crate::error::ConfigError;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Prefix of environment variables that override file values.
pub const ENV_PREFIX: &str = "DOCKER_PROXY_";

/// Default config file location used by the binary.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/docker-proxy/config.yaml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Socket address to listen on; `":8443"` binds every interface
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub use_tls: bool,

    #[serde(default = "default_cert_file_path")]
    pub cert_file_path: String,

    #[serde(default = "default_key_file_path")]
    pub key_file_path: String,

    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Lifetime of a cached manifest response
    #[serde(default = "default_cache_eviction")]
    pub cache_eviction_secs: u64,
}

fn default_listen_addr() -> String {
    ":8443".to_string()
}

fn default_cert_file_path() -> String {
    crate::tls::CERT_PATH.to_string()
}

fn default_key_file_path() -> String {
    crate::tls::KEY_PATH.to_string()
}

fn default_read_timeout() -> u64 {
    30
}

fn default_write_timeout() -> u64 {
    60
}

fn default_idle_timeout() -> u64 {
    120
}

fn default_cache_eviction() -> u64 {
    3600 // 1 hour
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            use_tls: false,
            cert_file_path: default_cert_file_path(),
            key_file_path: default_key_file_path(),
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            cache_eviction_secs: default_cache_eviction(),
        }
    }
}

impl Config {
    /// Load, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&contents)?,
            _ => Self::from_yaml(&contents)?,
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml_ng::from_str(contents)?)
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Override fields from `DOCKER_PROXY_<FIELD>` variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((_, value)) = var("LISTEN_ADDR") {
            self.listen_addr = value;
        }
        if let Some((key, value)) = var("USE_TLS") {
            self.use_tls = parse_bool(&key, &value)?;
        }
        if let Some((_, value)) = var("CERT_FILE_PATH") {
            self.cert_file_path = value;
        }
        if let Some((_, value)) = var("KEY_FILE_PATH") {
            self.key_file_path = value;
        }
        if let Some((key, value)) = var("READ_TIMEOUT_SECS") {
            self.read_timeout_secs = parse_secs(&key, &value)?;
        }
        if let Some((key, value)) = var("WRITE_TIMEOUT_SECS") {
            self.write_timeout_secs = parse_secs(&key, &value)?;
        }
        if let Some((key, value)) = var("IDLE_TIMEOUT_SECS") {
            self.idle_timeout_secs = parse_secs(&key, &value)?;
        }
        if let Some((key, value)) = var("CACHE_EVICTION_SECS") {
            self.cache_eviction_secs = parse_secs(&key, &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;

        if self.cache_eviction_secs == 0 {
            return Err(ConfigError::Invalid(
                "cache_eviction_secs must be greater than zero".to_string(),
            ));
        }

        if self.use_tls && (self.cert_file_path.trim().is_empty() || self.key_file_path.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "cert_file_path and key_file_path are required when use_tls is enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve `listen_addr`, treating a leading `:` as "all interfaces".
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = self.listen_addr.trim();
        if addr.is_empty() {
            return Err(ConfigError::Invalid("listen_addr must not be empty".to_string()));
        }

        let addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        addr.parse()
            .map_err(|e| ConfigError::Invalid(format!("listen_addr {addr:?}: {e}")))
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.write_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.idle_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_eviction_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}
