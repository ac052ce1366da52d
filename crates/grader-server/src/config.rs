//! Server configuration loaded from environment variables.

use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderName;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_CLIENT_CERT_HEADER: &str = "x-client-cert-cn";
const DEFAULT_CACHE_TTL_SECS: u64 = 60;
const DEFAULT_CACHE_JITTER_SECS: u64 = 30;
const DEFAULT_KEY_LOAD_TIMEOUT_MS: u64 = 2000;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value '{value}' for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Key cache tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Base lifetime of a cache entry.
    pub ttl: Duration,
    /// Upper bound of the random extra lifetime added per entry.
    pub jitter: Duration,
    /// Deadline for a single backing-store lookup.
    pub load_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            jitter: Duration::from_secs(DEFAULT_CACHE_JITTER_SECS),
            load_timeout: Duration::from_millis(DEFAULT_KEY_LOAD_TIMEOUT_MS),
        }
    }
}

/// Full server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub cache: CacheConfig,
    /// Header set by the TLS-terminating proxy with the client certificate CN.
    pub client_cert_header: HeaderName,
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DATABASE_URL` | required |
    /// | `BIND_ADDR` | `0.0.0.0:8080` |
    /// | `KEY_CACHE_TTL_SECS` | `60` |
    /// | `KEY_CACHE_JITTER_SECS` | `30` |
    /// | `KEY_LOAD_TIMEOUT_MS` | `2000` |
    /// | `CLIENT_CERT_HEADER` | `x-client-cert-cn` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let bind_addr = parse_var(&lookup, "BIND_ADDR", DEFAULT_BIND_ADDR)?;
        let ttl: u64 = parse_var(&lookup, "KEY_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)?;
        let jitter: u64 = parse_var(&lookup, "KEY_CACHE_JITTER_SECS", DEFAULT_CACHE_JITTER_SECS)?;
        let load_timeout: u64 =
            parse_var(&lookup, "KEY_LOAD_TIMEOUT_MS", DEFAULT_KEY_LOAD_TIMEOUT_MS)?;
        if load_timeout == 0 {
            return Err(ConfigError::Invalid {
                name: "KEY_LOAD_TIMEOUT_MS",
                value: load_timeout.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let header = lookup("CLIENT_CERT_HEADER")
            .unwrap_or_else(|| DEFAULT_CLIENT_CERT_HEADER.to_string());
        let client_cert_header = HeaderName::from_bytes(header.trim().to_ascii_lowercase().as_bytes())
            .map_err(|e| ConfigError::Invalid {
                name: "CLIENT_CERT_HEADER",
                value: header.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            database_url,
            bind_addr,
            cache: CacheConfig {
                ttl: Duration::from_secs(ttl),
                jitter: Duration::from_secs(jitter),
                load_timeout: Duration::from_millis(load_timeout),
            },
            client_cert_header,
        })
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str, default: impl Display) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(name).unwrap_or_else(|| default.to_string());
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: value.clone(),
        reason: e.to_string(),
    })
}
