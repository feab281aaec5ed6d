//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use chrono::TimeDelta;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;

use crate::federation::{SchemeSet, UnknownScheme};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub federation: FederationConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "social.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://social.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Federation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// User-Agent sent on outgoing requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Allow actor fetches to loopback/private addresses
    #[serde(default)]
    pub allow_private_ip: bool,
    pub max_redirects: usize,
    pub fetch_timeout_seconds: u64,
    /// Inbox routes; `{identifier}` becomes a path parameter
    pub inbox_paths: Vec<String>,
    /// Outbox routes, verified and dispatched like inboxes
    #[serde(default)]
    pub outbox_paths: Vec<String>,
    /// Schemes applied to outgoing requests
    pub sign_with: Vec<String>,
    /// Allowed distance between Date/created and now
    pub max_clock_skew_seconds: u64,
}

fn default_user_agent() -> String {
    format!("fedisig/{}", env!("CARGO_PKG_VERSION"))
}

impl FederationConfig {
    /// Requested schemes, built fresh for each call
    pub fn scheme_set(&self) -> Result<SchemeSet, UnknownScheme> {
        SchemeSet::parse(&self.sign_with)
    }

    pub fn max_clock_skew(&self) -> Duration {
        Duration::from_secs(self.max_clock_skew_seconds)
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            allow_private_ip: false,
            max_redirects: 5,
            fetch_timeout_seconds: 30,
            inbox_paths: vec!["/inbox".to_string()],
            outbox_paths: Vec::new(),
            sign_with: vec!["draft-cavage".to_string()],
            max_clock_skew_seconds: 300,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Actor key TTL in seconds (default: 3600); zero or negative disables storing
    pub signature_key_ttl_seconds: i64,
    /// Maximum cached actor keys (default: 1000); 0 removes the ceiling
    pub signature_max_entries: usize,
}

impl CacheConfig {
    /// Actor key TTL, or a `Config` error when chrono cannot represent it
    pub fn signature_key_ttl(&self) -> Result<TimeDelta, crate::error::AppError> {
        TimeDelta::try_seconds(self.signature_key_ttl_seconds).ok_or_else(|| {
            crate::error::AppError::Config(format!(
                "cache.signature_key_ttl_seconds is out of range: {}",
                self.signature_key_ttl_seconds
            ))
        })
    }

    pub fn signature_max_entries(&self) -> Option<usize> {
        (self.signature_max_entries > 0).then_some(self.signature_max_entries)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            signature_key_ttl_seconds: 3600,
            signature_max_entries: 1000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FEDISIG_*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.domain", "localhost")?
            .set_default("server.protocol", "http")?
            .set_default("federation.user_agent", default_user_agent())?
            .set_default("federation.allow_private_ip", false)?
            .set_default("federation.max_redirects", 5)?
            .set_default("federation.fetch_timeout_seconds", 30)?
            .set_default("federation.inbox_paths", vec!["/inbox"])?
            .set_default("federation.sign_with", vec!["draft-cavage"])?
            .set_default("federation.max_clock_skew_seconds", 300)?
            .set_default("cache.signature_key_ttl_seconds", 3600)?
            .set_default("cache.signature_max_entries", 1000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (FEDISIG_*)
            .add_source(
                Environment::with_prefix("FEDISIG")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("federation.inbox_paths")
                    .with_list_parse_key("federation.outbox_paths")
                    .with_list_parse_key("federation.sign_with")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.server.port == 0 {
            return Err(crate::error::AppError::Config(
                "server.port must be greater than 0".to_string(),
            ));
        }

        let protocol = self.server.protocol.to_ascii_lowercase();
        if protocol != "http" && protocol != "https" {
            return Err(crate::error::AppError::Config(format!(
                "server.protocol must be http or https, got {}",
                self.server.protocol
            )));
        }

        if protocol == "http" {
            if is_local_server_domain(&self.server.domain) {
                tracing::warn!(
                    host = %normalized_server_host(&self.server.domain),
                    "Serving federation endpoints over plain http for local development"
                );
            } else {
                return Err(crate::error::AppError::Config(
                    "server.protocol must be https for non-local server domains".to_string(),
                ));
            }
        }

        self.federation
            .scheme_set()
            .map_err(|e| crate::error::AppError::Config(format!("federation.sign_with: {}", e)))?;

        if self.federation.inbox_paths.is_empty() {
            return Err(crate::error::AppError::Config(
                "federation.inbox_paths must not be empty".to_string(),
            ));
        }
        for (key, paths) in [
            ("federation.inbox_paths", &self.federation.inbox_paths),
            ("federation.outbox_paths", &self.federation.outbox_paths),
        ] {
            if let Some(path) = paths.iter().find(|path| !path.starts_with('/')) {
                return Err(crate::error::AppError::Config(format!(
                    "{} entries must start with '/': {}",
                    key, path
                )));
            }
        }
        if let Some(path) = self
            .federation
            .outbox_paths
            .iter()
            .find(|path| self.federation.inbox_paths.contains(path))
        {
            return Err(crate::error::AppError::Config(format!(
                "federation.outbox_paths entry is also an inbox path: {}",
                path
            )));
        }

        if self.federation.max_clock_skew_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "federation.max_clock_skew_seconds must be greater than 0".to_string(),
            ));
        }

        self.cache.signature_key_ttl()?;
        if self.cache.signature_key_ttl_seconds <= 0 {
            tracing::warn!("cache.signature_key_ttl_seconds is not positive; actor keys will not be cached");
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            domain: "localhost".to_string(),
            protocol: "http".to_string(),
        },
        federation: FederationConfig::default(),
        cache: CacheConfig::default(),
        logging: LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}
