//! Configuration for dormd
//!
//! Sources, lowest precedence first: built-in defaults, an optional file,
//! then `DORM_`-prefixed environment variables with `__` between nested keys
//! (`DORM_CREDENTIALS__SECRET`, `DORM_STORAGE__TYPE`).

use dorm_core::{IdentityPolicy, ReservationPolicy, MIN_SECRET_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

/// Upper bound for any TTL, ten years.
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Upper bound for a reservation ceiling, one day.
const MAX_CEILING_MINUTES: u64 = 24 * 60;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DormConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub credentials: CredentialConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub reservations: ReservationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (for development/testing)
    #[default]
    Memory,

    /// PostgreSQL storage
    Postgres {
        /// Connection URL
        #[serde(default)]
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Pool acquire timeout in seconds
        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

/// Bearer credential signing
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// HMAC secret, at least 32 bytes. No default.
    #[serde(default)]
    pub secret: String,

    /// Credential lifetime in seconds
    #[serde(default = "default_week_secs")]
    pub ttl_secs: u64,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ttl_secs: default_week_secs(),
        }
    }
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("secret", &"<redacted>")
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

/// Identity lifetime and sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Identity TTL in seconds
    #[serde(default = "default_week_secs")]
    pub ttl_secs: u64,

    /// Seconds between expiry sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Keep expired identities that still own a reservation
    #[serde(default = "default_true")]
    pub sweep_protects_reservation_holders: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_week_secs(),
            sweep_interval_secs: default_sweep_interval(),
            sweep_protects_reservation_holders: true,
        }
    }
}

/// Per-kind duration ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationConfig {
    #[serde(default = "default_laundry_minutes")]
    pub laundry_max_minutes: u64,

    #[serde(default = "default_kitchen_minutes")]
    pub kitchen_max_minutes: u64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            laundry_max_minutes: default_laundry_minutes(),
            kitchen_max_minutes: default_kitchen_minutes(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_request_timeout() -> u64 {
    30
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_week_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_sweep_interval() -> u64 {
    60 * 60
}

fn default_laundry_minutes() -> u64 {
    120
}

fn default_kitchen_minutes() -> u64 {
    180
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One problem found by [`DormConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub key: &'static str,
    pub message: String,
}

impl ConfigIssue {
    pub fn new(key: &'static str, message: impl Into<String>) -> Self {
        Self {
            key,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {}", join_issues(.0))]
    Invalid(Vec<ConfigIssue>),
}

fn join_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl DormConfig {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DormConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        // Add environment variables with DORM_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("DORM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Check every value and report all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();

        if self.server.request_timeout_secs == 0 {
            issues.push(ConfigIssue::new(
                "server.request_timeout_secs",
                "must be greater than zero",
            ));
        }

        if let StorageConfig::Postgres {
            url,
            max_connections,
            ..
        } = &self.storage
        {
            if url.trim().is_empty() {
                issues.push(ConfigIssue::new(
                    "storage.url",
                    "is required when storage.type is postgres",
                ));
            }
            if *max_connections == 0 {
                issues.push(ConfigIssue::new(
                    "storage.max_connections",
                    "must be greater than zero",
                ));
            }
        }

        if self.credentials.secret.is_empty() {
            issues.push(ConfigIssue::new("credentials.secret", "is required"));
        } else if self.credentials.secret.len() < MIN_SECRET_LEN {
            issues.push(ConfigIssue::new(
                "credentials.secret",
                format!("must be at least {MIN_SECRET_LEN} bytes"),
            ));
        }

        check_ttl(&mut issues, "credentials.ttl_secs", self.credentials.ttl_secs);
        check_ttl(&mut issues, "identity.ttl_secs", self.identity.ttl_secs);

        if self.identity.sweep_interval_secs == 0 {
            issues.push(ConfigIssue::new(
                "identity.sweep_interval_secs",
                "must be greater than zero",
            ));
        }

        check_ceiling(
            &mut issues,
            "reservations.laundry_max_minutes",
            self.reservations.laundry_max_minutes,
        );
        check_ceiling(
            &mut issues,
            "reservations.kitchen_max_minutes",
            self.reservations.kitchen_max_minutes,
        );

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues))
        }
    }

    pub fn credential_ttl(&self) -> chrono::Duration {
        secs(self.credentials.ttl_secs)
    }

    pub fn identity_policy(&self) -> IdentityPolicy {
        IdentityPolicy {
            identity_ttl: secs(self.identity.ttl_secs),
            sweep_protects_reservation_holders: self.identity.sweep_protects_reservation_holders,
        }
    }

    pub fn reservation_policy(&self) -> ReservationPolicy {
        ReservationPolicy {
            laundry_max: minutes(self.reservations.laundry_max_minutes),
            kitchen_max: minutes(self.reservations.kitchen_max_minutes),
        }
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.identity.sweep_interval_secs)
    }
}

fn check_ttl(issues: &mut Vec<ConfigIssue>, key: &'static str, value: u64) {
    if value == 0 {
        issues.push(ConfigIssue::new(key, "must be greater than zero"));
    } else if value > MAX_TTL_SECS {
        issues.push(ConfigIssue::new(
            key,
            format!("must not exceed {MAX_TTL_SECS} seconds"),
        ));
    }
}

fn check_ceiling(issues: &mut Vec<ConfigIssue>, key: &'static str, value: u64) {
    if value == 0 {
        issues.push(ConfigIssue::new(key, "must be greater than zero"));
    } else if value > MAX_CEILING_MINUTES {
        issues.push(ConfigIssue::new(
            key,
            format!("must not exceed {MAX_CEILING_MINUTES} minutes"),
        ));
    }
}

fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(value.min(MAX_TTL_SECS) as i64)
}

fn minutes(value: u64) -> chrono::Duration {
    chrono::Duration::minutes(value.min(MAX_CEILING_MINUTES) as i64)
}
