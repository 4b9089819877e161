// src/config/models.rs
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("environment variable {var} is invalid: {reason}")]
    InvalidEnv { var: &'static str, reason: String },
}

/// Top-level configuration, assembled once at startup and passed down by
/// reference. No stage reads the process environment after this is built.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub probe: ProbeConfig,
    pub health_check: HealthCheckConfig,
    pub server: ServerConfig,
    pub migrations: MigrationsConfig,
    pub coverage: CoverageConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.probe.validate()?;
        self.health_check.validate()?;
        self.server.validate()?;
        self.coverage.validate()?;
        Ok(())
    }
}

/// Database endpoint and credentials. Maps one-to-one onto the `DB_*`
/// environment variables consumed by every deployment of this tool.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub pass: String,
    /// Per-attempt connect/ping timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            name: "app".to_string(),
            user: "postgres".to_string(),
            pass: String::new(),
            connect_timeout_ms: 5_000,
        }
    }
}

impl DatabaseConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connection parameters for sqlx. The password is attached here and
    /// nowhere else; display paths go through `endpoint()` instead.
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.name)
            .username(&self.user);
        if !self.pass.is_empty() {
            options = options.password(&self.pass);
        }
        options
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid {
                field: "database.host",
                reason: "must not be empty".to_string(),
            });
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                field: "database.port",
                reason: "must be nonzero".to_string(),
            });
        }
        if self.name.is_empty() {
            return Err(ConfigError::Invalid {
                field: "database.name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.user.is_empty() {
            return Err(ConfigError::Invalid {
                field: "database.user",
                reason: "must not be empty".to_string(),
            });
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "database.connect_timeout_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Readiness probe retry budget. `max_attempts: null` keeps retrying forever,
/// which mirrors the orchestrator behavior this tool replaces, but here it is
/// a visible configured choice rather than an implicit loop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub max_attempts: Option<u32>,
    pub deadline_secs: Option<u64>,
    pub backoff: BackoffConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            deadline_secs: None,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ProbeConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == Some(0) {
            return Err(ConfigError::Invalid {
                field: "probe.max_attempts",
                reason: "must be at least 1 (or null for unbounded)".to_string(),
            });
        }
        if self.deadline_secs == Some(0) {
            return Err(ConfigError::Invalid {
                field: "probe.deadline_secs",
                reason: "must be at least 1 (or null for no deadline)".to_string(),
            });
        }
        self.backoff.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_ms: 30_000,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "probe.backoff.base_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_ms < self.base_ms {
            return Err(ConfigError::Invalid {
                field: "probe.backoff.max_ms",
                reason: format!("must be >= base_ms ({})", self.base_ms),
            });
        }
        Ok(())
    }
}

/// Orchestrator-style health check policy: probe every `interval_ms`, each
/// probe bounded by `timeout_ms`; `retries` consecutive failures mark the
/// target unhealthy, a single success marks it healthy again.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub retries: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            timeout_ms: 3_000,
            retries: 5,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "health_check.interval_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "health_check.timeout_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retries == 0 {
            return Err(ConfigError::Invalid {
                field: "health_check.retries",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Uploaded media directory, prepared (created, write-checked) at launch.
    pub media_root: Option<PathBuf>,
    /// Collected static assets directory, prepared at launch.
    pub static_root: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            media_root: None,
            static_root: None,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.host.parse().map_err(|_| ConfigError::Invalid {
            field: "server.host",
            reason: format!("'{}' is not an IP address", self.host),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.addr()?;
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                field: "server.port",
                reason: "must be nonzero".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    pub dir: PathBuf,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("migrations"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    pub min_percent: f64,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self { min_percent: 75.0 }
    }
}

impl CoverageConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.min_percent) {
            return Err(ConfigError::Invalid {
                field: "coverage.min_percent",
                reason: format!("{} is not within 0..=100", self.min_percent),
            });
        }
        Ok(())
    }
}
