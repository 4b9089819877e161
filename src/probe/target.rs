// src/probe/target.rs
use async_trait::async_trait;
use reqwest::Client;
use sqlx::{ConnectOptions, Connection};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::DatabaseConfig;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{target} unreachable: {reason}")]
    Unreachable { target: String, reason: String },

    #[error("{target} did not answer within {after:?}")]
    Timeout { target: String, after: Duration },

    #[error("gave up after {attempts} attempts over {elapsed:?}: {last_error}")]
    BudgetExhausted {
        attempts: u32,
        elapsed: Duration,
        last_error: String,
    },

    #[error("deadline of {deadline:?} exceeded after {attempts} attempts: {last_error}")]
    DeadlineExceeded {
        deadline: Duration,
        attempts: u32,
        last_error: String,
    },
}

/// A single readiness check against one endpoint. Implementations must be
/// side-effect free: a probe may be retried any number of times.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self) -> Result<(), ProbeError>;

    /// Human-readable endpoint for logs and error messages. Never includes
    /// credentials.
    fn target(&self) -> String;
}

/// Bare TCP connect. Useful when the database driver itself is what you are
/// waiting out (DNS not yet resolvable, container port not yet open).
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn for_database(config: &DatabaseConfig) -> Self {
        Self::new(config.endpoint(), config.connect_timeout())
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        match timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(ProbeError::Unreachable {
                target: self.addr.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ProbeError::Timeout {
                target: self.addr.clone(),
                after: self.timeout,
            }),
        }
    }

    fn target(&self) -> String {
        self.addr.clone()
    }
}

/// Full database round trip: connect, authenticate, ping, disconnect. This is
/// the check the startup gate runs, because an open port does not mean the
/// server is accepting queries yet.
pub struct PostgresProbe {
    options: sqlx::postgres::PgConnectOptions,
    endpoint: String,
    timeout: Duration,
}

impl PostgresProbe {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            options: config.connect_options(),
            endpoint: format!("{}/{}", config.endpoint(), config.name),
            timeout: config.connect_timeout(),
        }
    }
}

#[async_trait]
impl Probe for PostgresProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let round_trip = async {
            let mut conn = self.options.connect().await?;
            conn.ping().await?;
            conn.close().await
        };
        match timeout(self.timeout, round_trip).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ProbeError::Unreachable {
                target: self.endpoint.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ProbeError::Timeout {
                target: self.endpoint.clone(),
                after: self.timeout,
            }),
        }
    }

    fn target(&self) -> String {
        self.endpoint.clone()
    }
}

/// HTTP GET expecting a 2xx. Used by the container health check to probe the
/// launched application from the outside.
pub struct HttpProbe {
    url: String,
    timeout: Duration,
    client: Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            url: url.into(),
            timeout,
            client,
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        match self.client.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(ProbeError::Unreachable {
                target: self.url.clone(),
                reason: format!("status {}", response.status()),
            }),
            Err(e) if e.is_timeout() => Err(ProbeError::Timeout {
                target: self.url.clone(),
                after: self.timeout,
            }),
            Err(e) => Err(ProbeError::Unreachable {
                target: self.url.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn target(&self) -> String {
        self.url.clone()
    }
}
