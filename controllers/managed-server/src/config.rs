//! Controller configuration.
//!
//! Read once at startup from environment variables. Parsing goes through a lookup
//! function so tests never touch the process environment.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration for the ManagedServer controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Listen address for `/metrics`, `/healthz` and `/readyz`
    pub metrics_addr: SocketAddr,
    /// Name of the server container in the Deployment
    pub container_name: String,
    /// Env var name (and secret key) injected when `secretName` is set
    pub secret_env_key: String,
    /// Total attempts per child before a conflict is reported
    pub max_conflict_retries: u32,
    /// Deadline for one reconcile attempt
    pub reconcile_timeout: Duration,
    /// Parents reconciled in parallel
    pub concurrency: u16,
    /// Share of desired replicas that must be ready to count as Running
    pub running_ready_percent: u32,
    /// First retry delay after a failed attempt
    pub backoff_base: Duration,
    /// Upper bound on the retry delay
    pub backoff_max: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            container_name: "mcp-server".to_string(),
            secret_env_key: "API_KEY".to_string(),
            max_conflict_retries: 5,
            reconcile_timeout: Duration::from_secs(30),
            concurrency: 4,
            running_ready_percent: 100,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Result<T, ControllerError>
where
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("{var}={raw:?}: {e}"))
        }),
        _ => Ok(default),
    }
}

fn string(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: String) -> String {
    lookup(var).filter(|v| !v.trim().is_empty()).unwrap_or(default)
}

impl ControllerConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Loads configuration through `lookup`, applying defaults for unset variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let defaults = Self::default();
        let config = Self {
            namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty()),
            metrics_addr: parse(&lookup, "METRICS_ADDR", defaults.metrics_addr)?,
            container_name: string(&lookup, "CONTAINER_NAME", defaults.container_name),
            secret_env_key: string(&lookup, "SECRET_ENV_KEY", defaults.secret_env_key),
            max_conflict_retries: parse(&lookup, "MAX_CONFLICT_RETRIES", defaults.max_conflict_retries)?,
            reconcile_timeout: Duration::from_secs(parse(
                &lookup,
                "RECONCILE_TIMEOUT_SECS",
                defaults.reconcile_timeout.as_secs(),
            )?),
            concurrency: parse(&lookup, "RECONCILE_CONCURRENCY", defaults.concurrency)?,
            running_ready_percent: parse(&lookup, "RUNNING_READY_PERCENT", defaults.running_ready_percent)?,
            backoff_base: Duration::from_secs(parse(&lookup, "BACKOFF_BASE_SECS", defaults.backoff_base.as_secs())?),
            backoff_max: Duration::from_secs(parse(&lookup, "BACKOFF_MAX_SECS", defaults.backoff_max.as_secs())?),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.max_conflict_retries == 0 {
            return Err(ControllerError::InvalidConfig("MAX_CONFLICT_RETRIES must be at least 1".to_string()));
        }
        if self.reconcile_timeout.is_zero() {
            return Err(ControllerError::InvalidConfig("RECONCILE_TIMEOUT_SECS must be at least 1".to_string()));
        }
        if self.concurrency == 0 {
            return Err(ControllerError::InvalidConfig("RECONCILE_CONCURRENCY must be at least 1".to_string()));
        }
        if !(1..=100).contains(&self.running_ready_percent) {
            return Err(ControllerError::InvalidConfig("RUNNING_READY_PERCENT must be within 1..=100".to_string()));
        }
        if self.backoff_base.is_zero() || self.backoff_base > self.backoff_max {
            return Err(ControllerError::InvalidConfig(
                "BACKOFF_BASE_SECS must be positive and not exceed BACKOFF_MAX_SECS".to_string(),
            ));
        }
        Ok(())
    }
}
