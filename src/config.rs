//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::dedup::{DEFAULT_CAPACITY, DEFAULT_RETENTION_SECS};
use crate::error::ConfigError;
use crate::mailbox::ImapConfig;
use crate::poller::PollerConfig;
use crate::records::creator::DEFAULT_REGION_CODE;
use crate::records::graphql::{DEFAULT_API_URL, GraphQlConfig};

/// Default port for the admin HTTP server.
pub const DEFAULT_ADMIN_PORT: u16 = 8080;

/// Dedup ledger bounds.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub retention: chrono::Duration,
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            retention: chrono::Duration::seconds(DEFAULT_RETENTION_SECS),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Everything the binary needs, read from `INTAKE_*` environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `None` when `INTAKE_IMAP_HOST` is unset; pollers are not started.
    pub imap: Option<ImapConfig>,
    pub poller: PollerConfig,
    pub dedup: DedupConfig,
    pub store_api: GraphQlConfig,
    /// Region code for phone values (`INTAKE_DEFAULT_REGION`).
    pub region_code: String,
    /// libSQL file; state is memory-only when unset.
    pub db_path: Option<PathBuf>,
    pub admin_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let poller_defaults = PollerConfig::default();
        let poller = PollerConfig {
            interval: secs_var("INTAKE_POLL_INTERVAL_SECS", poller_defaults.interval)?,
            mailbox_timeout: secs_var(
                "INTAKE_MAILBOX_TIMEOUT_SECS",
                poller_defaults.mailbox_timeout,
            )?,
            store_timeout: secs_var("INTAKE_STORE_TIMEOUT_SECS", poller_defaults.store_timeout)?,
        };

        let dedup_defaults = DedupConfig::default();
        let dedup = DedupConfig {
            retention: retention_var(
                "INTAKE_DEDUP_RETENTION_SECS",
                dedup_defaults.retention.num_seconds(),
            )?,
            capacity: capacity_var("INTAKE_DEDUP_CAPACITY", dedup_defaults.capacity)?,
        };

        let store_api = GraphQlConfig {
            api_url: std::env::var("INTAKE_STORE_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            api_version: std::env::var("INTAKE_STORE_API_VERSION").ok(),
            timeout: poller.store_timeout,
        };

        Ok(Self {
            imap: ImapConfig::from_env()?,
            poller,
            dedup,
            store_api,
            region_code: std::env::var("INTAKE_DEFAULT_REGION")
                .unwrap_or_else(|_| DEFAULT_REGION_CODE.to_string()),
            db_path: std::env::var("INTAKE_DB_PATH").ok().map(PathBuf::from),
            admin_port: parsed_var("INTAKE_ADMIN_PORT", DEFAULT_ADMIN_PORT)?,
        })
    }
}

fn parsed_var<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        Err(_) => Ok(default),
    }
}

fn secs_var(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let secs = parsed_var(key, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be at least 1 second".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}

/// A claim must outlive at least one poll cycle, or redelivered mail is
/// processed again.
fn retention_var(key: &str, default_secs: i64) -> Result<chrono::Duration, ConfigError> {
    let secs = parsed_var(key, default_secs)?;
    if secs <= 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be a positive number of seconds, got {secs}"),
        });
    }
    chrono::Duration::try_seconds(secs).ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{secs} seconds is out of range"),
    })
}

fn capacity_var(key: &str, default: usize) -> Result<usize, ConfigError> {
    let capacity = parsed_var(key, default)?;
    if capacity == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be at least 1".into(),
        });
    }
    Ok(capacity)
}
