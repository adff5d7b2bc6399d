//! Server configuration read from the environment.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DATABASE_URL` | `postgres://localhost/folio` | PostgreSQL connection string |
//! | `HOST` | `0.0.0.0` | Bind address |
//! | `PORT` | `3000` | Bind port |
//! | `FILE_STORAGE_PATH` | `/var/lib/folio/files` | Object storage root |
//! | `MAX_UPLOAD_BYTES` | `52428800` | Largest accepted upload |
//! | `ALLOWED_ORIGINS` | (empty) | Comma-separated CORS origins |
//! | `JOB_QUEUE_ENABLED` | `true` | Use the durable queue when it answers a probe |
//! | `JOB_MAX_ATTEMPTS` | `3` | Attempts per extraction job |
//! | `JOB_BACKOFF_BASE_MS` | `2000` | Base of the exponential retry delay |
//! | `JOB_TIMEOUT_SECS` | `300` | Time limit for one queued attempt |
//!
//! Worker settings (`JOB_WORKER_ENABLED`, `JOB_MAX_CONCURRENT`,
//! `JOB_POLL_INTERVAL_MS`, `JOB_STALE_CLAIM_SECS`) are read by
//! [`folio_jobs::WorkerConfig::from_env`].
//! Logging settings are read by [`LogConfig::from_env`].

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use folio_core::{defaults, EnqueueOptions};

/// Everything the binary needs to wire collaborators and serve.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub file_storage_path: String,
    pub max_upload_bytes: i64,
    pub allowed_origins: Vec<String>,
    pub job_queue_enabled: bool,
    pub job_max_attempts: i32,
    pub job_backoff_base_ms: u64,
    pub job_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/folio".to_string(),
            host: "0.0.0.0".to_string(),
            port: defaults::SERVER_PORT,
            file_storage_path: defaults::FILE_STORAGE_PATH.to_string(),
            max_upload_bytes: defaults::MAX_UPLOAD_BYTES,
            allowed_origins: Vec::new(),
            job_queue_enabled: true,
            job_max_attempts: defaults::JOB_MAX_ATTEMPTS,
            job_backoff_base_ms: defaults::JOB_BACKOFF_BASE_MS,
            job_timeout_secs: defaults::JOB_TIMEOUT_SECS,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    value == "true" || value == "1"
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or unparsable values keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parsed(&lookup, "PORT").unwrap_or(defaults.port),
            file_storage_path: lookup("FILE_STORAGE_PATH").unwrap_or(defaults.file_storage_path),
            max_upload_bytes: parsed(&lookup, "MAX_UPLOAD_BYTES")
                .filter(|n: &i64| *n > 0)
                .unwrap_or(defaults.max_upload_bytes),
            allowed_origins: lookup("ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            job_queue_enabled: lookup("JOB_QUEUE_ENABLED")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.job_queue_enabled),
            job_max_attempts: parsed(&lookup, "JOB_MAX_ATTEMPTS")
                .filter(|n: &i32| *n >= 1)
                .unwrap_or(defaults.job_max_attempts),
            job_backoff_base_ms: parsed(&lookup, "JOB_BACKOFF_BASE_MS")
                .unwrap_or(defaults.job_backoff_base_ms),
            job_timeout_secs: parsed(&lookup, "JOB_TIMEOUT_SECS")
                .filter(|n: &u64| *n > 0)
                .unwrap_or(defaults.job_timeout_secs),
        }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    pub fn enqueue_options(&self) -> EnqueueOptions {
        EnqueueOptions {
            max_attempts: self.job_max_attempts,
            backoff_base_ms: self.job_backoff_base_ms,
        }
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Request body ceiling: the upload limit plus room for headers of
    /// JSON bodies.
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_upload_bytes)
            .unwrap_or(usize::MAX)
            .saturating_add(64 * 1024)
    }
}

/// Log output settings.
///
/// `LOG_FORMAT` is `json` or `text`; `LOG_FILE` enables daily-rotated file
/// output; `LOG_ANSI` overrides colour detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub file: Option<String>,
    pub ansi: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let format = match lookup("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        Self {
            format,
            file: lookup("LOG_FILE").filter(|p| !p.trim().is_empty()),
            ansi: lookup("LOG_ANSI").map(|v| parse_flag(&v)),
        }
    }
}
