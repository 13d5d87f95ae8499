//! Ingestion configuration
//!
//! Every knob is read from the environment with a default. See
//! [`IngestConfig::from_env`] for the variable names.

use crate::cache::retry::{Backoff, RetryPolicy};
use floatsync_common::env;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Data assembly centres of the Argo GDAC, in probe order.
pub const DEFAULT_ARCHIVE_ROOTS: &[&str] = &[
    "https://data-argo.ifremer.fr/dac/incois",
    "https://data-argo.ifremer.fr/dac/aoml",
    "https://data-argo.ifremer.fr/dac/coriolis",
    "https://data-argo.ifremer.fr/dac/csiro",
    "https://data-argo.ifremer.fr/dac/jma",
    "https://data-argo.ifremer.fr/dac/bodc",
    "https://data-argo.ifremer.fr/dac/kma",
    "https://data-argo.ifremer.fr/dac/meds",
    "https://data-argo.ifremer.fr/dac/kordi",
];

pub const DEFAULT_FILE_EXTENSION: &str = ".nc";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_CACHE_MAX_ITEMS: usize = 120;
pub const DEFAULT_CACHE_MAX_SIZE_BYTES: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_DOWNLOAD_WORKERS: usize = 4;
pub const DEFAULT_OPEN_WORKERS: usize = 2;
pub const DEFAULT_INGEST_WORKERS: usize = 10;
pub const DEFAULT_UNIT_RETRY_BUDGET: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Candidate roots in priority order; the first one hosting an entity wins
    pub roots: Vec<String>,
    /// Extension of data files in listings, matched case-insensitively
    pub file_extension: String,
    pub probe_timeout: Duration,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            roots: DEFAULT_ARCHIVE_ROOTS.iter().map(|s| s.to_string()).collect(),
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    /// Longest wait for any single read. A body that keeps arriving is never
    /// cut off.
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("floatsync-ingest/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub data_dir: PathBuf,
    pub max_items: usize,
    pub max_size_bytes: u64,
    /// Lifetime of cached handles and of negative-cache entries
    pub ttl: Duration,
    pub download_workers: usize,
    pub open_workers: usize,
    pub open_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            max_items: DEFAULT_CACHE_MAX_ITEMS,
            max_size_bytes: DEFAULT_CACHE_MAX_SIZE_BYTES,
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            download_workers: DEFAULT_DOWNLOAD_WORKERS,
            open_workers: DEFAULT_OPEN_WORKERS,
            open_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub workers: usize,
    /// How many times a transiently failed unit is re-queued within one run
    pub unit_retry_budget: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_INGEST_WORKERS,
            unit_retry_budget: DEFAULT_UNIT_RETRY_BUDGET,
        }
    }
}

/// Main ingestion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    pub archive: ArchiveConfig,
    pub http: HttpConfig,
    pub cache: CacheConfig,
    pub pool: PoolConfig,
    /// External record extractor executable
    pub extractor_cmd: Option<String>,
}

impl IngestConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `INGEST_ARCHIVE_ROOTS` | GDAC centres, comma separated |
    /// | `INGEST_FILE_EXTENSION` | `.nc` |
    /// | `INGEST_DATA_DIR` | `./data` |
    /// | `INGEST_PROBE_TIMEOUT_SECS` | 5 |
    /// | `INGEST_CONNECT_TIMEOUT_SECS` | 5 |
    /// | `INGEST_REQUEST_TIMEOUT_SECS` | 30 |
    /// | `INGEST_OPEN_TIMEOUT_SECS` | 60 |
    /// | `INGEST_DOWNLOAD_MAX_ATTEMPTS` | 3 |
    /// | `INGEST_RETRY_BASE_DELAY_MS` | 500 |
    /// | `INGEST_RETRY_MAX_DELAY_MS` | 30000 |
    /// | `INGEST_RETRY_BACKOFF` | linear |
    /// | `INGEST_DOWNLOAD_WORKERS` | 4 |
    /// | `INGEST_OPEN_WORKERS` | 2 |
    /// | `INGEST_WORKERS` | 10 |
    /// | `INGEST_UNIT_RETRY_BUDGET` | 2 |
    /// | `INGEST_CACHE_MAX_ITEMS` | 120 |
    /// | `INGEST_CACHE_MAX_SIZE` | 1GiB |
    /// | `INGEST_CACHE_TTL_SECS` | 3600 |
    /// | `INGEST_EXTRACTOR_CMD` | unset |
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let archive = ArchiveConfig {
            roots: env::list_or("INGEST_ARCHIVE_ROOTS", DEFAULT_ARCHIVE_ROOTS),
            file_extension: env::parsed_or(
                "INGEST_FILE_EXTENSION",
                defaults.archive.file_extension.clone(),
            )?,
            probe_timeout: secs("INGEST_PROBE_TIMEOUT_SECS", defaults.archive.probe_timeout)?,
        };

        let http = HttpConfig {
            connect_timeout: secs("INGEST_CONNECT_TIMEOUT_SECS", defaults.http.connect_timeout)?,
            request_timeout: secs("INGEST_REQUEST_TIMEOUT_SECS", defaults.http.request_timeout)?,
            user_agent: defaults.http.user_agent.clone(),
        };

        let retry = RetryPolicy {
            max_attempts: env::parsed_or(
                "INGEST_DOWNLOAD_MAX_ATTEMPTS",
                defaults.cache.retry.max_attempts,
            )?,
            base_delay: millis("INGEST_RETRY_BASE_DELAY_MS", defaults.cache.retry.base_delay)?,
            max_delay: millis("INGEST_RETRY_MAX_DELAY_MS", defaults.cache.retry.max_delay)?,
            backoff: env::parsed_or::<Backoff>("INGEST_RETRY_BACKOFF", Backoff::Linear)?,
        };

        let cache = CacheConfig {
            data_dir: env::parsed_or("INGEST_DATA_DIR", defaults.cache.data_dir.clone())?,
            max_items: env::parsed_or("INGEST_CACHE_MAX_ITEMS", defaults.cache.max_items)?,
            max_size_bytes: env::bytes_or("INGEST_CACHE_MAX_SIZE", defaults.cache.max_size_bytes)?,
            ttl: secs("INGEST_CACHE_TTL_SECS", defaults.cache.ttl)?,
            download_workers: env::parsed_or(
                "INGEST_DOWNLOAD_WORKERS",
                defaults.cache.download_workers,
            )?,
            open_workers: env::parsed_or("INGEST_OPEN_WORKERS", defaults.cache.open_workers)?,
            open_timeout: secs("INGEST_OPEN_TIMEOUT_SECS", defaults.cache.open_timeout)?,
            retry,
        };

        let pool = PoolConfig {
            workers: env::parsed_or("INGEST_WORKERS", defaults.pool.workers)?,
            unit_retry_budget: env::parsed_or(
                "INGEST_UNIT_RETRY_BUDGET",
                defaults.pool.unit_retry_budget,
            )?,
        };

        let config = Self {
            archive,
            http,
            cache,
            pool,
            extractor_cmd: env::string_opt("INGEST_EXTRACTOR_CMD"),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.archive.roots.is_empty() {
            anyhow::bail!("INGEST_ARCHIVE_ROOTS must list at least one root");
        }
        if self.archive.file_extension.is_empty() {
            anyhow::bail!("INGEST_FILE_EXTENSION must not be empty");
        }
        if self.archive.probe_timeout.is_zero() {
            anyhow::bail!("INGEST_PROBE_TIMEOUT_SECS must be greater than 0");
        }
        if self.http.request_timeout.is_zero() || self.http.connect_timeout.is_zero() {
            anyhow::bail!("HTTP timeouts must be greater than 0");
        }
        if self.cache.max_items == 0 {
            anyhow::bail!("INGEST_CACHE_MAX_ITEMS must be greater than 0");
        }
        if self.cache.max_size_bytes == 0 {
            anyhow::bail!("INGEST_CACHE_MAX_SIZE must be greater than 0");
        }
        if self.cache.download_workers == 0 {
            anyhow::bail!("INGEST_DOWNLOAD_WORKERS must be greater than 0");
        }
        if self.cache.open_workers == 0 {
            anyhow::bail!("INGEST_OPEN_WORKERS must be greater than 0");
        }
        if self.cache.open_timeout.is_zero() {
            anyhow::bail!("INGEST_OPEN_TIMEOUT_SECS must be greater than 0");
        }
        if self.cache.retry.max_attempts == 0 {
            anyhow::bail!("INGEST_DOWNLOAD_MAX_ATTEMPTS must be greater than 0");
        }
        if self.pool.workers == 0 {
            anyhow::bail!("INGEST_WORKERS must be greater than 0");
        }
        Ok(())
    }
}

fn secs(name: &str, default: Duration) -> anyhow::Result<Duration> {
    Ok(Duration::from_secs(env::parsed_or(name, default.as_secs())?))
}

fn millis(name: &str, default: Duration) -> anyhow::Result<Duration> {
    let ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    Ok(Duration::from_millis(env::parsed_or(name, ms)?))
}
