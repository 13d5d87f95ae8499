//! Bounded cache of opened resources keyed by URL.
//!
//! Entries are evicted least-recently-used first whenever an insert would
//! exceed either the item bound or the byte bound, and are dropped on read
//! once older than the TTL. A second map remembers URLs that failed
//! permanently so they are not fetched again until their TTL elapses.
//!
//! All bookkeeping sits behind one mutex. Downloads and opens run without
//! holding it, so a slow fetch never blocks lookups of other URLs.

use crate::cache::downloader::Downloader;
use crate::cache::negative::NegativeCache;
use crate::config::CacheConfig;
use crate::error::{IngestError, Result};
use crate::extract::{RecordExtractor, SourceKind};
use crate::records::RecordSet;
use lru::LruCache;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A staged file decoded into records.
#[derive(Debug)]
pub struct OpenedResource {
    pub path: PathBuf,
    pub kind: SourceKind,
    pub records: RecordSet,
    /// Estimated resident size, charged against the byte bound
    pub size_bytes: u64,
}

struct CacheEntry {
    handle: Arc<OpenedResource>,
    size: u64,
    created: Instant,
    last_access: Instant,
}

struct CacheState {
    entries: LruCache<String, CacheEntry>,
    total_size: u64,
    negative: NegativeCache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub items: usize,
    pub size_bytes: u64,
    pub negative_entries: usize,
}

pub struct ResourceCache {
    downloader: Downloader,
    extractor: Arc<dyn RecordExtractor>,
    open_permits: Semaphore,
    open_timeout: Duration,
    max_items: usize,
    max_size_bytes: u64,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl ResourceCache {
    pub fn new(
        config: &CacheConfig,
        downloader: Downloader,
        extractor: Arc<dyn RecordExtractor>,
    ) -> Self {
        Self {
            downloader,
            extractor,
            open_permits: Semaphore::new(config.open_workers.max(1)),
            open_timeout: config.open_timeout,
            max_items: config.max_items.max(1),
            max_size_bytes: config.max_size_bytes,
            ttl: config.ttl,
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                total_size: 0,
                negative: NegativeCache::new(config.ttl),
            }),
        }
    }

    /// Local path for `url`, downloading it if needed.
    ///
    /// Anything that is not an `http(s)` URL is treated as a local path and
    /// returned as-is when it exists.
    pub async fn ensure_local(&self, url: &str) -> Result<PathBuf> {
        if let Some(local) = as_local_path(url) {
            if tokio::fs::try_exists(&local).await? {
                return Ok(local);
            }
            return Err(IngestError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("local file {} does not exist", local.display()),
            )));
        }

        {
            let mut state = self.state.lock().await;
            if let Some(reason) = state.negative.check(url, Instant::now()) {
                debug!(url = %url, reason = %reason, "Suppressed by negative cache");
                return Err(IngestError::NegativeCached {
                    url: url.to_string(),
                    reason,
                });
            }
        }

        match self.downloader.fetch(url).await {
            Ok(path) => Ok(path),
            Err(e) if e.is_permanent_fetch() => {
                warn!(url = %url, error = %e, "Recording permanent failure");
                self.state
                    .lock()
                    .await
                    .negative
                    .record(url, e.to_string(), Instant::now());
                Err(e)
            },
            Err(e) => Err(e),
        }
    }

    /// Opened records for `url`, from cache when fresh.
    pub async fn get_handle(&self, url: &str) -> Result<Arc<OpenedResource>> {
        if let Some(handle) = self.lookup(url).await {
            return Ok(handle);
        }

        let path = self.ensure_local(url).await?;
        let opened = Arc::new(self.open(&path).await?);
        let size = opened.size_bytes;

        if size > self.max_size_bytes {
            warn!(
                url = %url,
                size_bytes = size,
                max_size_bytes = self.max_size_bytes,
                "Resource larger than cache, returning uncached"
            );
            return Ok(opened);
        }

        let mut state = self.state.lock().await;
        if let Some(previous) = state.entries.pop(url) {
            // Lost a race with a concurrent open of the same URL.
            state.total_size = state.total_size.saturating_sub(previous.size);
        }
        self.make_room(&mut state, size);

        let now = Instant::now();
        state.entries.put(
            url.to_string(),
            CacheEntry {
                handle: Arc::clone(&opened),
                size,
                created: now,
                last_access: now,
            },
        );
        state.total_size += size;
        debug!(
            url = %url,
            size_bytes = size,
            items = state.entries.len(),
            total_bytes = state.total_size,
            "Cached resource"
        );

        Ok(opened)
    }

    /// Drop every cached handle and forget all negative entries.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        let items = state.entries.len();
        state.entries.clear();
        state.total_size = 0;
        state.negative.clear();
        info!(items = items, "Resource cache cleared");
    }

    pub async fn status(&self) -> CacheStatus {
        let mut state = self.state.lock().await;
        state.negative.purge_expired(Instant::now());
        CacheStatus {
            items: state.entries.len(),
            size_bytes: state.total_size,
            negative_entries: state.negative.len(),
        }
    }

    /// Whether `url` is cached, without touching its recency.
    pub async fn contains(&self, url: &str) -> bool {
        self.state.lock().await.entries.contains(url)
    }

    async fn lookup(&self, url: &str) -> Option<Arc<OpenedResource>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let entry = state.entries.get_mut(url)?;
        if now.saturating_duration_since(entry.created) <= self.ttl {
            entry.last_access = now;
            return Some(Arc::clone(&entry.handle));
        }

        if let Some(old) = state.entries.pop(url) {
            state.total_size = state.total_size.saturating_sub(old.size);
            debug!(
                url = %url,
                idle_ms = now.saturating_duration_since(old.last_access).as_millis() as u64,
                "Expired cached resource"
            );
        }
        None
    }

    fn make_room(&self, state: &mut CacheState, incoming: u64) {
        while state.total_size + incoming > self.max_size_bytes
            || state.entries.len() >= self.max_items
        {
            let Some((url, evicted)) = state.entries.pop_lru() else {
                break;
            };
            state.total_size = state.total_size.saturating_sub(evicted.size);
            debug!(url = %url, size_bytes = evicted.size, "Evicted resource");
        }
    }

    async fn open(&self, path: &Path) -> Result<OpenedResource> {
        let _permit = self
            .open_permits
            .acquire()
            .await
            .map_err(|_| IngestError::Config("open pool closed".to_string()))?;

        let kind = SourceKind::from_path(path);
        let records = tokio::time::timeout(self.open_timeout, self.extractor.extract(kind, path))
            .await
            .map_err(|_| IngestError::OpenTimeout {
                path: path.to_path_buf(),
                timeout: self.open_timeout,
            })?
            .map_err(|e| IngestError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let size_bytes = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);

        Ok(OpenedResource {
            path: path.to_path_buf(),
            kind,
            records,
            size_bytes,
        })
    }
}

fn as_local_path(url: &str) -> Option<PathBuf> {
    match url::Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => None,
        Ok(parsed) if parsed.scheme() == "file" => parsed.to_file_path().ok(),
        _ => Some(PathBuf::from(url)),
    }
}
