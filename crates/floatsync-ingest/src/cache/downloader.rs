//! Staging of remote files on local disk.
//!
//! A URL maps to a fixed path under the data directory, so a file that is
//! already staged is never fetched again. Writes go to a `.part` sibling and
//! are renamed into place once complete.

use crate::cache::retry::RetryPolicy;
use crate::error::{IngestError, Result};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

pub struct Downloader {
    client: Client,
    data_dir: PathBuf,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
}

impl Downloader {
    pub fn new(client: Client, data_dir: PathBuf, retry: RetryPolicy, workers: usize) -> Self {
        Self {
            client,
            data_dir,
            retry,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Local path that `url` is staged to.
    pub fn staging_path(&self, url: &str) -> Result<PathBuf> {
        let parsed = Url::parse(url)
            .map_err(|e| IngestError::Config(format!("invalid URL '{}': {}", url, e)))?;

        let mut path = self.data_dir.clone();
        path.push(sanitize_segment(parsed.host_str().unwrap_or("local")));
        if let Some(port) = parsed.port() {
            path.push(port.to_string());
        }

        let mut segments = 0;
        for segment in parsed.path_segments().into_iter().flatten() {
            if segment.is_empty() {
                continue;
            }
            path.push(sanitize_segment(segment));
            segments += 1;
        }
        if segments == 0 {
            return Err(IngestError::Config(format!("URL '{}' has no file name", url)));
        }
        Ok(path)
    }

    /// Download `url` unless it is already staged, retrying transient failures.
    ///
    /// 404/403 fail immediately as [`IngestError::PermanentFetch`]. Running
    /// out of attempts on transient failures also ends as `PermanentFetch`.
    pub async fn fetch(&self, url: &str) -> Result<PathBuf> {
        let target = self.staging_path(url)?;
        if is_staged(&target).await {
            debug!(url = %url, path = %target.display(), "Already staged");
            return Ok(target);
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| IngestError::Config("download pool closed".to_string()))?;

        // Another task may have staged it while we waited for a permit.
        if is_staged(&target).await {
            return Ok(target);
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.try_fetch(url, &target).await {
                Ok(bytes) => {
                    info!(url = %url, bytes = bytes, attempt = attempt, "Downloaded");
                    return Ok(target);
                },
                Err(e) if e.is_transient() => {
                    if attempt < max_attempts {
                        let delay = self.retry.delay_after(attempt);
                        warn!(
                            url = %url,
                            attempt = attempt,
                            max_attempts = max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Download failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(e);
                },
                Err(e) => return Err(e),
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        Err(IngestError::PermanentFetch {
            url: url.to_string(),
            reason: format!("gave up after {} attempts: {}", max_attempts, reason),
        })
    }

    async fn try_fetch(&self, url: &str, target: &Path) -> Result<u64> {
        let transient = |message: String| IngestError::TransientNetwork {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN {
            return Err(IngestError::PermanentFetch {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }
        if !status.is_success() {
            return Err(transient(format!("HTTP {}", status)));
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(target);
        match write_staged(response, url, &partial, target).await {
            Ok(written) => Ok(written),
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(
                            path = %partial.display(),
                            error = %cleanup,
                            "Failed to remove partial download"
                        );
                    }
                }
                Err(e)
            },
        }
    }
}

/// Stream the body into `partial`, then rename it over `target`.
async fn write_staged(
    response: reqwest::Response,
    url: &str,
    partial: &Path,
    target: &Path,
) -> Result<u64> {
    let mut file = fs::File::create(partial).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| IngestError::TransientNetwork {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    drop(file);
    fs::rename(partial, target).await?;
    Ok(written)
}

/// The final path only ever appears through a completed rename, so any file
/// there (even an empty one) is a finished download.
async fn is_staged(path: &Path) -> bool {
    matches!(fs::metadata(path).await, Ok(meta) if meta.is_file())
}

static PARTIAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Unique per call, so two tasks staging the same URL never share a file.
fn partial_path(target: &Path) -> PathBuf {
    let seq = PARTIAL_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = target.as_os_str().to_owned();
    name.push(format!(".{}.{}.part", std::process::id(), seq));
    PathBuf::from(name)
}

fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
