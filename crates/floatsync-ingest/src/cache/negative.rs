//! Negative cache of permanently failed URLs.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct NegativeEntry {
    failed_at: Instant,
    reason: String,
}

/// URL -> (failure time, reason). Entries expire after `ttl`.
#[derive(Debug)]
pub struct NegativeCache {
    ttl: Duration,
    entries: HashMap<String, NegativeEntry>,
}

impl NegativeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Reason for a live entry. Expired entries are dropped on lookup.
    pub fn check(&mut self, url: &str, now: Instant) -> Option<String> {
        let expired = match self.entries.get(url) {
            None => return None,
            Some(entry) => now.saturating_duration_since(entry.failed_at) >= self.ttl,
        };
        if expired {
            self.entries.remove(url);
            return None;
        }
        self.entries.get(url).map(|e| e.reason.clone())
    }

    pub fn record(&mut self, url: &str, reason: impl Into<String>, now: Instant) {
        self.entries.insert(
            url.to_string(),
            NegativeEntry {
                failed_at: now,
                reason: reason.into(),
            },
        );
    }

    pub fn purge_expired(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.failed_at) < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
