//! Per-entity and multi-entity synchronisation.
//!
//! One entity goes through locate, list, resolve and delta, then its
//! sibling data is written and the pending cycles are handed to the pool.
//! Entities are processed one after another; an entity that cannot be found
//! or listed is skipped without affecting the others.

use crate::archive::{resolve, ArchiveLocator, FileLister};
use crate::cache::{Downloader, ResourceCache};
use crate::config::{IngestConfig, PoolConfig};
use crate::delta::pending_cycles;
use crate::error::{IngestError, Result};
use crate::extract::RecordExtractor;
use crate::pool::{IngestionPool, IngestionUnit, RunSummary};
use crate::siblings::load_entity_records;
use crate::store::CycleStore;
use chrono::{DateTime, Utc};
use floatsync_common::{CycleKey, EntityId};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// An entity left out of a run, and why.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedEntity {
    pub entity: String,
    pub kind: &'static str,
    pub reason: String,
}

/// Aggregate of every entity processed in one invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub entities: Vec<RunSummary>,
    pub skipped: Vec<SkippedEntity>,
    /// Entities never started because the run was cancelled
    pub not_started: usize,
    pub cancelled: bool,
    pub summary_refreshed: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
}

impl SyncReport {
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    pub fn succeeded(&self) -> usize {
        self.entities.iter().map(RunSummary::succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.entities.iter().map(RunSummary::failed).sum()
    }

    pub fn duplicate_skipped(&self) -> usize {
        self.entities.iter().map(|s| s.duplicate_skipped).sum()
    }

    pub fn log(&self) {
        info!(
            entities = self.entities.len(),
            skipped_entities = self.skipped.len(),
            not_started = self.not_started,
            cycles_persisted = self.succeeded(),
            duplicates = self.duplicate_skipped(),
            cycles_failed = self.failed(),
            cancelled = self.cancelled,
            duration_secs = self.duration_secs,
            "Sync report"
        );
        for skipped in &self.skipped {
            warn!(
                entity = %skipped.entity,
                kind = skipped.kind,
                reason = %skipped.reason,
                "Entity skipped"
            );
        }
    }
}

/// Everything needed to bring entities up to date.
pub struct EntitySync {
    locator: ArchiveLocator,
    lister: FileLister,
    cache: Arc<ResourceCache>,
    store: Arc<dyn CycleStore>,
    pool: PoolConfig,
    cancel: CancellationToken,
}

impl EntitySync {
    pub fn new(
        locator: ArchiveLocator,
        lister: FileLister,
        cache: Arc<ResourceCache>,
        store: Arc<dyn CycleStore>,
        pool: PoolConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            locator,
            lister,
            cache,
            store,
            pool,
            cancel,
        }
    }

    /// Build locator, lister, downloader and cache from `config`, sharing
    /// one HTTP client.
    pub fn from_config(
        config: &IngestConfig,
        client: Client,
        extractor: Arc<dyn RecordExtractor>,
        store: Arc<dyn CycleStore>,
        cancel: CancellationToken,
    ) -> Self {
        let locator = ArchiveLocator::new(
            client.clone(),
            config.archive.roots.clone(),
            config.archive.probe_timeout,
        );
        let lister = FileLister::new(client.clone(), config.archive.file_extension.clone());
        let downloader = Downloader::new(
            client,
            config.cache.data_dir.clone(),
            config.cache.retry.clone(),
            config.cache.download_workers,
        );
        let cache = Arc::new(ResourceCache::new(&config.cache, downloader, extractor));

        Self::new(locator, lister, cache, store, config.pool.clone(), cancel)
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    /// Ingest every cycle of `entity` that is upstream but not yet stored.
    ///
    /// Errors are entity-level (not found, listing unavailable, delta read
    /// failed). Per-cycle failures are reported in the summary.
    pub async fn sync_entity(&self, entity: &EntityId) -> Result<RunSummary> {
        let mut summary = RunSummary::new(entity.as_str());

        let layout = self.locator.locate(entity).await?;
        let files = self.lister.list(&layout).await?;
        let resolved = resolve(&files);
        summary.discovered = resolved.len();

        let pending = pending_cycles(self.store.as_ref(), entity, &resolved).await?;
        summary.pending = pending.len();

        if pending.is_empty() {
            info!(entity = %entity, cycles = resolved.len(), "Entity up to date");
            summary.complete();
            return Ok(summary);
        }
        if self.cancel.is_cancelled() {
            summary.not_started = pending.len();
            summary.complete();
            return Ok(summary);
        }

        let entity_records = load_entity_records(&self.cache, &layout).await;
        if !entity_records.is_empty() {
            if let Err(e) = self
                .store
                .persist_entity_records(entity, &entity_records)
                .await
            {
                warn!(entity = %entity, error = %e, "Failed to write entity-level records");
            }
        }
        let platform = entity_records.platform().cloned().map(Arc::new);

        let units: Vec<IngestionUnit> = pending
            .into_iter()
            .map(|(cycle, file)| {
                let url = layout.profile_file_url(&file.name);
                IngestionUnit::new(CycleKey::new(entity.clone(), cycle), file, url)
                    .with_platform(platform.clone())
            })
            .collect();

        let pool = IngestionPool::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.store),
            self.pool.workers,
            self.pool.unit_retry_budget,
            self.cancel.clone(),
        );
        pool.run(units, &mut summary).await;
        summary.complete();

        info!(
            entity = %entity,
            pending = summary.pending,
            persisted = summary.persisted,
            duplicates = summary.duplicate_skipped,
            failed = summary.failed(),
            not_started = summary.not_started,
            duration_secs = summary.duration_secs,
            "Entity sync finished"
        );
        Ok(summary)
    }

    /// Sync `entities` in order. Entity-level failures skip that entity only.
    pub async fn sync_entities(&self, entities: &[EntityId]) -> SyncReport {
        let mut report = SyncReport::new();

        for (index, entity) in entities.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                report.not_started = entities.len() - index;
                warn!(remaining = report.not_started, "Cancelled, entities not started");
                break;
            }

            match self.sync_entity(entity).await {
                Ok(summary) => report.entities.push(summary),
                Err(e) => {
                    match &e {
                        IngestError::NoArchiveFound { .. }
                        | IngestError::ListingUnavailable { .. } => {
                            warn!(entity = %entity, error = %e, "Skipping entity");
                        },
                        _ => error!(entity = %entity, kind = e.kind(), error = %e, "Entity sync failed"),
                    }
                    report.skipped.push(SkippedEntity {
                        entity: entity.to_string(),
                        kind: e.kind(),
                        reason: e.to_string(),
                    });
                },
            }
        }

        report.cancelled |= self.cancel.is_cancelled();
        report.complete();
        report
    }

    /// Sync every entity already in the store, then refresh the summary view.
    pub async fn update_all(&self) -> Result<SyncReport> {
        let entities = self.store.active_entities().await?;
        info!(entities = entities.len(), "Updating all known entities");

        let mut report = self.sync_entities(&entities).await;

        if report.cancelled {
            warn!("Run cancelled, summary view not refreshed");
        } else {
            match self.store.refresh_summary().await {
                Ok(()) => report.summary_refreshed = true,
                Err(e) => error!(error = %e, "Failed to refresh summary view"),
            }
        }
        Ok(report)
    }
}
