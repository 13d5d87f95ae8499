//! Shared fixtures for floatsync-ingest integration tests
//!
//! - [`FakeArchive`]: a wiremock server laid out like an archive root
//! - [`MemoryStore`]: an in-memory [`CycleStore`] with the same idempotence
//!   rules as the Postgres writer
//! - [`JsonFileExtractor`]: decodes staged files that already hold a
//!   serialised [`RecordSet`]
//! - [`TestPostgres`]: a throwaway Postgres container with migrations applied

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use floatsync_common::{CycleNumber, EntityId};
use floatsync_ingest::cache::RetryPolicy;
use floatsync_ingest::config::IngestConfig;
use floatsync_ingest::extract::{check_kind, ExtractError, RecordExtractor, SourceKind};
use floatsync_ingest::records::{
    EntityRecords, Measurement, MetadataRecords, PlatformMetadata, ProfileRecords, RecordSet,
    TechRecord,
};
use floatsync_ingest::store::{CycleStore, CycleWrite, EntityWriteStats, PersistOutcome};
use floatsync_ingest::sync::EntitySync;
use floatsync_ingest::IngestError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const DAC: &str = "/dac/aoml";

// ============================================================================
// Records
// ============================================================================

/// A valid profile with `levels` measurements.
pub fn profile(cycle: CycleNumber, levels: usize) -> ProfileRecords {
    ProfileRecords {
        profile_number: Some(cycle as i32),
        latitude: Some(-30.5 + cycle as f64 / 10.0),
        longitude: Some(150.25),
        pres: (0..levels).map(|l| Some(l as f64 * 10.0)).collect(),
        temp: (0..levels).map(|l| Some(20.0 - l as f64)).collect(),
        measurements: (0..levels)
            .map(|l| Measurement {
                depth_m: Some(l as f64 * 10.0),
                sensor: "TEMP".to_string(),
                value: Some(20.0 - l as f64),
                qc: Some("1".to_string()),
            })
            .collect(),
        ..Default::default()
    }
}

pub fn profile_name(entity: &str, cycle: CycleNumber) -> String {
    format!("R{}_{:03}.nc", entity, cycle)
}

// ============================================================================
// Fake archive
// ============================================================================

pub struct FakeArchive {
    pub server: MockServer,
}

impl FakeArchive {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn root(&self) -> String {
        format!("{}{}", self.server.uri(), DAC)
    }

    pub fn file_url(&self, entity: &str, name: &str) -> String {
        format!("{}/{}/profiles/{}", self.root(), entity, name)
    }

    /// Answer the existence probe for `entity`.
    pub async fn host(&self, entity: &str) {
        Mock::given(method("HEAD"))
            .and(path(format!("{}/{}/", DAC, entity)))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.server)
            .await;
    }

    /// Serve an HTML listing linking `names`.
    pub async fn listing(&self, entity: &str, names: &[String]) {
        let links: String = names
            .iter()
            .map(|n| format!("<a href=\"{n}\">{n}</a>\n"))
            .collect();
        let body = format!(
            "<html><body><h1>Index of {DAC}/{entity}/profiles</h1>\n\
             <a href=\"../\">Parent Directory</a>\n{links}</body></html>"
        );
        Mock::given(method("GET"))
            .and(path(format!("{}/{}/profiles/", DAC, entity)))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Serve `records` as the body of one file; `expect` pins the hit count.
    pub async fn file(&self, entity: &str, name: &str, records: &RecordSet, expect: Option<u64>) {
        let body = serde_json::to_string(records).unwrap_or_default();
        let mock = Mock::given(method("GET"))
            .and(path(format!("{}/{}/profiles/{}", DAC, entity, name)))
            .respond_with(ResponseTemplate::new(200).set_body_string(body));
        match expect {
            Some(n) => mock.expect(n).mount(&self.server).await,
            None => mock.mount(&self.server).await,
        }
    }

    pub async fn status(&self, entity: &str, name: &str, status: u16, expect: Option<u64>) {
        let mock = Mock::given(method("GET"))
            .and(path(format!("{}/{}/profiles/{}", DAC, entity, name)))
            .respond_with(ResponseTemplate::new(status));
        match expect {
            Some(n) => mock.expect(n).mount(&self.server).await,
            None => mock.mount(&self.server).await,
        }
    }

    /// Serve the entity metadata sibling file.
    pub async fn metadata(&self, entity: &str, platform: PlatformMetadata) {
        let records = RecordSet::Metadata(MetadataRecords {
            platform,
            attributes: vec![],
        });
        Mock::given(method("GET"))
            .and(path(format!("{}/{}/{}_meta.nc", DAC, entity, entity)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(serde_json::to_string(&records).unwrap_or_default()),
            )
            .mount(&self.server)
            .await;
    }

    /// Serve the entity technical sibling file.
    pub async fn tech(&self, entity: &str, records: Vec<TechRecord>) {
        let body = serde_json::to_string(&RecordSet::Technical { records }).unwrap_or_default();
        Mock::given(method("GET"))
            .and(path(format!("{}/{}/{}_tech.nc", DAC, entity, entity)))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Host `entity` with one real-time profile per cycle.
    pub async fn entity_with_cycles(&self, entity: &str, cycles: &[CycleNumber], levels: usize) {
        self.host(entity).await;
        let names: Vec<String> = cycles.iter().map(|c| profile_name(entity, *c)).collect();
        self.listing(entity, &names).await;
        for (cycle, name) in cycles.iter().zip(&names) {
            self.file(entity, name, &RecordSet::Profile(profile(*cycle, levels)), None)
                .await;
        }
    }
}

// ============================================================================
// Extractor
// ============================================================================

/// Staged files hold JSON record sets; decode them as the real extractor's
/// stdout would be decoded.
pub struct JsonFileExtractor;

#[async_trait]
impl RecordExtractor for JsonFileExtractor {
    async fn extract(
        &self,
        kind: SourceKind,
        path: &Path,
    ) -> std::result::Result<RecordSet, ExtractError> {
        let bytes = tokio::fs::read(path).await?;
        let records: RecordSet = serde_json::from_slice(&bytes)?;
        check_kind(kind, &records)?;
        records.validate().map_err(ExtractError::Invalid)?;
        Ok(records)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryState {
    pub floats: BTreeMap<(String, CycleNumber), PlatformMetadata>,
    pub profiles: BTreeMap<(String, CycleNumber), String>,
    pub measurements: BTreeMap<(String, CycleNumber, Option<i32>), u64>,
    pub meta_entities: BTreeSet<String>,
    pub meta_rows: u64,
    /// Rows per (entity, cycle) group, one entry per group written
    pub tech_groups: BTreeMap<(String, Option<CycleNumber>), u64>,
    pub trajectory_groups: BTreeMap<(String, Option<CycleNumber>), u64>,
    pub summary_refreshes: usize,
}

impl MemoryState {
    /// Total rows across all tables, as `COUNT(*)` would report.
    pub fn row_count(&self) -> u64 {
        self.floats.len() as u64
            + self.profiles.len() as u64
            + self.measurements.values().sum::<u64>()
            + self.meta_rows
            + self.tech_groups.values().sum::<u64>()
            + self.trajectory_groups.values().sum::<u64>()
    }
}

/// Write the per-cycle groups of `rows` that are not stored yet.
/// Returns `(inserted_rows, skipped_groups)`.
fn insert_groups<T>(
    stored: &mut BTreeMap<(String, Option<CycleNumber>), u64>,
    entity: &str,
    rows: &[T],
    cycle_of: impl Fn(&T) -> Option<CycleNumber>,
) -> (u64, u64) {
    let mut incoming: BTreeMap<Option<CycleNumber>, u64> = BTreeMap::new();
    for row in rows {
        *incoming.entry(cycle_of(row)).or_default() += 1;
    }

    let (mut inserted, mut skipped) = (0, 0);
    for (cycle, count) in incoming {
        let key = (entity.to_string(), cycle);
        if stored.contains_key(&key) {
            skipped += 1;
        } else {
            stored.insert(key, count);
            inserted += count;
        }
    }
    (inserted, skipped)
}

type PersistHook = Box<dyn Fn(CycleNumber) + Send + Sync>;

#[derive(Default)]
pub struct MemoryStore {
    pub state: Mutex<MemoryState>,
    pub persist_calls: AtomicUsize,
    fail_cycles: BTreeSet<CycleNumber>,
    on_persist: Option<PersistHook>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `persist_cycle` for these cycles fails like a database error.
    pub fn failing(cycles: &[CycleNumber]) -> Self {
        Self {
            fail_cycles: cycles.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Run `hook` after each successful cycle write.
    pub fn with_hook(hook: impl Fn(CycleNumber) + Send + Sync + 'static) -> Self {
        Self {
            on_persist: Some(Box::new(hook)),
            ..Self::default()
        }
    }

    /// Mark cycles as already persisted.
    pub fn seed(&self, entity: &str, cycles: &[CycleNumber]) {
        let mut state = self.state.lock().unwrap();
        for cycle in cycles {
            state
                .floats
                .insert((entity.to_string(), *cycle), PlatformMetadata::default());
        }
    }

    pub fn row_count(&self) -> u64 {
        self.state.lock().unwrap().row_count()
    }

    pub fn cycles(&self, entity: &str) -> Vec<CycleNumber> {
        self.state
            .lock()
            .unwrap()
            .floats
            .keys()
            .filter(|(e, _)| e == entity)
            .map(|(_, c)| *c)
            .collect()
    }

    pub fn platform(&self, entity: &str, cycle: CycleNumber) -> Option<PlatformMetadata> {
        self.state
            .lock()
            .unwrap()
            .floats
            .get(&(entity.to_string(), cycle))
            .cloned()
    }
}

#[async_trait]
impl CycleStore for MemoryStore {
    async fn persisted_cycles(
        &self,
        entity: &EntityId,
    ) -> floatsync_ingest::Result<BTreeSet<CycleNumber>> {
        Ok(self.cycles(entity.as_str()).into_iter().collect())
    }

    async fn persist_cycle(&self, write: CycleWrite<'_>) -> floatsync_ingest::Result<PersistOutcome> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        // Let other units interleave with this one.
        tokio::task::yield_now().await;

        if self.fail_cycles.contains(&write.key.cycle) {
            return Err(IngestError::Persistence(sqlx::Error::PoolTimedOut));
        }

        let entity = write.key.entity.to_string();
        let cycle = write.key.cycle;
        let outcome = {
            let mut state = self.state.lock().unwrap();

            let incoming = match write.platform {
                Some(fallback) => write.profile.platform.or(fallback),
                None => write.profile.platform.clone(),
            };
            let stored = state.floats.entry((entity.clone(), cycle)).or_default();
            *stored = incoming.or(stored);

            state
                .profiles
                .insert((entity.clone(), cycle), write.source_file.to_string());

            let key = (entity, cycle, write.profile.profile_number);
            if state.measurements.contains_key(&key) {
                PersistOutcome::DuplicateSkipped
            } else {
                let rows = write.profile.measurements.len() as u64;
                state.measurements.insert(key, rows);
                PersistOutcome::Inserted { derived_rows: rows }
            }
        };

        if let Some(hook) = &self.on_persist {
            hook(cycle);
        }
        Ok(outcome)
    }

    async fn persist_entity_records(
        &self,
        entity: &EntityId,
        records: &EntityRecords,
    ) -> floatsync_ingest::Result<EntityWriteStats> {
        let mut state = self.state.lock().unwrap();
        let mut stats = EntityWriteStats::default();

        if let Some(meta) = &records.metadata {
            if state.meta_entities.insert(entity.to_string()) {
                stats.meta_rows = meta.records.attributes.len() as u64;
                state.meta_rows += stats.meta_rows;
            } else {
                stats.skipped_groups += 1;
            }
        }
        if let Some(tech) = &records.tech {
            let (rows, skipped) =
                insert_groups(&mut state.tech_groups, entity.as_str(), &tech.records, |r| r.cycle);
            stats.tech_rows = rows;
            stats.skipped_groups += skipped;
        }
        if let Some(traj) = &records.trajectory {
            let (rows, skipped) = insert_groups(
                &mut state.trajectory_groups,
                entity.as_str(),
                &traj.records,
                |r| r.cycle,
            );
            stats.trajectory_rows = rows;
            stats.skipped_groups += skipped;
        }
        Ok(stats)
    }

    async fn active_entities(&self) -> floatsync_ingest::Result<Vec<EntityId>> {
        let state = self.state.lock().unwrap();
        let ids: BTreeSet<&String> = state.floats.keys().map(|(e, _)| e).collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| EntityId::new(id.clone()).ok())
            .collect())
    }

    async fn refresh_summary(&self) -> floatsync_ingest::Result<()> {
        self.state.lock().unwrap().summary_refreshes += 1;
        Ok(())
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Config pointing at `roots`, staging under `data_dir`, with no retry sleeps.
pub fn test_config(roots: Vec<String>, data_dir: &Path, workers: usize) -> IngestConfig {
    let mut config = IngestConfig::default();
    config.archive.roots = roots;
    config.archive.probe_timeout = Duration::from_secs(2);
    config.cache.data_dir = data_dir.to_path_buf();
    config.cache.retry = RetryPolicy::immediate(3);
    config.pool.workers = workers;
    config
}

pub fn entity_sync(
    config: &IngestConfig,
    store: Arc<dyn CycleStore>,
    cancel: CancellationToken,
) -> EntitySync {
    EntitySync::from_config(
        config,
        reqwest::Client::new(),
        Arc::new(JsonFileExtractor),
        store,
        cancel,
    )
}

pub fn entity(id: &str) -> EntityId {
    EntityId::new(id).unwrap()
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    /// Start a PostgreSQL container and apply the workspace migrations
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }
}
