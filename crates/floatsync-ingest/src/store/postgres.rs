//! Postgres-backed [`CycleStore`].

use crate::error::{IngestError, Result};
use crate::records::EntityRecords;
use crate::store::writer;
use crate::store::{CycleStore, CycleWrite, EntityWriteStats, PersistOutcome};
use async_trait::async_trait;
use floatsync_common::{env, CycleNumber, EntityId};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

impl DbConfig {
    /// `DATABASE_URL` is required; `DB_MAX_CONNECTIONS` (10),
    /// `DB_MIN_CONNECTIONS` (1) and `DB_CONNECT_TIMEOUT` (30s) are optional.
    pub fn from_env() -> Result<Self> {
        let url = env::string_opt("DATABASE_URL")
            .ok_or_else(|| IngestError::Config("DATABASE_URL not set".to_string()))?;

        Ok(Self {
            url,
            max_connections: env::parsed_or("DB_MAX_CONNECTIONS", 10)?,
            min_connections: env::parsed_or("DB_MIN_CONNECTIONS", 1)?,
            connect_timeout_secs: env::parsed_or("DB_CONNECT_TIMEOUT", 30)?,
        })
    }
}

pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;

    info!(
        max_connections = config.max_connections,
        "Database connection pool created"
    );
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| IngestError::Persistence(e.into()))?;
    Ok(())
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CycleStore for PgStore {
    async fn persisted_cycles(&self, entity: &EntityId) -> Result<BTreeSet<CycleNumber>> {
        let cycles: Vec<i32> =
            sqlx::query_scalar("SELECT DISTINCT cycle FROM floats WHERE float_id = $1")
                .bind(entity.as_str())
                .fetch_all(&self.pool)
                .await?;

        Ok(cycles
            .into_iter()
            .filter_map(|c| CycleNumber::try_from(c).ok())
            .collect())
    }

    async fn persist_cycle(&self, write: CycleWrite<'_>) -> Result<PersistOutcome> {
        let platform = match write.platform {
            Some(entity_level) => write.profile.platform.or(entity_level),
            None => write.profile.platform.clone(),
        };

        let mut tx = self.pool.begin().await?;
        writer::upsert_entity_metadata(&mut tx, write.key, write.profile, &platform, write.source_file)
            .await?;
        writer::upsert_cycle(&mut tx, write.key, write.profile, write.source_file).await?;
        let outcome =
            writer::insert_derived_records(&mut tx, write.key, write.profile, write.source_file)
                .await?;
        tx.commit().await?;

        debug!(key = %write.key, outcome = ?outcome, "Cycle committed");
        Ok(outcome)
    }

    async fn persist_entity_records(
        &self,
        entity: &EntityId,
        records: &EntityRecords,
    ) -> Result<EntityWriteStats> {
        let mut stats = EntityWriteStats::default();
        if records.is_empty() {
            return Ok(stats);
        }

        let mut tx = self.pool.begin().await?;

        if let Some(meta) = &records.metadata {
            match writer::insert_meta_kv(&mut tx, entity, meta).await? {
                Some(rows) => stats.meta_rows = rows,
                None => stats.skipped_groups += 1,
            }
        }
        if let Some(tech) = &records.tech {
            let (rows, skipped) = writer::insert_tech(&mut tx, entity, tech).await?;
            stats.tech_rows = rows;
            stats.skipped_groups += skipped;
        }
        if let Some(traj) = &records.trajectory {
            let (rows, skipped) = writer::insert_trajectory(&mut tx, entity, traj).await?;
            stats.trajectory_rows = rows;
            stats.skipped_groups += skipped;
        }

        tx.commit().await?;
        info!(
            entity = %entity,
            meta_rows = stats.meta_rows,
            tech_rows = stats.tech_rows,
            trajectory_rows = stats.trajectory_rows,
            skipped_groups = stats.skipped_groups,
            "Entity-level records committed"
        );
        Ok(stats)
    }

    async fn active_entities(&self) -> Result<Vec<EntityId>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT float_id FROM floats ORDER BY float_id")
                .fetch_all(&self.pool)
                .await?;

        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            match EntityId::new(id.clone()) {
                Ok(entity) => entities.push(entity),
                Err(e) => warn!(float_id = %id, error = %e, "Skipping unusable stored entity id"),
            }
        }
        Ok(entities)
    }

    async fn refresh_summary(&self) -> Result<()> {
        match sqlx::query("REFRESH MATERIALIZED VIEW CONCURRENTLY float_summary")
            .execute(&self.pool)
            .await
        {
            Ok(_) => {},
            Err(e) => {
                warn!(error = %e, "Concurrent summary refresh failed, refreshing with lock");
                sqlx::query("REFRESH MATERIALIZED VIEW float_summary")
                    .execute(&self.pool)
                    .await?;
            },
        }
        info!("Summary view refreshed");
        Ok(())
    }
}
