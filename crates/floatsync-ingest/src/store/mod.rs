//! Persisted state: what has been ingested and how to write more.

pub mod postgres;
pub mod writer;

use crate::error::Result;
use crate::records::{EntityRecords, PlatformMetadata, ProfileRecords};
use async_trait::async_trait;
use floatsync_common::{CycleKey, CycleNumber, EntityId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use postgres::{DbConfig, PgStore};

/// Result of writing one cycle.
///
/// The entity and cycle rows are always upserted. Derived rows are either
/// inserted or, when a previous run already wrote them, skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistOutcome {
    Inserted { derived_rows: u64 },
    DuplicateSkipped,
}

/// Rows written for entity-level sibling data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityWriteStats {
    pub meta_rows: u64,
    pub tech_rows: u64,
    pub trajectory_rows: u64,
    pub skipped_groups: u64,
}

/// Everything needed to write one cycle in one transaction.
#[derive(Debug, Clone, Copy)]
pub struct CycleWrite<'a> {
    pub key: &'a CycleKey,
    pub source_file: &'a str,
    pub profile: &'a ProfileRecords,
    /// Entity-level platform fields used where the profile is silent
    pub platform: Option<&'a PlatformMetadata>,
}

#[async_trait]
pub trait CycleStore: Send + Sync {
    /// Cycle numbers already recorded for `entity`, in one query.
    async fn persisted_cycles(&self, entity: &EntityId) -> Result<BTreeSet<CycleNumber>>;

    /// Upsert entity and cycle rows and insert derived rows, atomically.
    async fn persist_cycle(&self, write: CycleWrite<'_>) -> Result<PersistOutcome>;

    /// Write metadata, technical and trajectory rows for an entity.
    async fn persist_entity_records(
        &self,
        entity: &EntityId,
        records: &EntityRecords,
    ) -> Result<EntityWriteStats>;

    /// Entities with at least one persisted cycle.
    async fn active_entities(&self) -> Result<Vec<EntityId>>;

    /// Rebuild derived read models after a run.
    async fn refresh_summary(&self) -> Result<()>;
}
