//! SQL for idempotent writes.
//!
//! Every function runs inside the caller's transaction. Rows with a natural
//! key are upserted on `(float_id, cycle)`. Tables without one (measurements,
//! metadata, technical and trajectory rows) are guarded by an existence
//! pre-check on the coarsest key the source provides, taken under a
//! transaction-scoped advisory lock so two writers cannot both pass it.

use crate::error::{IngestError, Result};
use crate::records::{
    MetadataRecords, PlatformMetadata, ProfileRecords, SourcedRecords, TechRecord,
    TrajectoryRecord,
};
use crate::store::PersistOutcome;
use floatsync_common::{CycleKey, CycleNumber, EntityId};
use sqlx::{Postgres, QueryBuilder, Transaction};
use std::collections::BTreeMap;
use tracing::debug;

/// Rows per multi-row INSERT; keeps bind parameters well under 65535.
pub const INSERT_CHUNK_SIZE: usize = 1000;

pub(crate) fn cycle_param(cycle: CycleNumber) -> Result<i32> {
    i32::try_from(cycle)
        .map_err(|_| IngestError::Config(format!("cycle number {} exceeds INTEGER range", cycle)))
}

fn opt_cycle_param(cycle: Option<CycleNumber>) -> Result<Option<i32>> {
    cycle.map(cycle_param).transpose()
}

/// Serialise writers of the same (entity, cycle) until commit.
async fn lock_key(
    tx: &mut Transaction<'_, Postgres>,
    entity: &EntityId,
    cycle: Option<i32>,
) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), $2)")
        .bind(entity.as_str())
        .bind(cycle.unwrap_or(-1))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Upsert the per-cycle entity row.
///
/// Position, time, profile number and source file always take the new
/// value. Platform fields keep the stored value when the new one is NULL.
pub async fn upsert_entity_metadata(
    tx: &mut Transaction<'_, Postgres>,
    key: &CycleKey,
    profile: &ProfileRecords,
    platform: &PlatformMetadata,
    source_file: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO floats (
            float_id, cycle, profile_number, latitude, longitude, juld,
            wmo_id, platform_type, project_name, pi_name,
            end_mission_status, end_mission_date, source_file
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (float_id, cycle) DO UPDATE SET
            profile_number     = EXCLUDED.profile_number,
            latitude           = EXCLUDED.latitude,
            longitude          = EXCLUDED.longitude,
            juld               = EXCLUDED.juld,
            source_file        = EXCLUDED.source_file,
            wmo_id             = COALESCE(EXCLUDED.wmo_id, floats.wmo_id),
            platform_type      = COALESCE(EXCLUDED.platform_type, floats.platform_type),
            project_name       = COALESCE(EXCLUDED.project_name, floats.project_name),
            pi_name            = COALESCE(EXCLUDED.pi_name, floats.pi_name),
            end_mission_status = COALESCE(EXCLUDED.end_mission_status, floats.end_mission_status),
            end_mission_date   = COALESCE(EXCLUDED.end_mission_date, floats.end_mission_date),
            updated_at         = NOW()
        "#,
    )
    .bind(key.entity.as_str())
    .bind(cycle_param(key.cycle)?)
    .bind(profile.profile_number)
    .bind(profile.latitude)
    .bind(profile.longitude)
    .bind(profile.juld)
    .bind(&platform.wmo_id)
    .bind(&platform.platform_type)
    .bind(&platform.project_name)
    .bind(&platform.pi_name)
    .bind(&platform.end_mission_status)
    .bind(platform.end_mission_date)
    .bind(source_file)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Upsert the cycle's profile row; every column takes the new value.
pub async fn upsert_cycle(
    tx: &mut Transaction<'_, Postgres>,
    key: &CycleKey,
    profile: &ProfileRecords,
    source_file: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO profiles (
            float_id, cycle, juld, latitude, longitude,
            pres, temp, psal, temp_qc, psal_qc, source_file
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (float_id, cycle) DO UPDATE SET
            juld        = EXCLUDED.juld,
            latitude    = EXCLUDED.latitude,
            longitude   = EXCLUDED.longitude,
            pres        = EXCLUDED.pres,
            temp        = EXCLUDED.temp,
            psal        = EXCLUDED.psal,
            temp_qc     = EXCLUDED.temp_qc,
            psal_qc     = EXCLUDED.psal_qc,
            source_file = EXCLUDED.source_file,
            updated_at  = NOW()
        "#,
    )
    .bind(key.entity.as_str())
    .bind(cycle_param(key.cycle)?)
    .bind(profile.juld)
    .bind(profile.latitude)
    .bind(profile.longitude)
    .bind(&profile.pres)
    .bind(&profile.temp)
    .bind(&profile.psal)
    .bind(&profile.temp_qc)
    .bind(&profile.psal_qc)
    .bind(source_file)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Insert the cycle's measurement rows unless any already exist for
/// `(float_id, cycle, profile_number)`.
pub async fn insert_derived_records(
    tx: &mut Transaction<'_, Postgres>,
    key: &CycleKey,
    profile: &ProfileRecords,
    source_file: &str,
) -> Result<PersistOutcome> {
    let cycle = cycle_param(key.cycle)?;
    lock_key(tx, &key.entity, Some(cycle)).await?;

    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM measurements
            WHERE float_id = $1 AND cycle = $2
              AND profile_number IS NOT DISTINCT FROM $3
        )
        "#,
    )
    .bind(key.entity.as_str())
    .bind(cycle)
    .bind(profile.profile_number)
    .fetch_one(&mut **tx)
    .await?;

    if exists {
        debug!(entity = %key.entity, cycle = key.cycle, "Measurements already present, skipping");
        return Ok(PersistOutcome::DuplicateSkipped);
    }

    let mut inserted = 0u64;
    for chunk in profile.measurements.chunks(INSERT_CHUNK_SIZE) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            INSERT INTO measurements (
                float_id, cycle, profile_number, juld, latitude, longitude,
                depth_m, sensor, value, qc, source_file
            )
            "#,
        );
        builder.push_values(chunk, |mut b, m| {
            b.push_bind(key.entity.as_str())
                .push_bind(cycle)
                .push_bind(profile.profile_number)
                .push_bind(profile.juld)
                .push_bind(profile.latitude)
                .push_bind(profile.longitude)
                .push_bind(m.depth_m)
                .push_bind(&m.sensor)
                .push_bind(m.value)
                .push_bind(&m.qc)
                .push_bind(source_file);
        });
        inserted += builder.build().execute(&mut **tx).await?.rows_affected();
    }

    Ok(PersistOutcome::Inserted {
        derived_rows: inserted,
    })
}

/// Insert metadata key/value rows unless the entity already has any.
pub async fn insert_meta_kv(
    tx: &mut Transaction<'_, Postgres>,
    entity: &EntityId,
    meta: &SourcedRecords<MetadataRecords>,
) -> Result<Option<u64>> {
    lock_key(tx, entity, None).await?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM meta_kv WHERE float_id = $1)")
            .bind(entity.as_str())
            .fetch_one(&mut **tx)
            .await?;
    if exists {
        return Ok(None);
    }

    let mut inserted = 0u64;
    for chunk in meta.records.attributes.chunks(INSERT_CHUNK_SIZE) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO meta_kv (float_id, var_name, attr_name, value_text, dtype, shape, source_file) ",
        );
        builder.push_values(chunk, |mut b, a| {
            b.push_bind(entity.as_str())
                .push_bind(&a.var_name)
                .push_bind(&a.attr_name)
                .push_bind(&a.value_text)
                .push_bind(&a.dtype)
                .push_bind(&a.shape)
                .push_bind(&meta.source_file);
        });
        inserted += builder.build().execute(&mut **tx).await?.rows_affected();
    }
    Ok(Some(inserted))
}

/// Rows grouped by cycle; rows without a cycle form their own group.
fn group_by_cycle<T>(
    rows: &[T],
    cycle_of: impl Fn(&T) -> Option<CycleNumber>,
) -> BTreeMap<Option<CycleNumber>, Vec<&T>> {
    let mut groups: BTreeMap<Option<CycleNumber>, Vec<&T>> = BTreeMap::new();
    for row in rows {
        groups.entry(cycle_of(row)).or_default().push(row);
    }
    groups
}

async fn cycle_group_exists(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    entity: &EntityId,
    cycle: Option<i32>,
) -> Result<bool> {
    lock_key(tx, entity, cycle).await?;
    let sql = format!(
        "SELECT EXISTS (SELECT 1 FROM {} WHERE float_id = $1 AND cycle IS NOT DISTINCT FROM $2)",
        table
    );
    let exists: bool = sqlx::query_scalar(&sql)
        .bind(entity.as_str())
        .bind(cycle)
        .fetch_one(&mut **tx)
        .await?;
    Ok(exists)
}

/// Insert technical rows, skipping cycles that already have any.
///
/// Returns `(inserted rows, skipped cycle groups)`.
pub async fn insert_tech(
    tx: &mut Transaction<'_, Postgres>,
    entity: &EntityId,
    tech: &SourcedRecords<Vec<TechRecord>>,
) -> Result<(u64, u64)> {
    let mut inserted = 0u64;
    let mut skipped = 0u64;

    for (cycle, rows) in group_by_cycle(&tech.records, |r| r.cycle) {
        let cycle = opt_cycle_param(cycle)?;
        if cycle_group_exists(tx, "tech", entity, cycle).await? {
            skipped += 1;
            continue;
        }
        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO tech (float_id, cycle, param_name, param_value, units, collected_at, source_file) ",
            );
            builder.push_values(chunk, |mut b, r| {
                b.push_bind(entity.as_str())
                    .push_bind(cycle)
                    .push_bind(&r.param_name)
                    .push_bind(&r.param_value)
                    .push_bind(&r.units)
                    .push_bind(r.collected_at)
                    .push_bind(&tech.source_file);
            });
            inserted += builder.build().execute(&mut **tx).await?.rows_affected();
        }
    }

    Ok((inserted, skipped))
}

/// Insert trajectory rows, skipping cycles that already have any.
pub async fn insert_trajectory(
    tx: &mut Transaction<'_, Postgres>,
    entity: &EntityId,
    traj: &SourcedRecords<Vec<TrajectoryRecord>>,
) -> Result<(u64, u64)> {
    let mut inserted = 0u64;
    let mut skipped = 0u64;

    for (cycle, rows) in group_by_cycle(&traj.records, |r| r.cycle) {
        let cycle = opt_cycle_param(cycle)?;
        if cycle_group_exists(tx, "traj", entity, cycle).await? {
            skipped += 1;
            continue;
        }
        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"
                INSERT INTO traj (
                    float_id, cycle, profile_number, juld, latitude, longitude,
                    position_qc, location_system, measurement_code, satellite_name,
                    juld_qc, source_file
                )
                "#,
            );
            builder.push_values(chunk, |mut b, r| {
                b.push_bind(entity.as_str())
                    .push_bind(cycle)
                    .push_bind(r.profile_number)
                    .push_bind(r.juld)
                    .push_bind(r.latitude)
                    .push_bind(r.longitude)
                    .push_bind(&r.position_qc)
                    .push_bind(&r.location_system)
                    .push_bind(r.measurement_code)
                    .push_bind(&r.satellite_name)
                    .push_bind(&r.juld_qc)
                    .push_bind(&traj.source_file);
            });
            inserted += builder.build().execute(&mut **tx).await?.rows_affected();
        }
    }

    Ok((inserted, skipped))
}
