//! Cycles present upstream but not yet persisted.

use crate::archive::ResolvedFile;
use crate::error::Result;
use crate::store::CycleStore;
use floatsync_common::{CycleNumber, EntityId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// `resolved - persisted`, keeping ascending cycle order.
pub fn compute_delta(
    resolved: &BTreeMap<CycleNumber, ResolvedFile>,
    persisted: &BTreeSet<CycleNumber>,
) -> BTreeMap<CycleNumber, ResolvedFile> {
    resolved
        .iter()
        .filter(|(cycle, _)| !persisted.contains(cycle))
        .map(|(cycle, file)| (*cycle, file.clone()))
        .collect()
}

/// Read the entity's persisted cycles once and subtract them.
pub async fn pending_cycles(
    store: &dyn CycleStore,
    entity: &EntityId,
    resolved: &BTreeMap<CycleNumber, ResolvedFile>,
) -> Result<BTreeMap<CycleNumber, ResolvedFile>> {
    let persisted = store.persisted_cycles(entity).await?;
    let pending = compute_delta(resolved, &persisted);

    info!(
        entity = %entity,
        available = resolved.len(),
        persisted = persisted.len(),
        pending = pending.len(),
        "Computed cycle delta"
    );
    Ok(pending)
}
