//! Bounded-concurrency ingestion of pending cycles.
//!
//! Each [`IngestionUnit`] is moved into its own task, walks the
//! stage -> parse -> persist lifecycle and comes back inside a
//! [`UnitReport`]. Failures stay inside the report; the pool folds every
//! report into a [`RunSummary`]. Cancellation stops new submissions and lets
//! running units finish their transaction.

use crate::archive::ResolvedFile;
use crate::cache::ResourceCache;
use crate::error::IngestError;
use crate::records::{PlatformMetadata, RecordSet};
use crate::store::{CycleStore, CycleWrite, PersistOutcome};
use chrono::{DateTime, Utc};
use floatsync_common::CycleKey;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Discovered,
    Staging,
    Staged,
    Parsing,
    Parsed,
    Persisting,
    Persisted,
    FailedTransient,
    FailedPermanent,
    FailedParse,
    FailedPersist,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitState::Discovered => "discovered",
            UnitState::Staging => "staging",
            UnitState::Staged => "staged",
            UnitState::Parsing => "parsing",
            UnitState::Parsed => "parsed",
            UnitState::Persisting => "persisting",
            UnitState::Persisted => "persisted",
            UnitState::FailedTransient => "failed_transient",
            UnitState::FailedPermanent => "failed_permanent",
            UnitState::FailedParse => "failed_parse",
            UnitState::FailedPersist => "failed_persist",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitState::Persisted
                | UnitState::FailedTransient
                | UnitState::FailedPermanent
                | UnitState::FailedParse
                | UnitState::FailedPersist
        )
    }

    /// Allowed lifecycle edges. `FailedTransient -> Discovered` is a re-queue.
    pub fn can_transition_to(&self, next: UnitState) -> bool {
        use UnitState::*;
        matches!(
            (self, next),
            (Discovered, Staging)
                | (Staging, Staged)
                | (Staging, FailedTransient)
                | (Staging, FailedPermanent)
                | (Staged, Parsing)
                | (Parsing, Parsed)
                | (Parsing, FailedParse)
                | (Parsed, Persisting)
                | (Persisting, Persisted)
                | (Persisting, FailedPersist)
                | (FailedTransient, Discovered)
        )
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cycle's work item. Owned by exactly one task at a time.
#[derive(Debug, Clone)]
pub struct IngestionUnit {
    pub key: CycleKey,
    pub file: ResolvedFile,
    pub url: String,
    pub state: UnitState,
    /// Re-queues so far in this run
    pub attempt: u32,
    pub platform: Option<Arc<PlatformMetadata>>,
}

impl IngestionUnit {
    pub fn new(key: CycleKey, file: ResolvedFile, url: String) -> Self {
        Self {
            key,
            file,
            url,
            state: UnitState::Discovered,
            attempt: 0,
            platform: None,
        }
    }

    pub fn with_platform(mut self, platform: Option<Arc<PlatformMetadata>>) -> Self {
        self.platform = platform;
        self
    }

    fn advance(&mut self, next: UnitState) {
        if !self.state.can_transition_to(next) {
            warn!(
                key = %self.key,
                from = %self.state,
                to = %next,
                "Unexpected unit state transition"
            );
        }
        debug!(entity = %self.key.entity, cycle = self.key.cycle, state = %next, "Unit state");
        self.state = next;
    }
}

/// What happened to one unit.
#[derive(Debug)]
pub struct UnitReport {
    pub unit: IngestionUnit,
    pub result: Result<PersistOutcome, IngestError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitFailure {
    pub cycle: u32,
    pub url: String,
    pub state: UnitState,
    pub kind: &'static str,
    pub message: String,
}

/// Statistics collected during one entity's run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub entity: String,
    /// Cycles resolved from the listing
    pub discovered: usize,
    /// Cycles left after the delta
    pub pending: usize,
    pub persisted: usize,
    pub duplicate_skipped: usize,
    pub derived_rows: u64,
    pub failed_transient: usize,
    pub failed_permanent: usize,
    pub failed_parse: usize,
    pub failed_persist: usize,
    pub requeued: usize,
    /// Units never started because the run was cancelled
    pub not_started: usize,
    pub panicked: usize,
    pub failures: Vec<UnitFailure>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
}

impl RunSummary {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
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

    /// Units that reached `Persisted`, including duplicate skips.
    pub fn succeeded(&self) -> usize {
        self.persisted
    }

    pub fn skipped(&self) -> usize {
        self.duplicate_skipped + self.not_started
    }

    pub fn failed(&self) -> usize {
        self.failed_transient
            + self.failed_permanent
            + self.failed_parse
            + self.failed_persist
            + self.panicked
    }

    pub fn record(&mut self, report: &UnitReport) {
        match (&report.result, report.unit.state) {
            (Ok(outcome), _) => {
                self.persisted += 1;
                match outcome {
                    PersistOutcome::Inserted { derived_rows } => self.derived_rows += derived_rows,
                    PersistOutcome::DuplicateSkipped => self.duplicate_skipped += 1,
                }
            },
            (Err(e), state) => {
                match state {
                    UnitState::FailedTransient => self.failed_transient += 1,
                    UnitState::FailedParse => self.failed_parse += 1,
                    UnitState::FailedPersist => self.failed_persist += 1,
                    _ => self.failed_permanent += 1,
                }
                self.failures.push(UnitFailure {
                    cycle: report.unit.key.cycle,
                    url: report.unit.url.clone(),
                    state,
                    kind: e.kind(),
                    message: e.to_string(),
                });
            },
        }
    }
}

/// Fixed-size pool over a shared cache and store.
pub struct IngestionPool {
    cache: Arc<ResourceCache>,
    store: Arc<dyn CycleStore>,
    workers: usize,
    retry_budget: u32,
    cancel: CancellationToken,
}

impl IngestionPool {
    pub fn new(
        cache: Arc<ResourceCache>,
        store: Arc<dyn CycleStore>,
        workers: usize,
        retry_budget: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cache,
            store,
            workers: workers.max(1),
            retry_budget,
            cancel,
        }
    }

    /// Process `units` in submission order with at most `workers` in flight
    /// and wait for all of them.
    pub async fn run(&self, units: Vec<IngestionUnit>, summary: &mut RunSummary) {
        let mut queue: VecDeque<IngestionUnit> = units.into();
        let mut in_flight: JoinSet<UnitReport> = JoinSet::new();

        info!(
            entity = %summary.entity,
            units = queue.len(),
            workers = self.workers,
            "Starting ingestion pool"
        );

        loop {
            while in_flight.len() < self.workers && !self.cancel.is_cancelled() {
                let Some(unit) = queue.pop_front() else {
                    break;
                };
                let cache = Arc::clone(&self.cache);
                let store = Arc::clone(&self.store);
                in_flight.spawn(process_unit(cache, store, unit));
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            match joined {
                Ok(mut report) => {
                    let retryable = report.unit.state == UnitState::FailedTransient
                        && report.unit.attempt < self.retry_budget
                        && !self.cancel.is_cancelled();
                    if retryable {
                        report.unit.attempt += 1;
                        report.unit.advance(UnitState::Discovered);
                        warn!(
                            entity = %report.unit.key.entity,
                            cycle = report.unit.key.cycle,
                            url = %report.unit.url,
                            attempt = report.unit.attempt,
                            "Re-queueing unit after transient failure"
                        );
                        summary.requeued += 1;
                        queue.push_back(report.unit);
                    } else {
                        summary.record(&report);
                    }
                },
                Err(e) => {
                    error!(entity = %summary.entity, error = %e, "Ingestion task panicked");
                    summary.panicked += 1;
                },
            }
        }

        if !queue.is_empty() {
            warn!(
                entity = %summary.entity,
                remaining = queue.len(),
                "Cancelled, units not started"
            );
            summary.not_started += queue.len();
        }
    }
}

/// Stage, parse and persist one unit. Never returns early with `?`: every
/// failure is captured in the report with the state it happened in.
async fn process_unit(
    cache: Arc<ResourceCache>,
    store: Arc<dyn CycleStore>,
    mut unit: IngestionUnit,
) -> UnitReport {
    unit.advance(UnitState::Staging);
    if let Err(e) = cache.ensure_local(&unit.url).await {
        let state = staging_failure_state(&e);
        return fail(unit, state, e);
    }
    unit.advance(UnitState::Staged);

    unit.advance(UnitState::Parsing);
    let handle = match cache.get_handle(&unit.url).await {
        Ok(handle) => handle,
        Err(e) if e.is_transient() || e.is_permanent_fetch() => {
            // Evicted and re-fetch failed between staging and opening.
            return fail(unit, UnitState::FailedPermanent, e);
        },
        Err(e) => return fail(unit, UnitState::FailedParse, e),
    };
    let profile = match &handle.records {
        RecordSet::Profile(profile) => profile,
        other => {
            let e = IngestError::Parse {
                path: handle.path.clone(),
                message: format!("expected profile records, got {}", record_kind(other)),
            };
            return fail(unit, UnitState::FailedParse, e);
        },
    };
    unit.advance(UnitState::Parsed);

    unit.advance(UnitState::Persisting);
    let write = CycleWrite {
        key: &unit.key,
        source_file: &unit.file.name,
        profile,
        platform: unit.platform.as_deref(),
    };
    let persisted = store.persist_cycle(write).await;
    match persisted {
        Ok(outcome) => {
            unit.advance(UnitState::Persisted);
            info!(
                entity = %unit.key.entity,
                cycle = unit.key.cycle,
                url = %unit.url,
                outcome = ?outcome,
                "Cycle persisted"
            );
            UnitReport {
                unit,
                result: Ok(outcome),
            }
        },
        Err(e) => fail(unit, UnitState::FailedPersist, e),
    }
}

/// Network hiccups and local I/O errors while staging are worth another
/// pass; everything else (404, negative cache, missing local file) is not.
fn staging_failure_state(error: &IngestError) -> UnitState {
    match error {
        IngestError::TransientNetwork { .. } => UnitState::FailedTransient,
        IngestError::Io(io) if io.kind() != std::io::ErrorKind::NotFound => {
            UnitState::FailedTransient
        },
        _ => UnitState::FailedPermanent,
    }
}

fn fail(mut unit: IngestionUnit, state: UnitState, error: IngestError) -> UnitReport {
    unit.advance(state);
    warn!(
        entity = %unit.key.entity,
        cycle = unit.key.cycle,
        url = %unit.url,
        state = %state,
        kind = error.kind(),
        error = %error,
        "Unit failed"
    );
    UnitReport {
        unit,
        result: Err(error),
    }
}

fn record_kind(records: &RecordSet) -> &'static str {
    match records {
        RecordSet::Profile(_) => "profile",
        RecordSet::Metadata(_) => "metadata",
        RecordSet::Technical { .. } => "technical",
        RecordSet::Trajectory { .. } => "trajectory",
    }
}
