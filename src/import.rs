//! # Tiered Importer
//!
//! Processes the C7 plan strictly tier by tier, with a hard happens-before
//! barrier between tiers: the next tier starts only once every entity in
//! the current one has terminated, success or recorded failure. Within a
//! tier, entities race for leases the same way the exporter's entities do.
//!
//! Side-effect registrations are suppressed for the whole run (disabled
//! before tier 0, re-enabled on every exit path) and an id-remap table is
//! threaded through so intra-plan lookups resolve to the target
//! environment's ids as dependents come up. Progress resumes from a
//! checkpoint: entities already marked complete are skipped, and a
//! partially-applied entity resumes at its last recorded batch index.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::checkpoint::{self, CheckpointState, DeadLetterRecord};
use crate::error::{CoreError, CoreResult};
use crate::graph::{Graph, Plan};
use crate::pool::{Pool, SeedFactory};
use crate::progress::{Event, FailureClass, ProgressSink};
use crate::value::Record;

/// One fixed-size slice of an entity's records to import, in export order.
pub struct ImportBatch {
    pub records: Vec<Record>,
}

/// Records staged for import, already paged into batches per entity.
pub type ImportSource = BTreeMap<String, Vec<ImportBatch>>;

/// What happened when the target environment was asked to upsert a record.
pub enum UpsertOutcome {
    Applied { source_id: Uuid, target_id: Uuid },
    Retryable(FailureClass),
    AuthFailed,
    Validation(String),
    Fatal(String),
}

/// The target-environment collaborator. `remap` is a point-in-time snapshot
/// of ids already written this run; `defer_self_reference` asks the
/// implementation to omit any lookup field pointing back at `entity`
/// itself, which [`resolve_self_references`] patches in afterward.
///
/// [`resolve_self_references`]: ImportTarget::resolve_self_references
#[async_trait]
pub trait ImportTarget: Send + Sync {
    async fn upsert(
        &self,
        entity: &str,
        record: &Record,
        remap: &HashMap<Uuid, Uuid>,
        defer_self_reference: bool,
    ) -> UpsertOutcome;

    /// Second pass for self-referential entities: patch every record's
    /// self-reference field using the now-complete remap for `entity`.
    async fn resolve_self_references(&self, entity: &str, remap: &HashMap<Uuid, Uuid>) -> CoreResult<()>;

    /// Best-effort toggle of plugin/webhook registrations for the whole
    /// target environment. Failures are logged, never propagated — the
    /// import proceeds regardless per the scoped-suppression pattern.
    async fn set_side_effects_enabled(&self, enabled: bool) -> CoreResult<()>;
}

fn record_id_for_dead_letter(record: &Record, primary_key: &str) -> String {
    match record.get_or_null(primary_key) {
        crate::value::Value::Null => "<unknown>".to_string(),
        other => format!("{other:?}"),
    }
}

/// Import one entity's remaining batches to completion (or to the first
/// `FatalEntity`/exhausted-retry/cancellation point). Returns
/// `(applied_rows, fully_completed, nextBatchIndex)`; `fully_completed=false`
/// marks the owning tier as failed without aborting its siblings.
#[allow(clippy::too_many_arguments)]
async fn import_entity<F>(
    pool: &Pool<F>,
    entity: &str,
    primary_key: &str,
    self_referential: bool,
    batches: Vec<ImportBatch>,
    start_batch: usize,
    retry_cap: u32,
    dead_letter_path: &Path,
    remap: Arc<Mutex<HashMap<Uuid, Uuid>>>,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> CoreResult<(usize, bool, usize, Vec<(Uuid, Uuid)>)>
where
    F: SeedFactory,
    F::Client: ImportTarget,
{
    let mut applied_total = 0usize;
    let mut last_batch = start_batch;
    let mut own_delta: Vec<(Uuid, Uuid)> = Vec::new();

    for (batch_index, batch) in batches.into_iter().enumerate() {
        if batch_index < start_batch {
            continue;
        }
        if cancel.is_cancelled() {
            return Ok((applied_total, false, last_batch, own_delta));
        }

        let mut applied_this_batch = 0usize;
        for record in &batch.records {
            let mut attempt = 0u32;
            let mut reauthed = false;
            loop {
                let lease = pool.get_lease(cancel).await?;
                let snapshot = remap.lock().unwrap().clone();
                let outcome = lease
                    .client()
                    .upsert(entity, record, &snapshot, self_referential)
                    .await;
                drop(lease);

                match outcome {
                    UpsertOutcome::Applied { source_id, target_id } => {
                        remap.lock().unwrap().insert(source_id, target_id);
                        own_delta.push((source_id, target_id));
                        applied_this_batch += 1;
                        break;
                    }
                    UpsertOutcome::Retryable(class) if attempt < retry_cap => {
                        attempt += 1;
                        let wait = pool.record_throttle(entity, None, attempt).await;
                        progress.report(Event::Failure {
                            classification: class,
                            entity: Some(entity.to_string()),
                            detail: format!("retry {attempt}/{retry_cap} after {}ms", wait.as_millis()),
                        });
                        tokio::time::sleep(wait).await;
                    }
                    UpsertOutcome::Retryable(class) => {
                        warn!(entity, "retry cap exhausted, marking entity failed");
                        progress.report(Event::Failure {
                            classification: class,
                            entity: Some(entity.to_string()),
                            detail: "retry cap exhausted".to_string(),
                        });
                        applied_total += applied_this_batch;
                        return Ok((applied_total, false, last_batch, own_delta));
                    }
                    UpsertOutcome::AuthFailed if !reauthed => {
                        reauthed = true;
                        pool.invalidate_seed().await;
                        progress.report(Event::Failure {
                            classification: FailureClass::AuthFailed,
                            entity: Some(entity.to_string()),
                            detail: "re-leasing after auth failure".to_string(),
                        });
                    }
                    UpsertOutcome::AuthFailed => {
                        progress.report(Event::Failure {
                            classification: FailureClass::AuthFailed,
                            entity: Some(entity.to_string()),
                            detail: "auth failure persisted after reseed".to_string(),
                        });
                        applied_total += applied_this_batch;
                        return Ok((applied_total, false, last_batch, own_delta));
                    }
                    UpsertOutcome::Validation(message) => {
                        let dlq = DeadLetterRecord {
                            record_id: record_id_for_dead_letter(record, primary_key),
                            error_code: "ValidationFailed".to_string(),
                            message,
                            attempted_at: Utc::now(),
                        };
                        if let Err(e) = checkpoint::append_dead_letter(dead_letter_path, &dlq) {
                            warn!(entity, error = %e, "failed to write dead-letter record");
                        }
                        progress.report(Event::Failure {
                            classification: FailureClass::ValidationFailed,
                            entity: Some(entity.to_string()),
                            detail: dlq.message.clone(),
                        });
                        break;
                    }
                    UpsertOutcome::Fatal(message) => {
                        progress.report(Event::Failure {
                            classification: FailureClass::FatalEntity,
                            entity: Some(entity.to_string()),
                            detail: message,
                        });
                        applied_total += applied_this_batch;
                        return Ok((applied_total, false, last_batch, own_delta));
                    }
                }
            }
        }

        applied_total += applied_this_batch;
        last_batch = batch_index + 1;
        progress.report(Event::ImportBatchApplied {
            entity: entity.to_string(),
            batch_index,
            applied_rows: applied_this_batch,
        });
    }

    if self_referential {
        let snapshot = remap.lock().unwrap().clone();
        let lease = pool.get_lease(cancel).await?;
        if let Err(e) = lease.client().resolve_self_references(entity, &snapshot).await {
            warn!(entity, error = %e, "self-reference resolution pass failed");
            return Ok((applied_total, false, last_batch, own_delta));
        }
    }

    Ok((applied_total, true, last_batch, own_delta))
}

struct SideEffectGuard<'a, F: SeedFactory> {
    pool: &'a Pool<F>,
}

impl<'a, F: SeedFactory> SideEffectGuard<'a, F>
where
    F::Client: ImportTarget,
{
    async fn disable(pool: &'a Pool<F>, cancel: &CancellationToken) -> CoreResult<Self> {
        let lease = pool.get_lease(cancel).await?;
        lease.client().set_side_effects_enabled(false).await?;
        Ok(SideEffectGuard { pool })
    }

    /// Re-enable on any exit path, best-effort: a failure here is logged,
    /// never propagated.
    async fn release(self) {
        // A fresh, never-cancelled token: re-enabling must not be skipped
        // just because the run itself was cancelled.
        let fresh = CancellationToken::new();
        match self.pool.get_lease(&fresh).await {
            Ok(lease) => {
                if let Err(e) = lease.client().set_side_effects_enabled(true).await {
                    warn!(error = %e, "failed to re-enable side effects");
                }
            }
            Err(e) => warn!(error = %e, "could not re-lease to re-enable side effects"),
        }
    }
}

/// Run the importer over the whole plan. Loads (or starts fresh) a
/// checkpoint, suppresses side effects for the duration, imports tier by
/// tier with a strict barrier, and on success deletes the checkpoint; on
/// any failure the checkpoint is kept so the next run resumes past
/// whatever already landed.
pub async fn import<F>(
    pool: Pool<F>,
    graph: &Graph,
    plan: &Plan,
    mut source: ImportSource,
    checkpoint_path: PathBuf,
    dead_letter_dir: PathBuf,
    retry_cap: u32,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
) -> CoreResult<BTreeMap<String, usize>>
where
    F: SeedFactory + 'static,
    F::Client: ImportTarget,
{
    let mut state = checkpoint::load(&checkpoint_path).unwrap_or_default();
    let primary_keys: HashMap<String, String> =
        graph.entities.iter().map(|e| (e.name.clone(), e.primary_key.clone())).collect();

    let remap: Arc<Mutex<HashMap<Uuid, Uuid>>> = Arc::new(Mutex::new(
        state.entities.values().flat_map(|p| p.remap.iter().cloned()).collect(),
    ));

    let guard = SideEffectGuard::disable(&pool, &cancel).await?;

    let run = run_tiers(&pool, graph, plan, &mut source, &mut state, &primary_keys, &remap, &dead_letter_dir, retry_cap, progress.clone(), &cancel).await;

    guard.release().await;

    match run {
        Ok(totals) => {
            checkpoint::clear(&checkpoint_path);
            Ok(totals)
        }
        Err(e) => {
            if let Err(save_err) = checkpoint::save(&checkpoint_path, &state) {
                warn!(error = %save_err, "failed to persist checkpoint after import failure");
            }
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_tiers<F>(
    pool: &Pool<F>,
    graph: &Graph,
    plan: &Plan,
    source: &mut ImportSource,
    state: &mut CheckpointState,
    primary_keys: &HashMap<String, String>,
    remap: &Arc<Mutex<HashMap<Uuid, Uuid>>>,
    dead_letter_dir: &Path,
    retry_cap: u32,
    progress: Arc<dyn ProgressSink>,
    cancel: &CancellationToken,
) -> CoreResult<BTreeMap<String, usize>>
where
    F: SeedFactory + 'static,
    F::Client: ImportTarget,
{
    let mut totals = BTreeMap::new();

    for (tier_index, tier) in plan.tiers.iter().enumerate() {
        progress.report(Event::TierStarted {
            tier_index,
            entities: tier.entities.clone(),
        });

        let mut handles = Vec::new();
        for entity in &tier.entities {
            if state.is_completed(entity) {
                info!(entity, "skipping completed entity on resume");
                continue;
            }
            let Some(batches) = source.remove(entity) else {
                continue;
            };
            let start_batch = state.progress_of(entity).map(|p| p.last_batch).unwrap_or(0);
            let primary_key = primary_keys.get(entity).cloned().unwrap_or_else(|| format!("{entity}id"));
            let self_referential = graph.self_referential.contains(entity);
            let dead_letter_path = dead_letter_dir.join(format!("{entity}.ndjson"));

            let pool = pool.clone();
            let progress = progress.clone();
            let cancel = cancel.clone();
            let remap = remap.clone();
            let entity = entity.clone();

            handles.push(tokio::spawn(async move {
                let result = import_entity(
                    &pool,
                    &entity,
                    &primary_key,
                    self_referential,
                    batches,
                    start_batch,
                    retry_cap,
                    &dead_letter_path,
                    remap,
                    progress.as_ref(),
                    &cancel,
                )
                .await;
                (entity, result)
            }));
        }

        let mut tier_failed = false;
        for handle in handles {
            let (entity, result) = handle
                .await
                .map_err(|e| CoreError::fatal(format!("import worker panicked: {e}")))?;
            match result {
                Ok((applied, completed, last_batch, own_delta)) => {
                    *totals.entry(entity.clone()).or_insert(0) += applied;
                    state.record_batch(&entity, last_batch, &own_delta);
                    if completed {
                        state.mark_completed(&entity);
                    } else {
                        tier_failed = true;
                    }
                }
                Err(e) => {
                    tier_failed = true;
                    progress.report(Event::Failure {
                        classification: FailureClass::FatalEntity,
                        entity: Some(entity),
                        detail: e.to_string(),
                    });
                }
            }
        }
        progress.report(Event::Checkpointed {
            entity: format!("tier-{tier_index}"),
            position: tier_index,
        });

        if tier_failed {
            return Err(CoreError::fatal(format!("tier {tier_index} had at least one failed entity")));
        }
        if cancel.is_cancelled() {
            return Err(CoreError::cancelled());
        }
    }

    Ok(totals)
}
