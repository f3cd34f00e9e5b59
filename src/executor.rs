//! Streams a whole file through the row pipeline and persists every row
//! independently.
//!
//! The reader thread feeds `(row, raw)` tasks into a bounded channel,
//! `worker_count` scoped workers map/normalize/resolve/create, and a
//! collector folds outcomes into the job counters. A failing row is logged
//! and counted; it never stops the stream. Only a read failure on the file
//! itself aborts the run.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    thread,
};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::{
    config::ImportConfig,
    entities::{EntityCatalog, EntitySchema, EntityType},
    enums,
    job::{ImportJob, JobStatus, RowError},
    mapping::{MappedRow, RawRow, ResolvedMapping},
    resolver::{ReferenceResolver, identifier_is_set},
    source::SourceFile,
    store::{EntityStore, RecordId},
};

pub const CREATED_BY_FIELD: &str = "created_by";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub total_rows: usize,
    pub processed_rows: usize,
    pub success_count: usize,
    pub error_count: usize,
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, snapshot: ProgressSnapshot);
}

/// No-op reporter for callers that only want the final job.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _snapshot: ProgressSnapshot) {}
}

#[derive(Default)]
struct Counters {
    total: AtomicUsize,
    processed: AtomicUsize,
    success: AtomicUsize,
    error: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total_rows: self.total.load(Ordering::SeqCst),
            processed_rows: self.processed.load(Ordering::SeqCst),
            success_count: self.success.load(Ordering::SeqCst),
            error_count: self.error.load(Ordering::SeqCst),
        }
    }
}

struct RowTask {
    row: usize,
    raw: RawRow,
}

struct RowOutcome {
    row: usize,
    result: Result<RecordId, RowError>,
}

/// Kept row errors, lowest row numbers first, bounded by `cap`.
struct ErrorLog {
    cap: usize,
    kept: BTreeMap<usize, RowError>,
    dropped: usize,
}

impl ErrorLog {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            kept: BTreeMap::new(),
            dropped: 0,
        }
    }

    fn push(&mut self, error: RowError) {
        self.kept.insert(error.row, error);
        if self.kept.len() > self.cap {
            self.kept.pop_last();
            self.dropped += 1;
        }
    }
}

pub struct Executor<'a> {
    catalog: &'a EntityCatalog,
    store: &'a dyn EntityStore,
    config: &'a ImportConfig,
    cancel: &'a AtomicBool,
}

/// Everything a worker needs, shared by reference across the scope.
struct RowContext<'a> {
    entity: EntityType,
    actor: i64,
    schema: &'a EntitySchema,
    catalog: &'a EntityCatalog,
    mapping: ResolvedMapping,
    resolver: ReferenceResolver<'a>,
    store: &'a dyn EntityStore,
}

impl<'a> Executor<'a> {
    pub fn new(
        catalog: &'a EntityCatalog,
        store: &'a dyn EntityStore,
        config: &'a ImportConfig,
        cancel: &'a AtomicBool,
    ) -> Self {
        Self {
            catalog,
            store,
            config,
            cancel,
        }
    }

    /// Runs a pending job over its uploaded file to a terminal status. On a
    /// stream-level failure the job is left `failed` and the error is
    /// returned.
    pub fn run(&self, job: &mut ImportJob, progress: &dyn ProgressReporter) -> Result<()> {
        let encoding = self.config.input_encoding.as_deref();
        self.run_with(job, |job| SourceFile::open(&job.file_path, encoding), progress)
    }

    /// Like [`Executor::run`], reading rows from whatever `open` returns.
    /// Input errors, including a failing `open`, leave the job untouched.
    pub fn run_with(
        &self,
        job: &mut ImportJob,
        open: impl FnOnce(&ImportJob) -> Result<SourceFile>,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        job.ensure_pending("processing")?;
        let mapping = job.mapping()?.resolve();
        let schema = self.catalog.schema(job.entity_type)?;
        let mut source = open(job)?;

        job.status = JobStatus::Processing;
        job.errors.clear();
        job.errors_truncated = 0;
        job.total_rows = 0;
        job.processed_rows = 0;
        job.success_count = 0;
        job.error_count = 0;
        job.started_at = Some(Utc::now());
        job.touch();
        progress.report(ProgressSnapshot::default());
        info!(
            "Importing {} from {:?} for job {} with {} worker(s)",
            job.entity_type,
            source.path(),
            job.id,
            self.config.worker_count
        );

        let context = RowContext {
            entity: job.entity_type,
            actor: job.created_by,
            schema,
            catalog: self.catalog,
            mapping,
            resolver: ReferenceResolver::new(self.store, &schema.references),
            store: self.store,
        };
        let counters = Counters::default();
        let (stream, log) = self.fan_out(&mut source, &context, &counters, progress);
        drop(source);

        let snapshot = counters.snapshot();
        job.total_rows = snapshot.total_rows;
        job.processed_rows = snapshot.processed_rows;
        job.success_count = snapshot.success_count;
        job.error_count = snapshot.error_count;
        job.errors_truncated = log.dropped;
        job.errors = log.kept.into_values().collect();
        job.finished_at = Some(Utc::now());
        job.touch();
        progress.report(snapshot);

        if log.dropped > 0 {
            warn!(
                "Job {}: {} row error(s) beyond the first {} were counted but not kept",
                job.id, log.dropped, self.config.max_error_entries
            );
        }

        match stream {
            Err(err) => {
                job.status = JobStatus::Failed;
                Err(err.context(format!("Import job {} aborted while streaming", job.id)))
            }
            Ok(cancelled) => {
                job.status = if cancelled {
                    JobStatus::Cancelled
                } else if job.error_count > 0 && job.success_count == 0 {
                    JobStatus::Failed
                } else {
                    JobStatus::Completed
                };
                info!(
                    "Job {} {}: {} row(s) processed, {} succeeded, {} failed",
                    job.id, job.status, job.processed_rows, job.success_count, job.error_count
                );
                Ok(())
            }
        }
    }

    /// Returns whether the stream was cancelled, plus the collected errors.
    fn fan_out(
        &self,
        source: &mut SourceFile,
        context: &RowContext<'_>,
        counters: &Counters,
        progress: &dyn ProgressReporter,
    ) -> (Result<bool>, ErrorLog) {
        let workers = self.config.worker_count.max(1);
        let (task_tx, task_rx) = bounded::<RowTask>(workers * 2);
        let (outcome_tx, outcome_rx) = unbounded::<RowOutcome>();

        thread::scope(|scope| {
            for worker_id in 0..workers {
                let tasks = task_rx.clone();
                let outcomes = outcome_tx.clone();
                scope.spawn(move || run_worker(worker_id, context, tasks, outcomes));
            }
            drop(task_rx);
            drop(outcome_tx);

            let collector = scope.spawn(|| {
                collect(
                    outcome_rx,
                    counters,
                    progress,
                    self.config.progress_interval,
                    self.config.max_error_entries,
                )
            });

            let stream = self.produce(source, task_tx, counters);
            let log = collector
                .join()
                .unwrap_or_else(|_| ErrorLog::new(self.config.max_error_entries));
            (stream, log)
        })
    }

    fn produce(
        &self,
        source: &mut SourceFile,
        tasks: Sender<RowTask>,
        counters: &Counters,
    ) -> Result<bool> {
        let mut row = 0usize;
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                info!("Cancellation requested after {row} row(s)");
                return Ok(true);
            }
            let Some(record) = source.next_record()? else {
                return Ok(false);
            };
            row += 1;
            let raw = source.decode(&record);
            counters.total.fetch_add(1, Ordering::SeqCst);
            tasks
                .send(RowTask { row, raw })
                .map_err(|_| anyhow!("All import workers stopped before row {row}"))?;
        }
    }
}

fn run_worker(
    worker_id: usize,
    context: &RowContext<'_>,
    tasks: Receiver<RowTask>,
    outcomes: Sender<RowOutcome>,
) {
    debug!("Import worker {worker_id} started");
    for task in tasks {
        let mut mapped = MappedRow::new();
        let result = process_row(context, &task.raw, &mut mapped).map_err(|err| RowError {
            row: task.row,
            data: Value::Object(mapped),
            message: format!("{err:#}"),
        });
        if outcomes
            .send(RowOutcome {
                row: task.row,
                result,
            })
            .is_err()
        {
            break;
        }
    }
    debug!("Import worker {worker_id} finished");
}

/// The per-row contract: map, normalize enums, resolve references, sanitize
/// foreign keys, stamp the creator, create. `mapped` holds the row as it
/// stood when an error occurred.
fn process_row(context: &RowContext<'_>, raw: &RawRow, mapped: &mut MappedRow) -> Result<RecordId> {
    *mapped = context.mapping.apply(raw);
    enums::normalize_row(context.catalog, context.entity, mapped);
    if !context.resolver.is_noop() {
        context
            .resolver
            .resolve(mapped)
            .context("Resolving references")?;
    }
    sanitize_foreign_keys(&context.schema.foreign_keys, mapped);
    mapped.insert(CREATED_BY_FIELD.to_string(), Value::from(context.actor));
    context.store.create(context.entity, mapped)
}

/// Coerces unset, empty, and zero foreign keys to null.
pub fn sanitize_foreign_keys(foreign_keys: &[String], row: &mut MappedRow) {
    for key in foreign_keys {
        if !identifier_is_set(row.get(key)) {
            row.insert(key.clone(), Value::Null);
        }
    }
}

fn collect(
    outcomes: Receiver<RowOutcome>,
    counters: &Counters,
    progress: &dyn ProgressReporter,
    interval: usize,
    max_errors: usize,
) -> ErrorLog {
    let mut log = ErrorLog::new(max_errors);
    let interval = interval.max(1);
    for outcome in outcomes {
        match outcome.result {
            Ok(id) => {
                debug!("Row {} stored as record {id}", outcome.row);
                counters.success.fetch_add(1, Ordering::SeqCst);
            }
            Err(error) => {
                warn!("Row {} failed: {}", outcome.row, error.message);
                counters.error.fetch_add(1, Ordering::SeqCst);
                log.push(error);
            }
        }
        let processed = counters.processed.fetch_add(1, Ordering::SeqCst) + 1;
        if processed % interval == 0 {
            progress.report(counters.snapshot());
        }
    }
    log
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn foreign_keys_are_nulled_when_unset() {
        let mut row = json!({"company_id": "", "contact_id": 0, "stage_id": 4})
            .as_object()
            .cloned()
            .unwrap();
        let keys = vec![
            "company_id".to_string(),
            "contact_id".to_string(),
            "stage_id".to_string(),
            "pipeline_id".to_string(),
        ];
        sanitize_foreign_keys(&keys, &mut row);
        assert_eq!(row["company_id"], Value::Null);
        assert_eq!(row["contact_id"], Value::Null);
        assert_eq!(row["stage_id"], json!(4));
        assert_eq!(row["pipeline_id"], Value::Null);
    }

    #[test]
    fn error_log_keeps_lowest_rows() {
        let mut log = ErrorLog::new(2);
        for row in [9, 3, 7, 1] {
            log.push(RowError {
                row,
                data: Value::Null,
                message: "boom".into(),
            });
        }
        assert_eq!(log.kept.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(log.dropped, 2);
    }
}
