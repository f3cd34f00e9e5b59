//! Entry points for the outer layers: upload, inspect, map, validate, and
//! process import jobs.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Result, ensure};
use log::{info, warn};
use serde::{Serialize, Serializer, ser::SerializeMap};
use uuid::Uuid;

use crate::{
    config::ImportConfig,
    entities::{EntityCatalog, EntityType},
    error::ImportError,
    executor::{Executor, NoopProgress, ProgressReporter, ProgressSnapshot},
    job::{ImportJob, JobQuery, JobStatus, JobStore},
    mapping::{self, ColumnMapping, RawRow},
    source::SourceFile,
    storage::FileStorage,
    store::EntityStore,
    validate::{ValidationReport, Validator},
};

pub const JOBS_DIR: &str = "jobs";
pub const UPLOADS_DIR: &str = "uploads";

/// Headers plus the first few rows of an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub headers: Vec<String>,
    pub rows: Vec<PreviewRow>,
}

/// A previewed row in file column order. Serializes as a JSON object whose
/// keys keep that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewRow(RawRow);

impl PreviewRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(header, _)| header == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(_, value)| value.as_str())
    }
}

impl From<RawRow> for PreviewRow {
    fn from(row: RawRow) -> Self {
        Self(row)
    }
}

impl Serialize for PreviewRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (header, value) in &self.0 {
            map.serialize_entry(header, value)?;
        }
        map.end()
    }
}

/// Requests cooperative cancellation of a running `process` call.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct ImportService {
    catalog: Arc<EntityCatalog>,
    store: Arc<dyn EntityStore>,
    jobs: JobStore,
    files: FileStorage,
    config: ImportConfig,
    cancellations: Mutex<HashMap<Uuid, CancelHandle>>,
    running: Mutex<HashSet<Uuid>>,
}

impl ImportService {
    pub fn new(
        catalog: Arc<EntityCatalog>,
        store: Arc<dyn EntityStore>,
        jobs: JobStore,
        files: FileStorage,
        config: ImportConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            jobs,
            files,
            config,
            cancellations: Mutex::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Lays jobs and uploads out under `workspace`.
    pub fn open(
        workspace: &Path,
        catalog: Arc<EntityCatalog>,
        store: Arc<dyn EntityStore>,
        config: ImportConfig,
    ) -> Result<Self> {
        config.ensure_valid()?;
        let jobs = JobStore::open(workspace.join(JOBS_DIR))?;
        let files = FileStorage::open(workspace.join(UPLOADS_DIR))?;
        Ok(Self::new(catalog, store, jobs, files, config))
    }

    pub fn catalog(&self) -> &EntityCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn template(&self, entity: EntityType) -> Result<String> {
        self.catalog.template_csv(entity)
    }

    pub fn upload(&self, file: &Path, entity: EntityType, actor: i64) -> Result<ImportJob> {
        let mut job = ImportJob::new(entity, String::new(), file.to_path_buf(), actor);
        let stored = self.files.store(job.id, file)?;
        job.original_filename = stored.original_filename;
        job.file_path = stored.path;
        job.file_sha256 = Some(stored.sha256);
        self.jobs.save(&job)?;
        info!(
            "Uploaded '{}' as {} import job {}",
            job.original_filename, job.entity_type, job.id
        );
        Ok(job)
    }

    pub fn preview(&self, id: Uuid) -> Result<Preview> {
        let job = self.jobs.load(id)?;
        let mut source = SourceFile::open(&job.file_path, self.config.input_encoding.as_deref())?;
        let headers = source.headers().to_vec();
        let mut rows = Vec::new();
        while rows.len() < self.config.preview_rows {
            let Some(record) = source.next_record()? else {
                break;
            };
            rows.push(PreviewRow::from(source.decode(&record)));
        }
        Ok(Preview { headers, rows })
    }

    pub fn update_entity_type(&self, id: Uuid, entity: EntityType) -> Result<ImportJob> {
        let mut job = self.jobs.load(id)?;
        job.ensure_pending("changing the entity type")?;
        job.entity_type = entity;
        job.touch();
        self.jobs.save(&job)?;
        info!("Job {id} now imports {entity}");
        Ok(job)
    }

    pub fn map_columns(&self, id: Uuid, mapping: ColumnMapping) -> Result<ImportJob> {
        ensure!(!mapping.is_empty(), "Column mapping for job {id} has no entries");
        let mut job = self.jobs.load(id)?;
        job.ensure_pending("mapping columns")?;
        job.mapping = Some(mapping);
        job.touch();
        self.jobs.save(&job)?;
        info!("Stored column mapping for job {id}");
        Ok(job)
    }

    /// Proposes a structured mapping from the file's headers without storing it.
    pub fn suggest_mapping(&self, id: Uuid) -> Result<ColumnMapping> {
        let job = self.jobs.load(id)?;
        let source = SourceFile::open(&job.file_path, self.config.input_encoding.as_deref())?;
        let schema = self.catalog.schema(job.entity_type)?;
        Ok(ColumnMapping::Structured(mapping::suggest(
            source.headers(),
            schema,
        )))
    }

    pub fn validate(&self, id: Uuid) -> Result<ValidationReport> {
        let job = self.jobs.load(id)?;
        Validator::new(&self.catalog, &self.config).validate(&job)
    }

    /// The handle that cancels `process` for `id`, whether it is already
    /// running or starts later.
    pub fn cancel_handle(&self, id: Uuid) -> CancelHandle {
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .clone()
    }

    pub fn process(&self, id: Uuid) -> Result<ImportJob> {
        self.process_with_progress(id, &NoopProgress)
    }

    /// Runs the job to a terminal status, persisting progress every
    /// `progress_interval` rows and forwarding each snapshot to `observer`.
    ///
    /// A job runs at most once: a call made while another call is processing
    /// the same job fails with [`ImportError::NotPending`].
    pub fn process_with_progress(
        &self,
        id: Uuid,
        observer: &dyn ProgressReporter,
    ) -> Result<ImportJob> {
        let encoding = self.config.input_encoding.as_deref();
        self.process_from(id, observer, |job| SourceFile::open(&job.file_path, encoding))
    }

    fn process_from(
        &self,
        id: Uuid,
        observer: &dyn ProgressReporter,
        open: impl FnOnce(&ImportJob) -> Result<SourceFile>,
    ) -> Result<ImportJob> {
        let _claim = RunClaim::acquire(&self.running, id)?;
        let mut job = self.jobs.load(id)?;
        job.ensure_pending("processing")?;
        let handle = self.cancel_handle(id);
        let reporter = PersistingProgress {
            jobs: &self.jobs,
            shadow: Mutex::new(job.clone()),
            observer,
        };
        let executor = Executor::new(&self.catalog, self.store.as_ref(), &self.config, &handle.0);
        let outcome = executor.run_with(&mut job, open, &reporter);
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);

        match outcome {
            Ok(()) => {
                self.jobs.save(&job)?;
                Ok(job)
            }
            Err(err) if job.status == JobStatus::Failed => {
                if let Err(save_err) = self.jobs.save(&job) {
                    warn!("Could not persist failed job {id}: {save_err:#}");
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<ImportJob> {
        self.jobs.load(id)
    }

    pub fn get_all(&self, query: &JobQuery) -> Result<Vec<ImportJob>> {
        self.jobs.list(query)
    }
}

/// Marks a job as being processed by this service until dropped.
struct RunClaim<'a> {
    running: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl<'a> RunClaim<'a> {
    fn acquire(running: &'a Mutex<HashSet<Uuid>>, id: Uuid) -> Result<Self, ImportError> {
        let mut running_ids = running.lock().unwrap_or_else(PoisonError::into_inner);
        if !running_ids.insert(id) {
            return Err(ImportError::NotPending {
                id,
                status: JobStatus::Processing,
                operation: "processing",
            });
        }
        Ok(Self { running, id })
    }
}

impl Drop for RunClaim<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Writes each progress snapshot onto a copy of the job and saves it, so a
/// poller sees counts advance while the run is in flight.
struct PersistingProgress<'a> {
    jobs: &'a JobStore,
    shadow: Mutex<ImportJob>,
    observer: &'a dyn ProgressReporter,
}

impl ProgressReporter for PersistingProgress<'_> {
    fn report(&self, snapshot: ProgressSnapshot) {
        {
            let mut job = self.shadow.lock().unwrap_or_else(PoisonError::into_inner);
            if job.status != JobStatus::Processing {
                job.status = JobStatus::Processing;
                job.errors.clear();
                job.errors_truncated = 0;
                job.started_at = Some(chrono::Utc::now());
            }
            job.total_rows = snapshot.total_rows;
            job.processed_rows = snapshot.processed_rows;
            job.success_count = snapshot.success_count;
            job.error_count = snapshot.error_count;
            job.touch();
            if let Err(err) = self.jobs.save(&job) {
                warn!("Could not persist progress for job {}: {err:#}", job.id);
            }
        }
        self.observer.report(snapshot);
    }
}
