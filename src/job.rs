//! The import job aggregate and its on-disk store.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{entities::EntityType, error::ImportError, mapping::ColumnMapping};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(anyhow::anyhow!("Unknown job status '{other}'")),
        }
    }
}

/// One failed row: its 1-based data row number, the mapped values at the
/// point of failure, and the error message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowError {
    pub row: usize,
    pub data: Value,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportJob {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub original_filename: String,
    pub file_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_sha256: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub total_rows: usize,
    #[serde(default)]
    pub processed_rows: usize,
    #[serde(default)]
    pub success_count: usize,
    #[serde(default)]
    pub error_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<ColumnMapping>,
    #[serde(default)]
    pub errors: Vec<RowError>,
    /// Row errors counted but not kept in `errors`.
    #[serde(default)]
    pub errors_truncated: usize,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn new(
        entity_type: EntityType,
        original_filename: impl Into<String>,
        file_path: PathBuf,
        created_by: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            entity_type,
            original_filename: original_filename.into(),
            file_path,
            file_sha256: None,
            status: JobStatus::Pending,
            total_rows: 0,
            processed_rows: 0,
            success_count: 0,
            error_count: 0,
            mapping: None,
            errors: Vec::new(),
            errors_truncated: 0,
            created_by,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn ensure_pending(&self, operation: &'static str) -> Result<(), ImportError> {
        if self.status == JobStatus::Pending {
            Ok(())
        } else {
            Err(ImportError::NotPending {
                id: self.id,
                status: self.status,
                operation,
            })
        }
    }

    pub fn mapping(&self) -> Result<&ColumnMapping, ImportError> {
        self.mapping
            .as_ref()
            .ok_or(ImportError::MappingMissing(self.id))
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub entity_type: Option<EntityType>,
    pub status: Option<JobStatus>,
    pub created_by: Option<i64>,
}

impl JobQuery {
    pub fn matches(&self, job: &ImportJob) -> bool {
        self.entity_type.is_none_or(|entity| job.entity_type == entity)
            && self.status.is_none_or(|status| job.status == status)
            && self.created_by.is_none_or(|actor| job.created_by == actor)
    }
}

/// One JSON document per job under a directory.
#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).with_context(|| format!("Creating job directory {root:?}"))?;
        Ok(Self { root })
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    /// Writes through a temporary file so pollers never read a torn document.
    pub fn save(&self, job: &ImportJob) -> Result<()> {
        let target = self.path_for(job.id);
        let staging = target.with_extension("json.tmp");
        let serialized = serde_json::to_vec_pretty(job).context("Serializing import job")?;
        fs::write(&staging, serialized)
            .with_context(|| format!("Writing import job {staging:?}"))?;
        fs::rename(&staging, &target)
            .with_context(|| format!("Replacing import job {target:?}"))
    }

    pub fn load(&self, id: Uuid) -> Result<ImportJob> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(ImportError::JobNotFound(id).into());
        }
        read_job(&path)
    }

    pub fn list(&self, query: &JobQuery) -> Result<Vec<ImportJob>> {
        let mut jobs = Vec::new();
        for entry in
            fs::read_dir(&self.root).with_context(|| format!("Listing {:?}", self.root))?
        {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let job = read_job(&path)?;
            if query.matches(&job) {
                jobs.push(job);
            }
        }
        Ok(jobs
            .into_iter()
            .sorted_by(|a, b| b.created_at.cmp(&a.created_at))
            .collect())
    }
}

fn read_job(path: &Path) -> Result<ImportJob> {
    let raw = fs::read(path).with_context(|| format!("Reading import job {path:?}"))?;
    serde_json::from_slice(&raw).with_context(|| format!("Parsing import job {path:?}"))
}

pub fn parse_job_id(raw: &str) -> Result<Uuid, ImportError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ImportError::InvalidJobId(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn jobs_round_trip_and_filter() {
        let dir = tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs")).unwrap();
        let contacts = ImportJob::new(EntityType::Contacts, "a.csv", "a.csv".into(), 1);
        let mut deals = ImportJob::new(EntityType::Deals, "b.csv", "b.csv".into(), 2);
        deals.status = JobStatus::Completed;
        store.save(&contacts).unwrap();
        store.save(&deals).unwrap();

        assert_eq!(store.load(contacts.id).unwrap(), contacts);
        let completed = store
            .list(&JobQuery {
                status: Some(JobStatus::Completed),
                ..JobQuery::default()
            })
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, deals.id);
        assert_eq!(store.list(&JobQuery::default()).unwrap().len(), 2);
    }

    #[test]
    fn missing_job_is_an_input_error() {
        let dir = tempdir().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        let err = store.load(Uuid::new_v4()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ImportError>(),
            Some(ImportError::JobNotFound(_))
        ));
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert!(matches!(
            parse_job_id("not-a-uuid"),
            Err(ImportError::InvalidJobId(_))
        ));
    }

    #[test]
    fn only_pending_jobs_accept_changes() {
        let mut job = ImportJob::new(EntityType::Leads, "c.csv", "c.csv".into(), 1);
        assert!(job.ensure_pending("mapping").is_ok());
        job.status = JobStatus::Failed;
        assert!(matches!(
            job.ensure_pending("mapping"),
            Err(ImportError::NotPending { status: JobStatus::Failed, .. })
        ));
    }
}
