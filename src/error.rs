use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::job::JobStatus;

/// Input errors surfaced directly to the caller. No job state is changed
/// when one of these is returned.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Unknown entity type '{0}' (expected one of contacts, companies, leads, deals)")]
    UnknownEntityType(String),

    #[error("Malformed job id '{0}'")]
    InvalidJobId(String),

    #[error("Import job {0} not found")]
    JobNotFound(Uuid),

    #[error("Source file '{0}' does not exist")]
    MissingFile(PathBuf),

    #[error("Import job {0} has no column mapping")]
    MappingMissing(Uuid),

    #[error("Import job {id} is {status}; {operation} requires a pending job")]
    NotPending {
        id: Uuid,
        status: JobStatus,
        operation: &'static str,
    },
}
