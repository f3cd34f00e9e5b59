//! Upload storage: each uploaded file is copied under
//! `<root>/<job id>/<file name>` and fingerprinted.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use log::debug;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ImportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub original_filename: String,
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).with_context(|| format!("Creating upload directory {root:?}"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self, job_id: Uuid, source: &Path) -> Result<StoredFile> {
        if !source.is_file() {
            return Err(ImportError::MissingFile(source.to_path_buf()).into());
        }
        let original_filename = source
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Upload path {source:?} has no usable file name"))?;
        let bytes = fs::read(source).with_context(|| format!("Reading upload {source:?}"))?;
        let sha256 = format!("{:x}", Sha256::digest(&bytes));

        let directory = self.root.join(job_id.to_string());
        fs::create_dir_all(&directory)
            .with_context(|| format!("Creating upload directory {directory:?}"))?;
        let path = directory.join(&original_filename);
        fs::write(&path, &bytes).with_context(|| format!("Storing upload at {path:?}"))?;
        debug!(
            "Stored {} byte(s) from {:?} at {:?} (sha256 {})",
            bytes.len(),
            source,
            path,
            sha256
        );
        Ok(StoredFile {
            original_filename,
            path,
            sha256,
        })
    }
}
