//! Runtime knobs for the import pipeline plus the YAML helpers shared by
//! every document the crate reads (config, catalog, mapping files).

use std::{fs, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

pub const DEFAULT_VALIDATION_SAMPLE_ROWS: usize = 100;
pub const DEFAULT_PREVIEW_ROWS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImportConfig {
    /// Rows persisted concurrently during execution.
    pub worker_count: usize,
    pub validation_sample_rows: usize,
    pub preview_rows: usize,
    /// Row errors kept on the job; further errors are only counted.
    pub max_error_entries: usize,
    /// Row numbers listed per aggregated validation warning.
    pub max_warning_rows: usize,
    /// Rows between persisted progress snapshots.
    pub progress_interval: usize,
    /// Encoding label for files without a 16-bit byte-order mark.
    pub input_encoding: Option<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            validation_sample_rows: DEFAULT_VALIDATION_SAMPLE_ROWS,
            preview_rows: DEFAULT_PREVIEW_ROWS,
            max_error_entries: 1000,
            max_warning_rows: 20,
            progress_interval: 50,
            input_encoding: None,
        }
    }
}

impl ImportConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config: ImportConfig = load_yaml(path)?;
        config.ensure_valid()?;
        Ok(config)
    }

    pub fn ensure_valid(&self) -> Result<()> {
        ensure!(self.worker_count > 0, "worker_count must be positive");
        ensure!(
            self.progress_interval > 0,
            "progress_interval must be positive"
        );
        if let Some(label) = &self.input_encoding {
            crate::io_utils::resolve_encoding(Some(label))?;
        }
        Ok(())
    }
}

/// Parses YAML (or JSON, which YAML accepts) into `T`.
pub fn parse_yaml<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_yaml::from_str(raw).context("Parsing YAML document")
}

pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("Reading YAML file {path:?}"))?;
    parse_yaml(&raw).with_context(|| format!("Parsing YAML file {path:?}"))
}

pub fn save_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let serialized = serde_yaml::to_string(value).context("Serializing YAML document")?;
    fs::write(path, serialized).with_context(|| format!("Writing YAML file {path:?}"))
}
