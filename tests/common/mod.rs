#![allow(dead_code)]

use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use crm_import::{
    config::ImportConfig,
    entities::{EntityCatalog, EntityType},
    service::ImportService,
    store::{EntityStore, MemoryStore, Record, RecordId, StageRef},
};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Where the service keeps jobs and uploads.
    pub fn workspace(&self) -> PathBuf {
        self.temp_dir.path().join("ws")
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }

    pub fn service(&self, store: Arc<dyn EntityStore>, config: ImportConfig) -> ImportService {
        ImportService::open(
            &self.workspace(),
            Arc::new(EntityCatalog::builtin().expect("builtin catalog")),
            store,
            config,
        )
        .expect("open service")
    }
}

/// UTF-16LE bytes with a byte-order mark.
pub fn utf16le(text: &str) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xFE];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes
}

type FailRule = Box<dyn Fn(&Record) -> bool + Send + Sync>;

/// A memory store whose `create` fails for records matching a rule.
pub struct FailingStore {
    pub inner: MemoryStore,
    rule: FailRule,
}

impl FailingStore {
    pub fn new(rule: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        Self {
            inner: MemoryStore::new(),
            rule: Box::new(rule),
        }
    }

    /// Fails records whose `field` equals one of `values`.
    pub fn rejecting(field: &'static str, values: &[&str]) -> Self {
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        Self::new(move |record| {
            record
                .get(field)
                .and_then(|value| value.as_str())
                .is_some_and(|value| values.iter().any(|v| v == value))
        })
    }
}

impl EntityStore for FailingStore {
    fn create(&self, entity: EntityType, record: &Record) -> Result<RecordId> {
        if (self.rule)(record) {
            bail!("constraint violation on {entity}");
        }
        self.inner.create(entity, record)
    }

    fn find_company_by_name(&self, name: &str) -> Result<Option<RecordId>> {
        self.inner.find_company_by_name(name)
    }

    fn find_contact_by_name(&self, first_name: &str, last_name: &str) -> Result<Option<RecordId>> {
        self.inner.find_contact_by_name(first_name, last_name)
    }

    fn find_contact_by_email(&self, email: &str) -> Result<Option<RecordId>> {
        self.inner.find_contact_by_email(email)
    }

    fn find_stage_by_name(&self, name: &str) -> Result<Option<StageRef>> {
        self.inner.find_stage_by_name(name)
    }
}

/// A leads CSV with `count` rows titled `Lead 1..=count`.
pub fn lead_titles(count: usize) -> String {
    let mut csv = String::from("Title,Priority\n");
    for row in 1..=count {
        csv.push_str(&format!("Lead {row},High\n"));
    }
    csv
}

/// Serves `data`, then fails every later read as a detached disk would.
pub struct FailingReader {
    data: Cursor<Vec<u8>>,
}

impl FailingReader {
    pub fn new(data: &[u8]) -> Self {
        Self {
            data: Cursor::new(data.to_vec()),
        }
    }
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.data.read(buf)? {
            0 => Err(io::Error::other("device went away")),
            read => Ok(read),
        }
    }
}
