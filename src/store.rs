//! The entity-store collaborator: record creation plus the name lookups the
//! reference resolver needs.
//!
//! [`MemoryStore`] is a thread-safe implementation that can be snapshotted
//! to JSON; the CLI keeps one per workspace and the tests use it directly.

use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    sync::{Mutex, MutexGuard},
};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entities::EntityType;

pub type RecordId = i64;
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRef {
    pub stage_id: RecordId,
    pub pipeline_id: RecordId,
}

pub trait EntityStore: Send + Sync {
    /// Persists a record and returns its new identifier.
    fn create(&self, entity: EntityType, record: &Record) -> Result<RecordId>;

    fn find_company_by_name(&self, name: &str) -> Result<Option<RecordId>>;

    fn find_contact_by_name(&self, first_name: &str, last_name: &str)
    -> Result<Option<RecordId>>;

    fn find_contact_by_email(&self, email: &str) -> Result<Option<RecordId>>;

    fn find_stage_by_name(&self, name: &str) -> Result<Option<StageRef>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStage {
    pub id: RecordId,
    pub pipeline_id: RecordId,
    pub name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    next_id: RecordId,
    #[serde(default)]
    records: BTreeMap<EntityType, Vec<Record>>,
    #[serde(default)]
    stages: Vec<PipelineStage>,
}

impl StoreState {
    fn allocate_id(&mut self) -> RecordId {
        self.next_id += 1;
        self.next_id
    }

    fn records(&self, entity: EntityType) -> &[Record] {
        self.records.get(&entity).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

fn same_name(left: &str, right: &str) -> bool {
    left.trim().to_lowercase() == right.trim().to_lowercase()
}

fn field_matches(record: &Record, field: &str, wanted: &str) -> bool {
    record
        .get(field)
        .and_then(Value::as_str)
        .is_some_and(|value| same_name(value, wanted))
}

fn record_id(record: &Record) -> Option<RecordId> {
    record.get("id").and_then(Value::as_i64)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Reading entity store snapshot {path:?}"))?;
        let state: StoreState = serde_json::from_str(&raw)
            .with_context(|| format!("Parsing entity store snapshot {path:?}"))?;
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let state = self.lock()?;
        let serialized =
            serde_json::to_string_pretty(&*state).context("Serializing entity store")?;
        fs::write(path, serialized)
            .with_context(|| format!("Writing entity store snapshot {path:?}"))
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("Entity store lock poisoned"))
    }

    pub fn add_stage(&self, pipeline_id: RecordId, name: &str) -> Result<RecordId> {
        let mut state = self.lock()?;
        let id = state.allocate_id();
        state.stages.push(PipelineStage {
            id,
            pipeline_id,
            name: name.to_string(),
        });
        Ok(id)
    }

    pub fn records(&self, entity: EntityType) -> Result<Vec<Record>> {
        Ok(self.lock()?.records(entity).to_vec())
    }

    pub fn count(&self, entity: EntityType) -> Result<usize> {
        Ok(self.lock()?.records(entity).len())
    }

    fn find_id<F>(&self, entity: EntityType, predicate: F) -> Result<Option<RecordId>>
    where
        F: Fn(&Record) -> bool,
    {
        let state = self.lock()?;
        Ok(state
            .records(entity)
            .iter()
            .find(|record| predicate(record))
            .and_then(record_id))
    }
}

impl EntityStore for MemoryStore {
    fn create(&self, entity: EntityType, record: &Record) -> Result<RecordId> {
        let mut state = self.lock()?;
        let id = state.allocate_id();
        let mut stored = record.clone();
        stored.insert("id".to_string(), Value::from(id));
        state.records.entry(entity).or_default().push(stored);
        Ok(id)
    }

    fn find_company_by_name(&self, name: &str) -> Result<Option<RecordId>> {
        self.find_id(EntityType::Companies, |record| {
            field_matches(record, "name", name)
        })
    }

    fn find_contact_by_name(
        &self,
        first_name: &str,
        last_name: &str,
    ) -> Result<Option<RecordId>> {
        self.find_id(EntityType::Contacts, |record| {
            field_matches(record, "first_name", first_name)
                && (field_matches(record, "last_name", last_name)
                    || (last_name.is_empty() && !record.contains_key("last_name")))
        })
    }

    fn find_contact_by_email(&self, email: &str) -> Result<Option<RecordId>> {
        self.find_id(EntityType::Contacts, |record| {
            field_matches(record, "email", email)
        })
    }

    fn find_stage_by_name(&self, name: &str) -> Result<Option<StageRef>> {
        let state = self.lock()?;
        Ok(state
            .stages
            .iter()
            .find(|stage| same_name(&stage.name, name))
            .map(|stage| StageRef {
                stage_id: stage.id,
                pipeline_id: stage.pipeline_id,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(value: Value) -> Record {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn lookups_are_case_insensitive_exact_matches() {
        let store = MemoryStore::new();
        let acme = store
            .create(EntityType::Companies, &record(json!({"name": "Acme Corp"})))
            .unwrap();
        assert_eq!(store.find_company_by_name("ACME corp").unwrap(), Some(acme));
        assert_eq!(store.find_company_by_name("Acme").unwrap(), None);

        let ada = store
            .create(
                EntityType::Contacts,
                &record(json!({"first_name": "Ada", "last_name": "Lovelace", "email": "ada@example.com"})),
            )
            .unwrap();
        assert_eq!(store.find_contact_by_name("ada", "LOVELACE").unwrap(), Some(ada));
        assert_eq!(store.find_contact_by_email("Ada@Example.com").unwrap(), Some(ada));
    }

    #[test]
    fn stages_resolve_with_their_pipeline() {
        let store = MemoryStore::new();
        let stage = store.add_stage(7, "Proposal").unwrap();
        assert_eq!(
            store.find_stage_by_name("proposal").unwrap(),
            Some(StageRef {
                stage_id: stage,
                pipeline_id: 7
            })
        );
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entities.json");
        let store = MemoryStore::new();
        store
            .create(EntityType::Leads, &record(json!({"title": "Upgrade"})))
            .unwrap();
        store.save(&path).unwrap();

        let reloaded = MemoryStore::load(&path).unwrap();
        assert_eq!(reloaded.count(EntityType::Leads).unwrap(), 1);
        let next = reloaded
            .create(EntityType::Leads, &record(json!({"title": "Second"})))
            .unwrap();
        assert_eq!(next, 2);
    }
}
