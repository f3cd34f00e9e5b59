//! Replaces human-readable references (company name, contact name, stage
//! name) with identifiers of already-persisted records.
//!
//! A reference that matches nothing is dropped and its identifier stays
//! null; only store failures are errors. Lookups are memoized per resolver
//! (one resolver lives for one job execution).

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use anyhow::Result;
use log::debug;
use serde_json::Value;

use crate::{
    entities::{ReferenceField, ReferenceKind},
    mapping::MappedRow,
    store::{EntityStore, RecordId, StageRef},
};

pub const PIPELINE_ID_FIELD: &str = "pipeline_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Record(RecordId),
    Stage(StageRef),
}

type CacheKey = (ReferenceKind, String);

pub struct ReferenceResolver<'a> {
    store: &'a dyn EntityStore,
    references: &'a [ReferenceField],
    cache: Mutex<HashMap<CacheKey, Option<Resolution>>>,
}

/// True when an identifier field holds something other than null, an empty
/// string, or zero.
pub fn identifier_is_set(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => {
            let text = text.trim();
            !text.is_empty() && text != "0"
        }
        Some(Value::Number(number)) => number.as_f64() != Some(0.0),
        Some(_) => true,
    }
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(store: &'a dyn EntityStore, references: &'a [ReferenceField]) -> Self {
        Self {
            store,
            references,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.references.is_empty()
    }

    pub fn resolve(&self, row: &mut MappedRow) -> Result<()> {
        for reference in self.references {
            let Some(raw) = row.remove(&reference.field) else {
                continue;
            };
            let name = match &raw {
                Value::String(text) => text.trim().to_string(),
                Value::Number(number) => number.to_string(),
                _ => String::new(),
            };
            if name.is_empty() || identifier_is_set(row.get(&reference.target)) {
                continue;
            }
            match self.lookup(reference.kind, &name)? {
                Some(Resolution::Record(id)) => {
                    row.insert(reference.target.clone(), Value::from(id));
                }
                Some(Resolution::Stage(stage)) => {
                    row.insert(reference.target.clone(), Value::from(stage.stage_id));
                    row.insert(PIPELINE_ID_FIELD.to_string(), Value::from(stage.pipeline_id));
                }
                None => {
                    debug!(
                        "No {:?} named '{name}'; leaving {} unset",
                        reference.kind, reference.target
                    );
                    row.insert(reference.target.clone(), Value::Null);
                }
            }
        }
        Ok(())
    }

    fn lookup(&self, kind: ReferenceKind, name: &str) -> Result<Option<Resolution>> {
        let key = (kind, name.to_lowercase());
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(*hit);
        }
        let resolved = match kind {
            ReferenceKind::Company => self
                .store
                .find_company_by_name(name)?
                .map(Resolution::Record),
            ReferenceKind::Contact => self.lookup_contact(name)?.map(Resolution::Record),
            ReferenceKind::PipelineStage => {
                self.store.find_stage_by_name(name)?.map(Resolution::Stage)
            }
        };
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, resolved);
        Ok(resolved)
    }

    fn lookup_contact(&self, name: &str) -> Result<Option<RecordId>> {
        let mut tokens = name.split_whitespace();
        let first = tokens.next().unwrap_or_default();
        let last = tokens.collect::<Vec<_>>().join(" ");
        if let Some(id) = self.store.find_contact_by_name(first, &last)? {
            return Ok(Some(id));
        }
        self.store.find_contact_by_email(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entities::{EntityCatalog, EntityType},
        store::MemoryStore,
    };
    use serde_json::json;

    fn row(value: Value) -> MappedRow {
        value.as_object().cloned().unwrap()
    }

    fn deal_references() -> Vec<ReferenceField> {
        let catalog = EntityCatalog::builtin().unwrap();
        catalog
            .schema(EntityType::Deals)
            .unwrap()
            .references
            .clone()
    }

    #[test]
    fn unknown_company_is_dropped_without_error() {
        let store = MemoryStore::new();
        let references = deal_references();
        let resolver = ReferenceResolver::new(&store, &references);
        let mut deal = row(json!({"title": "X", "company_name": "NoSuchCo"}));
        resolver.resolve(&mut deal).unwrap();
        assert!(!deal.contains_key("company_name"));
        assert_eq!(deal.get("company_id"), Some(&Value::Null));
    }

    #[test]
    fn names_resolve_to_identifiers() {
        let store = MemoryStore::new();
        let company = store
            .create(EntityType::Companies, &row(json!({"name": "Acme"})))
            .unwrap();
        let contact = store
            .create(
                EntityType::Contacts,
                &row(json!({"first_name": "Grace", "last_name": "Brewster Hopper", "email": "grace@navy.mil"})),
            )
            .unwrap();
        let stage = store.add_stage(3, "Negotiation").unwrap();

        let references = deal_references();
        let resolver = ReferenceResolver::new(&store, &references);
        let mut deal = row(json!({
            "title": "Compiler",
            "company_name": "acme",
            "contact_name": "Grace Brewster Hopper",
            "stage_name": "NEGOTIATION"
        }));
        resolver.resolve(&mut deal).unwrap();
        assert_eq!(deal["company_id"], json!(company));
        assert_eq!(deal["contact_id"], json!(contact));
        assert_eq!(deal["stage_id"], json!(stage));
        assert_eq!(deal["pipeline_id"], json!(3));
        assert!(!deal.contains_key("stage_name"));
    }

    #[test]
    fn contact_falls_back_to_email() {
        let store = MemoryStore::new();
        let contact = store
            .create(
                EntityType::Contacts,
                &row(json!({"first_name": "Alan", "email": "alan@bletchley.uk"})),
            )
            .unwrap();
        let references = deal_references();
        let resolver = ReferenceResolver::new(&store, &references);
        let mut deal = row(json!({"contact_name": "ALAN@bletchley.uk"}));
        resolver.resolve(&mut deal).unwrap();
        assert_eq!(deal["contact_id"], json!(contact));
    }

    #[test]
    fn existing_identifier_skips_lookup() {
        let store = MemoryStore::new();
        store
            .create(EntityType::Companies, &row(json!({"name": "Acme"})))
            .unwrap();
        let references = deal_references();
        let resolver = ReferenceResolver::new(&store, &references);
        let mut deal = row(json!({"company_id": 99, "company_name": "Acme"}));
        resolver.resolve(&mut deal).unwrap();
        assert_eq!(deal["company_id"], json!(99));
        assert!(!deal.contains_key("company_name"));
    }

    #[test]
    fn identifier_presence_rules() {
        assert!(!identifier_is_set(None));
        assert!(!identifier_is_set(Some(&json!(null))));
        assert!(!identifier_is_set(Some(&json!(""))));
        assert!(!identifier_is_set(Some(&json!("0"))));
        assert!(!identifier_is_set(Some(&json!(0))));
        assert!(identifier_is_set(Some(&json!(12))));
        assert!(identifier_is_set(Some(&json!("12"))));
    }
}
