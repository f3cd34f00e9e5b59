//! Entity catalog: the closed set of importable entity types and the static
//! per-entity tables (enumerations, required fields, references, templates).
//!
//! The catalog is an immutable value handed to the pipeline. The built-in
//! copy is embedded from `config/entities.yaml`; [`EntityCatalog::load`]
//! substitutes another document (tests use this for fixtures).

use std::{collections::BTreeMap, fmt, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

use crate::{config, error::ImportError};

const BUILTIN_CATALOG: &str = include_str!("../config/entities.yaml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Contacts,
    Companies,
    Leads,
    Deals,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::Contacts,
        EntityType::Companies,
        EntityType::Leads,
        EntityType::Deals,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Contacts => "contacts",
            EntityType::Companies => "companies",
            EntityType::Leads => "leads",
            EntityType::Deals => "deals",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        EntityType::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ImportError::UnknownEntityType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Company,
    Contact,
    PipelineStage,
}

/// A human-readable column resolved to an identifier before persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferenceField {
    pub field: String,
    pub kind: ReferenceKind,
    pub target: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Template {
    pub headers: Vec<String>,
    #[serde(default)]
    pub example: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitySchema {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub numeric: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<String>,
    #[serde(default)]
    pub references: Vec<ReferenceField>,
    #[serde(default)]
    pub enums: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub template: Template,
}

impl EntitySchema {
    pub fn enum_values(&self, field: &str) -> Option<&[String]> {
        self.enums.get(field).map(Vec::as_slice)
    }

    /// Every field name this entity knows about, for name-based suggestions.
    pub fn known_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        let sources = self
            .template
            .headers
            .iter()
            .chain(&self.required)
            .chain(&self.numeric)
            .chain(&self.foreign_keys)
            .chain(self.enums.keys())
            .chain(self.references.iter().map(|reference| &reference.field));
        for name in sources {
            if !fields.contains(&name.as_str()) {
                fields.push(name.as_str());
            }
        }
        fields
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityCatalog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_version: Option<String>,
    pub entities: BTreeMap<EntityType, EntitySchema>,
}

impl EntityCatalog {
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_CATALOG).context("Parsing built-in entity catalog")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let catalog: EntityCatalog = config::load_yaml(path)
            .with_context(|| format!("Loading entity catalog from {path:?}"))?;
        catalog.ensure_complete()?;
        Ok(catalog)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let catalog: EntityCatalog = config::parse_yaml(raw)?;
        catalog.ensure_complete()?;
        Ok(catalog)
    }

    fn ensure_complete(&self) -> Result<()> {
        for entity in EntityType::ALL {
            ensure!(
                self.entities.contains_key(&entity),
                "Entity catalog has no entry for '{entity}'"
            );
        }
        Ok(())
    }

    pub fn schema(&self, entity: EntityType) -> Result<&EntitySchema> {
        self.entities
            .get(&entity)
            .ok_or_else(|| anyhow!("Entity catalog has no entry for '{entity}'"))
    }

    /// Valid values for `(entity, field)`, if that field is enumerated.
    pub fn enum_values(&self, entity: EntityType, field: &str) -> Option<&[String]> {
        self.entities
            .get(&entity)
            .and_then(|schema| schema.enum_values(field))
    }

    /// Renders the template header plus the example row as CSV text.
    pub fn template_csv(&self, entity: EntityType) -> Result<String> {
        let template = &self.schema(entity)?.template;
        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        writer
            .write_record(&template.headers)
            .context("Writing template header")?;
        if !template.example.is_empty() {
            writer
                .write_record(&template.example)
                .context("Writing template example row")?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| anyhow!("Flushing template writer: {err}"))?;
        String::from_utf8(bytes).context("Template is not valid UTF-8")
    }
}
