use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::connector::SourceRecord;
use crate::database::entities::migration_projects::Strategy;
use crate::mapping::FieldMappingSpec;

/// Declarative description of a migration run, loaded from YAML. Used by the
/// CLI to drive a full migration against in-memory connectors, mostly for
/// demos and smoke testing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub name: String,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub engine: EngineConfig,
    pub objects: Vec<ObjectPlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectPlan {
    pub name: String,
    /// Field names the destination schema exposes for this object type.
    #[serde(default)]
    pub destination_fields: Vec<String>,
    /// Destination fields a mapping set must cover.
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Explicit mappings. Left empty, the engine suggests them from the
    /// source and destination schemas.
    #[serde(default)]
    pub mappings: Vec<FieldMappingSpec>,
    #[serde(default)]
    pub records: Vec<RecordSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSeed {
    pub id: String,
    #[serde(default)]
    pub fields: IndexMap<String, serde_json::Value>,
}

impl From<RecordSeed> for SourceRecord {
    fn from(seed: RecordSeed) -> Self {
        SourceRecord {
            id: seed.id,
            fields: seed.fields,
        }
    }
}

impl ObjectPlan {
    /// Field names present across the seeded records, first-seen order.
    pub fn source_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for record in &self.records {
            for name in record.fields.keys() {
                if !fields.iter().any(|f| f == name) {
                    fields.push(name.clone());
                }
            }
        }
        fields
    }
}

impl MigrationPlan {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("failed to parse migration plan")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read plan file {}", path.display()))?;
        Self::from_yaml(&content)
    }
}
