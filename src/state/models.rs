use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// File name of the state artifact inside a workspace.
pub const STATE_FILE: &str = "terraform.tfstate";

/// Terraform state file, schema version 4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateV4 {
    pub version: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub terraform_version: String,
    pub serial: u64,
    #[serde(default)]
    pub lineage: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub outputs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceStateV4>,
}

impl StateV4 {
    /// An empty version-4 state. Serial starts at 1 so a seeded file reads
    /// as newer than no state at all.
    pub fn new() -> Self {
        Self {
            version: 4,
            terraform_version: String::new(),
            serial: 1,
            lineage: String::new(),
            outputs: Map::new(),
            resources: Vec::new(),
        }
    }

    /// Attributes of the first instance of the first resource, if any.
    /// Workspaces hold exactly one resource with one instance.
    pub fn attributes(&self) -> Option<&Value> {
        self.resources
            .first()?
            .instances
            .first()
            .map(|i| &i.attributes)
    }
}

impl Default for StateV4 {
    fn default() -> Self {
        Self::new()
    }
}

/// One managed resource within a state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStateV4 {
    pub mode: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<InstanceObjectStateV4>,
}

/// One instance of a managed resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceObjectStateV4 {
    pub schema_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub attributes: Value,
}

/// Read and parse the state file the provisioner maintains in `dir`.
pub async fn read_state_file(dir: &Path) -> Result<StateV4> {
    let path = dir.join(STATE_FILE);
    let raw = tokio::fs::read(&path).await.map_err(|e| Error::StateRead {
        path: path.clone(),
        source: Box::new(e),
    })?;
    serde_json::from_slice(&raw).map_err(|e| Error::StateRead {
        path,
        source: Box::new(e),
    })
}
