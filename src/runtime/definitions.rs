//! Read-only view of deployed process definitions.
//!
//! Parsing and validating process graphs happens elsewhere; the core only needs to know which
//! definitions declare data and connectors (to decide which archival steps run) and who
//! supervises a definition.

use anyhow::Context as AnyhowContext;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::StoreError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowNodeDefinitionInfo {
    pub id: u64,
    pub name: String,
    pub has_data: bool,
    pub has_connectors: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessDefinitionInfo {
    pub id: u64,
    pub name: String,
    pub version: String,
    /// Declares process-level data instances.
    pub has_data: bool,
    /// Declares process-level connectors.
    pub has_connectors: bool,
    pub flow_nodes: HashMap<u64, FlowNodeDefinitionInfo>,
    /// Users allowed to supervise instances of this definition.
    pub supervisors: Vec<u64>,
}

impl ProcessDefinitionInfo {
    pub fn new(id: u64, name: &str, version: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            version: version.to_string(),
            ..Default::default()
        }
    }

    pub fn with_data(mut self) -> Self {
        self.has_data = true;
        self
    }

    pub fn with_connectors(mut self) -> Self {
        self.has_connectors = true;
        self
    }

    pub fn flow_node(mut self, node: FlowNodeDefinitionInfo) -> Self {
        self.flow_nodes.insert(node.id, node);
        self
    }

    pub fn supervised_by(mut self, user_id: u64) -> Self {
        self.supervisors.push(user_id);
        self
    }
}

#[async_trait]
pub trait DefinitionLookup: Send + Sync {
    async fn process_definition(&self, id: u64) -> Result<Option<ProcessDefinitionInfo>, StoreError>;

    /// Ids of every definition `user_id` supervises.
    async fn supervised_definition_ids(&self, user_id: u64) -> Result<Vec<u64>, StoreError>;

    async fn flow_node_definition(
        &self,
        process_definition_id: u64,
        flow_node_definition_id: u64,
    ) -> Result<Option<FlowNodeDefinitionInfo>, StoreError> {
        Ok(self
            .process_definition(process_definition_id)
            .await?
            .and_then(|d| d.flow_nodes.get(&flow_node_definition_id).cloned()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryDefinitions {
    definitions: Arc<DashMap<u64, ProcessDefinitionInfo>>,
}

impl InMemoryDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a YAML list of process definitions.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let yaml_content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read definitions from {}", path.display()))?;
        Self::from_yaml(&yaml_content)
            .with_context(|| format!("Failed to deserialize definitions from {}", path.display()))
    }

    pub fn from_yaml(yaml_content: &str) -> anyhow::Result<Self> {
        let loaded = Self::new();
        if yaml_content.trim().is_empty() {
            return Ok(loaded);
        }
        let definitions: Vec<ProcessDefinitionInfo> = serde_yaml::from_str(yaml_content)?;
        for definition in definitions {
            loaded.register(definition);
        }
        Ok(loaded)
    }

    pub fn register(&self, definition: ProcessDefinitionInfo) {
        self.definitions.insert(definition.id, definition);
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[async_trait]
impl DefinitionLookup for InMemoryDefinitions {
    async fn process_definition(&self, id: u64) -> Result<Option<ProcessDefinitionInfo>, StoreError> {
        Ok(self.definitions.get(&id).map(|d| d.value().clone()))
    }

    async fn supervised_definition_ids(&self, user_id: u64) -> Result<Vec<u64>, StoreError> {
        let mut ids: Vec<u64> = self
            .definitions
            .iter()
            .filter(|d| d.supervisors.contains(&user_id))
            .map(|d| d.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}
