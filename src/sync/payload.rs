//! JSON wire format exchanged between stores.
//!
//! ```json
//! {"Pipeline": [{"name": "...", "properties": {}, "custom_properties": {},
//!   "stages": [{"name": "...", "executions": [{"name": "", "type": "...",
//!     "properties": {"Execution_uuid": "..."}, "custom_properties": {},
//!     "events": [{"type": 3, "artifact": {"name": "...", "type": "Dataset", "uri": "..."}}]}]}]}]}
//! ```
use crate::metadata::{names, split_uuids, PropertyValues};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlmdPayload {
    #[serde(rename = "Pipeline", default)]
    pub pipelines: Vec<PipelineNode>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    pub create_time_since_epoch: u64,
    pub last_update_time_since_epoch: u64,
    pub properties: PropertyValues,
    pub custom_properties: PropertyValues,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_create_time_since_epoch: Option<u64>,
    pub stages: Vec<StageNode>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    pub create_time_since_epoch: u64,
    pub last_update_time_since_epoch: u64,
    pub properties: PropertyValues,
    pub custom_properties: PropertyValues,
    pub executions: Vec<ExecutionNode>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,

    /// Empty for ordinary executions, set for reusable ones.
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub create_time_since_epoch: u64,
    pub last_update_time_since_epoch: u64,
    pub properties: PropertyValues,
    pub custom_properties: PropertyValues,
    pub events: Vec<EventNode>,
}

impl ExecutionNode {
    pub fn is_reusable(&self) -> bool {
        !self.name.is_empty()
    }

    /// `None` if the execution carries no `Execution_uuid`.
    pub fn uuids(&self) -> Option<Vec<String>> {
        self.properties
            .get(names::EXECUTION_UUID)
            .map(|v| split_uuids(&v.to_text()))
            .filter(|uuids| !uuids.is_empty())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventNode {
    #[serde(rename = "type")]
    pub ty: i32,
    pub artifact: ArtifactNode,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub uri: String,
    pub create_time_since_epoch: u64,
    pub last_update_time_since_epoch: u64,
    pub properties: PropertyValues,
    pub custom_properties: PropertyValues,
}
