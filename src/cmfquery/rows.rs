//! Typed rows returned by [`CmfQuery`](super::CmfQuery).
use crate::metadata::{
    names, Artifact, ArtifactId, EventType, Execution, ExecutionId, PropertyValue, PropertyValues,
};
use indexmap::IndexMap;
use serde::Serialize;

/// Property columns of a row, in projection order.
pub type Columns = IndexMap<String, PropertyValue>;

const CUSTOM_PREFIX: &str = "custom_properties_";
const PROPERTY_PREFIX: &str = "properties_";

/// Flattens `properties` and then `custom_properties` into columns.
///
/// A key that collides with a fixed column or an earlier property is kept
/// under a prefixed name instead of overwriting it.
pub fn project(
    fixed: &[&str],
    properties: &PropertyValues,
    custom_properties: &PropertyValues,
) -> Columns {
    let mut columns = Columns::new();
    for (k, v) in properties {
        let key = if fixed.contains(&k.as_str()) {
            format!("{}{}", PROPERTY_PREFIX, k)
        } else {
            k.clone()
        };
        columns.insert(key, v.clone());
    }
    for (k, v) in custom_properties {
        let key = if fixed.contains(&k.as_str()) || columns.contains_key(k) {
            format!("{}{}", CUSTOM_PREFIX, k)
        } else {
            k.clone()
        };
        columns.insert(key, v.clone());
    }
    columns
}

const EXECUTION_FIXED: &[&str] = &[
    "id",
    "type",
    "name",
    "create_time_since_epoch",
    "last_update_time_since_epoch",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRow {
    pub id: ExecutionId,
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    pub create_time_since_epoch: u64,
    pub last_update_time_since_epoch: u64,
    #[serde(flatten)]
    pub columns: Columns,
}

impl ExecutionRow {
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.columns.get(key)
    }
}

impl From<&Execution> for ExecutionRow {
    fn from(execution: &Execution) -> Self {
        Self {
            id: execution.id,
            type_name: execution.type_name.clone(),
            name: execution.name.clone().unwrap_or_default(),
            create_time_since_epoch: execution.create_time_since_epoch.as_millis() as u64,
            last_update_time_since_epoch: execution.last_update_time_since_epoch.as_millis()
                as u64,
            columns: project(
                EXECUTION_FIXED,
                &execution.properties,
                &execution.custom_properties,
            ),
        }
    }
}

const ARTIFACT_FIXED: &[&str] = &[
    "id",
    "type",
    "uri",
    "name",
    "event",
    "create_time_since_epoch",
    "last_update_time_since_epoch",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactRow {
    pub id: ArtifactId,
    #[serde(rename = "type")]
    pub type_name: String,
    pub uri: String,
    pub name: String,

    /// `INPUT` or `OUTPUT` when the row describes an artifact relative to an execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<&'static str>,
    pub create_time_since_epoch: u64,
    pub last_update_time_since_epoch: u64,
    #[serde(flatten)]
    pub columns: Columns,
}

impl ArtifactRow {
    pub fn with_event(artifact: &Artifact, event: EventType) -> Self {
        Self {
            event: Some(event.label()),
            ..Self::from(artifact)
        }
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.columns.get(key)
    }
}

impl From<&Artifact> for ArtifactRow {
    fn from(artifact: &Artifact) -> Self {
        Self {
            id: artifact.id,
            type_name: artifact.type_name.clone(),
            uri: artifact.uri().to_owned(),
            name: artifact.name().to_owned(),
            event: None,
            create_time_since_epoch: artifact.create_time_since_epoch.as_millis() as u64,
            last_update_time_since_epoch: artifact.last_update_time_since_epoch.as_millis() as u64,
            columns: project(
                ARTIFACT_FIXED,
                &artifact.properties,
                &artifact.custom_properties,
            ),
        }
    }
}

/// An execution touching an artifact, with the stage and pipeline it ran in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionLinkRow {
    #[serde(rename = "Type")]
    pub ty: &'static str,
    pub execution_id: ExecutionId,
    pub execution_name: String,
    pub execution_type_name: String,
    pub stage: String,
    pub pipeline: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ExecutionNode {
    pub id: ExecutionId,
    pub type_name: String,
    pub uuid: String,
}

impl From<&Execution> for ExecutionNode {
    fn from(execution: &Execution) -> Self {
        Self {
            id: execution.id,
            type_name: execution
                .string_property(names::EXECUTION_TYPE_NAME)
                .unwrap_or(execution.type_name.as_str())
                .to_owned(),
            uuid: execution
                .properties
                .get(names::EXECUTION_UUID)
                .map(|v| v.to_text())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LineageLink<T> {
    pub source: T,
    pub target: T,
}

/// Upstream execution graph: nodes in id order and parent-to-child links.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ExecutionTree {
    pub nodes: Vec<ExecutionNode>,
    pub links: Vec<LineageLink<ExecutionId>>,
}

/// Metadata needed to render a model card.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ModelCard {
    pub model: Vec<ArtifactRow>,
    pub executions: Vec<ExecutionRow>,
    pub inputs: Vec<ArtifactRow>,
    pub outputs: Vec<ArtifactRow>,
}

impl ModelCard {
    pub fn is_empty(&self) -> bool {
        self.model.is_empty()
    }
}
