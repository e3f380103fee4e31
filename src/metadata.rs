//! Typed entities of the metadata graph.
use serde::{Deserialize, Serialize};
use sqlx::Row as _;
use std::collections::BTreeMap;
use std::time::Duration;

macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i32);

        impl $name {
            pub const fn new(id: i32) -> Self {
                Self(id)
            }

            pub const fn get(self) -> i32 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(TypeId);
define_id!(ArtifactId);
define_id!(ExecutionId);
define_id!(ContextId);

/// Identifier of an item of any kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Id {
    Artifact(ArtifactId),
    Execution(ExecutionId),
    Context(ContextId),
}

impl Id {
    pub fn from_kind(id: i32, kind: TypeKind) -> Self {
        match kind {
            TypeKind::Artifact => Self::Artifact(ArtifactId::new(id)),
            TypeKind::Execution => Self::Execution(ExecutionId::new(id)),
            TypeKind::Context => Self::Context(ContextId::new(id)),
        }
    }

    pub fn kind(self) -> TypeKind {
        match self {
            Self::Artifact(_) => TypeKind::Artifact,
            Self::Execution(_) => TypeKind::Execution,
            Self::Context(_) => TypeKind::Context,
        }
    }

    pub fn get(self) -> i32 {
        match self {
            Self::Artifact(x) => x.get(),
            Self::Execution(x) => x.get(),
            Self::Context(x) => x.get(),
        }
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {}", self.kind(), self.get())
    }
}

impl From<ArtifactId> for Id {
    fn from(id: ArtifactId) -> Self {
        Self::Artifact(id)
    }
}

impl From<ExecutionId> for Id {
    fn from(id: ExecutionId) -> Self {
        Self::Execution(id)
    }
}

impl From<ContextId> for Id {
    fn from(id: ContextId) -> Self {
        Self::Context(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Execution = 0,
    Artifact = 1,
    Context = 2,
}

impl TypeKind {
    pub fn item_table_name(self) -> &'static str {
        match self {
            Self::Execution => "Execution",
            Self::Artifact => "Artifact",
            Self::Context => "Context",
        }
    }
}

impl std::fmt::Display for TypeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Execution => write!(f, "execution"),
            Self::Artifact => write!(f, "artifact"),
            Self::Context => write!(f, "context"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    Int = 1,
    Double = 2,
    String = 3,
}

impl PropertyType {
    pub(crate) fn from_i32(value: i32) -> Result<Self, sqlx::Error> {
        match value {
            1 => Ok(Self::Int),
            2 => Ok(Self::Double),
            3 => Ok(Self::String),
            _ => Err(sqlx::Error::Decode(
                anyhow::anyhow!("property type {} is undefined", value).into(),
            )),
        }
    }
}

impl std::fmt::Display for PropertyType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Double => write!(f, "double"),
            Self::String => write!(f, "string"),
        }
    }
}

pub type PropertyTypes = BTreeMap<String, PropertyType>;
pub type PropertyValues = BTreeMap<String, PropertyValue>;

/// Scalar value of a property.
///
/// On the wire the variant is carried by the JSON value itself: integral
/// numbers are `Int`, other numbers are `Double` and strings are `String`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Int(i64),
    Double(f64),
    String(String),
}

impl PropertyValue {
    pub fn ty(&self) -> PropertyType {
        match self {
            Self::Int(_) => PropertyType::Int,
            Self::Double(_) => PropertyType::Double,
            Self::String(_) => PropertyType::String,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        if let Self::Int(v) = &self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        if let Self::Double(v) = &self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn as_string(&self) -> Option<&String> {
        if let Self::String(v) = &self {
            Some(v)
        } else {
            None
        }
    }

    /// Textual rendering used where a property is compared as a string.
    pub fn to_text(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
            Self::String(v) => v.clone(),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<'a> From<&'a str> for PropertyValue {
    fn from(v: &'a str) -> Self {
        Self::String(v.to_owned())
    }
}

/// Infers the declared property types from a set of values.
pub fn property_types_of(values: &PropertyValues) -> PropertyTypes {
    values.iter().map(|(k, v)| (k.clone(), v.ty())).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactType {
    pub id: TypeId,
    pub name: String,
    pub properties: PropertyTypes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionType {
    pub id: TypeId,
    pub name: String,
    pub properties: PropertyTypes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextType {
    pub id: TypeId,
    pub name: String,
    pub properties: PropertyTypes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub id: ArtifactId,
    pub type_id: TypeId,
    pub type_name: String,
    pub name: Option<String>,
    pub uri: Option<String>,
    pub properties: PropertyValues,
    pub custom_properties: PropertyValues,
    pub state: ArtifactState,
    pub create_time_since_epoch: Duration,
    pub last_update_time_since_epoch: Duration,
}

impl Artifact {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn uri(&self) -> &str {
        self.uri.as_deref().unwrap_or("")
    }
}

impl crate::query::InsertProperty for Artifact {
    fn insert_property(&mut self, is_custom: bool, name: String, value: PropertyValue) {
        if is_custom {
            self.custom_properties.insert(name, value);
        } else {
            self.properties.insert(name, value);
        }
    }
}

impl<'a> sqlx::FromRow<'a, sqlx::any::AnyRow> for Artifact {
    fn from_row(row: &'a sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: ArtifactId::new(row.try_get("id")?),
            type_id: TypeId::new(row.try_get("type_id")?),
            type_name: row.try_get("type_name")?,
            name: row.try_get("name")?,
            uri: row.try_get("uri")?,
            properties: BTreeMap::new(),
            custom_properties: BTreeMap::new(),
            state: ArtifactState::from_i32(row.try_get::<Option<i32>, _>("state")?.unwrap_or(0))?,
            create_time_since_epoch: millis(row.try_get("create_time_since_epoch")?),
            last_update_time_since_epoch: millis(row.try_get("last_update_time_since_epoch")?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactState {
    Unknown = 0,
    Pending = 1,
    Live = 2,
    MarkedForDeletion = 3,
    Deleted = 4,
}

impl ArtifactState {
    pub fn from_i32(v: i32) -> Result<Self, sqlx::Error> {
        match v {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Pending),
            2 => Ok(Self::Live),
            3 => Ok(Self::MarkedForDeletion),
            4 => Ok(Self::Deleted),
            _ => Err(sqlx::Error::Decode(
                anyhow::anyhow!("artifact state {} is undefined", v).into(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub id: ExecutionId,
    pub type_id: TypeId,
    pub type_name: String,
    pub name: Option<String>,
    pub last_known_state: ExecutionState,
    pub properties: PropertyValues,
    pub custom_properties: PropertyValues,
    pub create_time_since_epoch: Duration,
    pub last_update_time_since_epoch: Duration,
}

impl Execution {
    /// Returns the set of UUIDs stored in `Execution_uuid`, in first-seen order.
    pub fn uuids(&self) -> Vec<String> {
        self.properties
            .get(names::EXECUTION_UUID)
            .map(|v| split_uuids(&v.to_text()))
            .unwrap_or_default()
    }

    /// Returns `true` if the execution has a non-empty name.
    pub fn is_reusable(&self) -> bool {
        self.name.as_deref().map_or(false, |n| !n.is_empty())
    }

    pub fn string_property(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .and_then(|v| v.as_string())
            .map(|s| s.as_str())
    }

    pub fn int_property(&self, key: &str) -> Option<i64> {
        self.properties.get(key).and_then(|v| v.as_int())
    }
}

impl crate::query::InsertProperty for Execution {
    fn insert_property(&mut self, is_custom: bool, name: String, value: PropertyValue) {
        if is_custom {
            self.custom_properties.insert(name, value);
        } else {
            self.properties.insert(name, value);
        }
    }
}

impl<'a> sqlx::FromRow<'a, sqlx::any::AnyRow> for Execution {
    fn from_row(row: &'a sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: ExecutionId::new(row.try_get("id")?),
            type_id: TypeId::new(row.try_get("type_id")?),
            type_name: row.try_get("type_name")?,
            name: row.try_get("name")?,
            properties: BTreeMap::new(),
            custom_properties: BTreeMap::new(),
            last_known_state: ExecutionState::from_i32(
                row.try_get::<Option<i32>, _>("last_known_state")?
                    .unwrap_or(0),
            )?,
            create_time_since_epoch: millis(row.try_get("create_time_since_epoch")?),
            last_update_time_since_epoch: millis(row.try_get("last_update_time_since_epoch")?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionState {
    Unknown = 0,
    New = 1,
    Running = 2,
    Complete = 3,
    Failed = 4,
    Cached = 5,
    Canceled = 6,
}

impl ExecutionState {
    pub fn from_i32(v: i32) -> Result<Self, sqlx::Error> {
        match v {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::New),
            2 => Ok(Self::Running),
            3 => Ok(Self::Complete),
            4 => Ok(Self::Failed),
            5 => Ok(Self::Cached),
            6 => Ok(Self::Canceled),
            _ => Err(sqlx::Error::Decode(
                anyhow::anyhow!("execution state {} is undefined", v).into(),
            )),
        }
    }
}

/// A pipeline (root context) or a stage (child context).
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    pub id: ContextId,
    pub type_id: TypeId,
    pub type_name: String,
    pub name: String,
    pub properties: PropertyValues,
    pub custom_properties: PropertyValues,
    pub create_time_since_epoch: Duration,
    pub last_update_time_since_epoch: Duration,
}

impl crate::query::InsertProperty for Context {
    fn insert_property(&mut self, is_custom: bool, name: String, value: PropertyValue) {
        if is_custom {
            self.custom_properties.insert(name, value);
        } else {
            self.properties.insert(name, value);
        }
    }
}

impl<'a> sqlx::FromRow<'a, sqlx::any::AnyRow> for Context {
    fn from_row(row: &'a sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: ContextId::new(row.try_get("id")?),
            type_id: TypeId::new(row.try_get("type_id")?),
            type_name: row.try_get("type_name")?,
            name: row.try_get("name")?,
            properties: BTreeMap::new(),
            custom_properties: BTreeMap::new(),
            create_time_since_epoch: millis(row.try_get("create_time_since_epoch")?),
            last_update_time_since_epoch: millis(row.try_get("last_update_time_since_epoch")?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    Unknown = 0,
    DeclaredOutput = 1,
    DeclaredInput = 2,
    Input = 3,
    Output = 4,
    InternalInput = 5,
    InternalOutput = 6,
}

impl EventType {
    pub fn from_i32(v: i32) -> Result<Self, sqlx::Error> {
        match v {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::DeclaredOutput),
            2 => Ok(Self::DeclaredInput),
            3 => Ok(Self::Input),
            4 => Ok(Self::Output),
            5 => Ok(Self::InternalInput),
            6 => Ok(Self::InternalOutput),
            _ => Err(sqlx::Error::Decode(
                anyhow::anyhow!("event type {} is undefined", v).into(),
            )),
        }
    }

    pub fn is_input(self) -> bool {
        matches!(
            self,
            Self::Input | Self::DeclaredInput | Self::InternalInput
        )
    }

    pub fn is_output(self) -> bool {
        matches!(
            self,
            Self::Output | Self::DeclaredOutput | Self::InternalOutput
        )
    }

    /// Label used in tabular query results.
    pub fn label(self) -> &'static str {
        if self.is_input() {
            "INPUT"
        } else if self.is_output() {
            "OUTPUT"
        } else {
            "UNKNOWN"
        }
    }
}

/// Direction of an artifact relative to the execution that logs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn event_type(self) -> EventType {
        match self {
            Self::Input => EventType::Input,
            Self::Output => EventType::Output,
        }
    }

    /// Only INPUT and OUTPUT events link executions to artifacts.
    pub fn from_wire(ty: i32) -> Option<Self> {
        if ty == EventType::Input as i32 {
            Some(Self::Input)
        } else if ty == EventType::Output as i32 {
            Some(Self::Output)
        } else {
            None
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "input" => Ok(Self::Input),
            "output" => Ok(Self::Output),
            _ => Err(format!("unknown direction {:?}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    pub artifact_id: ArtifactId,
    pub execution_id: ExecutionId,
    pub ty: EventType,
    pub create_time_since_epoch: Duration,
}

/// Splits a comma-joined `Execution_uuid` value into its distinct members.
pub fn split_uuids(value: &str) -> Vec<String> {
    let mut uuids: Vec<String> = Vec::new();
    for uuid in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !uuids.iter().any(|u| u == uuid) {
            uuids.push(uuid.to_owned());
        }
    }
    uuids
}

/// Adds `extra` members to a comma-joined `Execution_uuid` value.
pub fn join_uuids(value: &str, extra: &str) -> String {
    let mut uuids = split_uuids(value);
    for uuid in split_uuids(extra) {
        if !uuids.contains(&uuid) {
            uuids.push(uuid);
        }
    }
    uuids.join(",")
}

fn millis(v: i64) -> Duration {
    Duration::from_millis(v.max(0) as u64)
}

/// Well-known type and property names of the CMF graph.
pub mod names {
    pub const PIPELINE_TYPE: &str = "Parent_Context";
    pub const STAGE_TYPE: &str = "Pipeline_Stage";

    pub const DATASET: &str = "Dataset";
    pub const MODEL: &str = "Model";
    pub const METRICS: &str = "Metrics";
    pub const STEP_METRICS: &str = "Step_Metrics";
    pub const DATASLICE: &str = "Dataslice";
    pub const ENVIRONMENT: &str = "Environment";
    pub const LABEL: &str = "Label";
    pub const VALIDATION_OUTPUT: &str = "Validation_output";

    pub const PIPELINE: &str = "Pipeline";
    pub const PIPELINE_STAGE: &str = "Pipeline_Stage";

    pub const CONTEXT_TYPE: &str = "Context_Type";
    pub const CONTEXT_ID: &str = "Context_ID";
    pub const EXECUTION: &str = "Execution";
    pub const EXECUTION_UUID: &str = "Execution_uuid";
    pub const EXECUTION_TYPE_NAME: &str = "Execution_type_name";
    pub const PIPELINE_TYPE_PROPERTY: &str = "Pipeline_Type";
    pub const PIPELINE_ID: &str = "Pipeline_id";
    pub const GIT_REPO: &str = "Git_Repo";
    pub const GIT_START_COMMIT: &str = "Git_Start_Commit";
    pub const GIT_END_COMMIT: &str = "Git_End_Commit";

    pub const URL: &str = "url";
    pub const COMMIT: &str = "Commit";
    pub const ARTIFACT_GIT_REPO: &str = "git_repo";
    pub const MODEL_FRAMEWORK: &str = "model_framework";
    pub const MODEL_TYPE: &str = "model_type";
    pub const MODEL_NAME: &str = "model_name";
    pub const METRICS_NAME: &str = "metrics_name";
    pub const VERSION: &str = "version";

    pub const ORIGINAL_CREATE_TIME: &str = "original_create_time_since_epoch";
}
