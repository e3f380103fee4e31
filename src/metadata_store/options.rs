use crate::metadata::{
    ArtifactId, ArtifactState, ContextId, EventType, ExecutionId, PropertyTypes,
    PropertyValue, PropertyValues, TypeId, TypeKind,
};
use crate::query::QueryValue;

#[derive(Debug, Default, Clone)]
pub struct GetTypesOptions {
    pub name: Option<String>,
    pub ids: Vec<TypeId>,
}

impl GetTypesOptions {
    pub fn by_id(id: TypeId) -> Self {
        Self {
            name: None,
            ids: vec![id],
        }
    }

    pub fn by_name(name: &str) -> Self {
        Self {
            name: Some(name.to_owned()),
            ids: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct PutTypeOptions {
    pub can_add_fields: bool,
    pub can_omit_fields: bool,
    pub properties: PropertyTypes,
}

/// Fields of an artifact, execution or context being created or updated.
#[derive(Debug, Clone)]
pub struct ItemOptions {
    pub(crate) type_kind: TypeKind,
    pub(crate) name: Option<String>,
    pub(crate) uri: Option<String>,
    pub(crate) state: Option<i32>,
    pub(crate) properties: PropertyValues,
    pub(crate) custom_properties: PropertyValues,
}

impl ItemOptions {
    pub(crate) fn new(type_kind: TypeKind) -> Self {
        Self {
            type_kind,
            name: None,
            uri: None,
            state: None,
            properties: PropertyValues::new(),
            custom_properties: PropertyValues::new(),
        }
    }

    pub(crate) fn artifact_state(&mut self, state: ArtifactState) {
        self.state = Some(state as i32);
    }

    pub(crate) fn insert_property(&mut self, key: &str, value: PropertyValue, is_custom: bool) {
        if is_custom {
            self.custom_properties.insert(key.to_owned(), value);
        } else {
            self.properties.insert(key.to_owned(), value);
        }
    }

    pub(crate) fn extra_fields(&self) -> Vec<(&'static str, QueryValue)> {
        let mut fields = Vec::new();
        match self.type_kind {
            TypeKind::Artifact => {
                if let Some(v) = &self.uri {
                    fields.push(("uri", QueryValue::Str(v)));
                }
                if let Some(v) = self.state {
                    fields.push(("state", QueryValue::Int(v)));
                }
            }
            TypeKind::Execution => {
                if let Some(v) = self.state {
                    fields.push(("last_known_state", QueryValue::Int(v)));
                }
            }
            TypeKind::Context => {}
        }
        fields
    }
}

#[derive(Debug, Clone)]
pub enum GetItemsOptions {
    Artifact(GetArtifactsOptions),
    Execution(GetExecutionsOptions),
    Context(GetContextsOptions),
}

impl GetItemsOptions {
    pub fn type_kind(&self) -> TypeKind {
        match self {
            Self::Artifact(_) => TypeKind::Artifact,
            Self::Execution(_) => TypeKind::Execution,
            Self::Context(_) => TypeKind::Context,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct GetArtifactsOptions {
    pub(crate) type_name: Option<String>,
    pub(crate) artifact_name: Option<String>,
    pub(crate) artifact_ids: Vec<ArtifactId>,
    pub(crate) uri: Option<String>,
    pub(crate) context_id: Option<ContextId>,
}

impl GetArtifactsOptions {
    pub fn ty(mut self, type_name: &str) -> Self {
        self.type_name = Some(type_name.to_owned());
        self
    }

    pub fn name(mut self, artifact_name: &str) -> Self {
        self.artifact_name = Some(artifact_name.to_owned());
        self
    }

    pub fn type_and_name(self, type_name: &str, artifact_name: &str) -> Self {
        self.ty(type_name).name(artifact_name)
    }

    pub fn ids(mut self, artifact_ids: &[ArtifactId]) -> Self {
        self.artifact_ids = Vec::from(artifact_ids);
        self
    }

    pub fn uri(mut self, uri: &str) -> Self {
        self.uri = Some(uri.to_owned());
        self
    }

    pub fn context(mut self, context_id: ContextId) -> Self {
        self.context_id = Some(context_id);
        self
    }
}

#[derive(Debug, Default, Clone)]
pub struct GetExecutionsOptions {
    pub(crate) type_name: Option<String>,
    pub(crate) execution_name: Option<String>,
    pub(crate) execution_ids: Vec<ExecutionId>,
    pub(crate) context_id: Option<ContextId>,
}

impl GetExecutionsOptions {
    pub fn ty(mut self, type_name: &str) -> Self {
        self.type_name = Some(type_name.to_owned());
        self
    }

    pub fn type_and_name(mut self, type_name: &str, execution_name: &str) -> Self {
        self.type_name = Some(type_name.to_owned());
        self.execution_name = Some(execution_name.to_owned());
        self
    }

    pub fn ids(mut self, execution_ids: &[ExecutionId]) -> Self {
        self.execution_ids = Vec::from(execution_ids);
        self
    }

    pub fn context(mut self, context_id: ContextId) -> Self {
        self.context_id = Some(context_id);
        self
    }
}

#[derive(Debug, Default, Clone)]
pub struct GetContextsOptions {
    pub(crate) type_name: Option<String>,
    pub(crate) context_name: Option<String>,
    pub(crate) context_ids: Vec<ContextId>,
    pub(crate) artifact_ids: Vec<ArtifactId>,
    pub(crate) execution_ids: Vec<ExecutionId>,
    pub(crate) parent_context_id: Option<ContextId>,
    pub(crate) child_context_id: Option<ContextId>,
}

impl GetContextsOptions {
    pub fn ty(mut self, type_name: &str) -> Self {
        self.type_name = Some(type_name.to_owned());
        self
    }

    pub fn type_and_name(mut self, type_name: &str, context_name: &str) -> Self {
        self.type_name = Some(type_name.to_owned());
        self.context_name = Some(context_name.to_owned());
        self
    }

    pub fn ids(mut self, context_ids: &[ContextId]) -> Self {
        self.context_ids = Vec::from(context_ids);
        self
    }

    pub fn artifact(mut self, artifact_id: ArtifactId) -> Self {
        self.artifact_ids = vec![artifact_id];
        self
    }

    pub fn execution(mut self, execution_id: ExecutionId) -> Self {
        self.execution_ids = vec![execution_id];
        self
    }

    /// Restricts the result to the children of the given context.
    pub fn parent(mut self, context_id: ContextId) -> Self {
        self.parent_context_id = Some(context_id);
        self
    }

    /// Restricts the result to the parents of the given context.
    pub fn child(mut self, context_id: ContextId) -> Self {
        self.child_context_id = Some(context_id);
        self
    }
}

#[derive(Debug, Default, Clone)]
pub struct GetEventsOptions {
    pub(crate) artifact_ids: Vec<ArtifactId>,
    pub(crate) execution_ids: Vec<ExecutionId>,
    pub(crate) event_type: Option<EventType>,
}

impl GetEventsOptions {
    pub fn artifact_ids(mut self, ids: &[ArtifactId]) -> Self {
        self.artifact_ids = Vec::from(ids);
        self
    }

    pub fn execution_ids(mut self, ids: &[ExecutionId]) -> Self {
        self.execution_ids = Vec::from(ids);
        self
    }

    pub fn ty(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }
}
