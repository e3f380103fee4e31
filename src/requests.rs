//! Request builders returned by [`MetadataStore`].
use crate::errors;
use crate::metadata::{
    ArtifactId, ArtifactState, ContextId, ExecutionId, Id, PropertyType, PropertyTypes,
    PropertyValue, PropertyValues, TypeId, TypeKind,
};
use crate::metadata_store::{options, MetadataStore};

/// Property setters shared by every item request.
macro_rules! property_setters {
    () => {
        /// Replaces the declared properties.
        pub fn properties(mut self, properties: PropertyValues) -> Self {
            self.options.properties = properties;
            self
        }

        pub fn property<T>(mut self, key: &str, value: T) -> Self
        where
            T: Into<PropertyValue>,
        {
            self.options.insert_property(key, value.into(), false);
            self
        }

        /// Replaces the free-form properties.
        pub fn custom_properties(mut self, properties: PropertyValues) -> Self {
            self.options.custom_properties = properties;
            self
        }

        pub fn custom_property<T>(mut self, key: &str, value: T) -> Self
        where
            T: Into<PropertyValue>,
        {
            self.options.insert_property(key, value.into(), true);
            self
        }
    };
}

/// Gets or creates a type.
///
/// An existing type must declare exactly the requested properties unless
/// `can_add_fields` (new properties are added) or `can_omit_fields`
/// (missing ones are tolerated) is set.
#[derive(Debug)]
pub struct PutTypeRequest<'a> {
    store: &'a mut MetadataStore,
    type_kind: TypeKind,
    type_name: String,
    options: options::PutTypeOptions,
}

impl<'a> PutTypeRequest<'a> {
    pub(crate) fn new(store: &'a mut MetadataStore, type_kind: TypeKind, type_name: &str) -> Self {
        Self {
            store,
            type_kind,
            type_name: type_name.to_owned(),
            options: options::PutTypeOptions::default(),
        }
    }

    pub fn can_omit_fields(mut self) -> Self {
        self.options.can_omit_fields = true;
        self
    }

    pub fn can_add_fields(mut self) -> Self {
        self.options.can_add_fields = true;
        self
    }

    pub fn properties(mut self, properties: PropertyTypes) -> Self {
        self.options.properties = properties;
        self
    }

    pub fn property(mut self, name: &str, ty: PropertyType) -> Self {
        self.options.properties.insert(name.to_owned(), ty);
        self
    }

    pub async fn execute(self) -> Result<TypeId, errors::PutError> {
        self.store
            .execute_put_type(self.type_kind, &self.type_name, self.options)
            .await
    }
}

#[derive(Debug)]
pub struct PostArtifactRequest<'a> {
    store: &'a mut MetadataStore,
    type_id: TypeId,
    options: options::ItemOptions,
}

impl<'a> PostArtifactRequest<'a> {
    pub(crate) fn new(store: &'a mut MetadataStore, type_id: TypeId) -> Self {
        Self {
            store,
            type_id,
            options: options::ItemOptions::new(TypeKind::Artifact),
        }
    }

    /// Artifact names are unique per type.
    pub fn name(mut self, name: &str) -> Self {
        self.options.name = Some(name.to_owned());
        self
    }

    pub fn uri(mut self, uri: &str) -> Self {
        self.options.uri = Some(uri.to_owned());
        self
    }

    pub fn state(mut self, state: ArtifactState) -> Self {
        self.options.artifact_state(state);
        self
    }

    property_setters!();

    pub async fn execute(self) -> Result<ArtifactId, errors::PostError> {
        self.store
            .execute_post_item(self.type_id, self.options)
            .await
            .map(ArtifactId::new)
    }
}

#[derive(Debug)]
pub struct PostExecutionRequest<'a> {
    store: &'a mut MetadataStore,
    type_id: TypeId,
    options: options::ItemOptions,
}

impl<'a> PostExecutionRequest<'a> {
    pub(crate) fn new(store: &'a mut MetadataStore, type_id: TypeId) -> Self {
        Self {
            store,
            type_id,
            options: options::ItemOptions::new(TypeKind::Execution),
        }
    }

    /// Named executions are reusable: re-running the same named step
    /// extends the existing record instead of creating a new one.
    pub fn name(mut self, name: &str) -> Self {
        self.options.name = Some(name.to_owned());
        self
    }

    property_setters!();

    pub async fn execute(self) -> Result<ExecutionId, errors::PostError> {
        self.store
            .execute_post_item(self.type_id, self.options)
            .await
            .map(ExecutionId::new)
    }
}

/// Creates a pipeline or stage context; the name is mandatory.
#[derive(Debug)]
pub struct PostContextRequest<'a> {
    store: &'a mut MetadataStore,
    type_id: TypeId,
    options: options::ItemOptions,
}

impl<'a> PostContextRequest<'a> {
    pub(crate) fn new(store: &'a mut MetadataStore, type_id: TypeId, context_name: &str) -> Self {
        let mut options = options::ItemOptions::new(TypeKind::Context);
        options.name = Some(context_name.to_owned());
        Self {
            store,
            type_id,
            options,
        }
    }

    property_setters!();

    pub async fn execute(self) -> Result<ContextId, errors::PostError> {
        self.store
            .execute_post_item(self.type_id, self.options)
            .await
            .map(ContextId::new)
    }
}

/// Updates an existing artifact, execution or context.
///
/// Only the fields that are set are written; properties are upserted one by
/// one and the item's `last_update_time_since_epoch` is refreshed.
#[derive(Debug)]
pub struct PutItemRequest<'a> {
    store: &'a mut MetadataStore,
    item_id: Id,
    options: options::ItemOptions,
}

impl<'a> PutItemRequest<'a> {
    pub(crate) fn new(store: &'a mut MetadataStore, item_id: Id) -> Self {
        Self {
            store,
            item_id,
            options: options::ItemOptions::new(item_id.kind()),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.options.name = Some(name.to_owned());
        self
    }

    /// Ignored unless the item is an artifact.
    pub fn uri(mut self, uri: &str) -> Self {
        self.options.uri = Some(uri.to_owned());
        self
    }

    property_setters!();

    pub async fn execute(self) -> Result<(), errors::PutError> {
        self.store
            .execute_put_item(self.item_id, self.options)
            .await
    }
}
