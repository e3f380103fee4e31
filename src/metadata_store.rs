use self::options::{
    GetArtifactsOptions, GetContextsOptions, GetEventsOptions, GetExecutionsOptions,
    GetItemsOptions, GetTypesOptions, ItemOptions, PutTypeOptions,
};
use crate::errors::{GetError, InitError, PostError, PutError};
use crate::metadata::{
    Artifact, ArtifactId, ArtifactType, Context, ContextId, ContextType, Event, EventType,
    Execution, ExecutionId, ExecutionType, Id, PropertyType, PropertyTypes, TypeId, TypeKind,
};
use crate::query::{self, current_millis, InsertProperty, Query};
use crate::requests;
use futures::TryStreamExt as _;
use sqlx::{AnyConnection, Connection as _, Row as _, TransactionManager as _};
use std::collections::BTreeMap;
use std::time::Duration;

pub mod options;
#[cfg(test)]
mod tests;

const SCHEMA_VERSION: i32 = 1;
const MAX_BIND_IDS: usize = 500;

type AnyTransactionManager = <sqlx::Any as sqlx::Database>::TransactionManager;

/// Metadata store.
///
/// `MetadataStore` provides the typed-graph API over a relational database
/// (an embedded SQLite file or a networked MySQL/PostgreSQL server).
#[derive(Debug)]
pub struct MetadataStore {
    connection: sqlx::AnyConnection,
    pub(crate) query: Query,
    in_transaction: bool,
}

impl MetadataStore {
    /// Connects to the database specified by the given URI.
    pub async fn connect(database_uri: &str) -> Result<Self, InitError> {
        let query = if database_uri.starts_with("sqlite") {
            Query::sqlite()
        } else if database_uri.starts_with("mysql") {
            Query::mysql()
        } else if database_uri.starts_with("postgres") {
            Query::postgres()
        } else {
            return Err(InitError::UnsupportedDatabase);
        };

        let connection = AnyConnection::connect(database_uri).await?;
        let mut this = Self {
            connection,
            query,
            in_transaction: false,
        };
        this.initialize_database().await?;
        tracing::debug!(dialect = ?this.query, "metadata store is ready");
        Ok(this)
    }

    /// Starts a transaction spanning every subsequent operation until
    /// [`MetadataStore::commit_transaction`] or [`MetadataStore::rollback_transaction`].
    ///
    /// A transaction left open by a cancelled task is rolled back first.
    pub async fn begin_transaction(&mut self) -> Result<(), sqlx::Error> {
        self.discard_aborted_transaction().await?;
        // Raised first: a begin cancelled midway must still be discarded.
        self.in_transaction = true;
        if let Err(e) = AnyTransactionManager::begin(&mut self.connection).await {
            self.in_transaction = false;
            return Err(e);
        }
        Ok(())
    }

    /// Rolls back a transaction whose owner was dropped before committing.
    ///
    /// Callers sharing a store across tasks run this before reading, so
    /// that uncommitted writes of a cancelled task are never observed.
    pub async fn discard_aborted_transaction(&mut self) -> Result<(), sqlx::Error> {
        if self.in_transaction {
            tracing::warn!("rolling back a transaction left open by an aborted operation");
            self.in_transaction = false;
            // A commit cancelled after reaching the database leaves nothing to roll back.
            if let Err(e) = AnyTransactionManager::rollback(&mut self.connection).await {
                tracing::warn!(error = %e, "no aborted transaction to roll back");
            }
        }
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub async fn commit_transaction(&mut self) -> Result<(), sqlx::Error> {
        if self.in_transaction {
            AnyTransactionManager::commit(&mut self.connection).await?;
            self.in_transaction = false;
        }
        Ok(())
    }

    pub async fn rollback_transaction(&mut self) -> Result<(), sqlx::Error> {
        if self.in_transaction {
            AnyTransactionManager::rollback(&mut self.connection).await?;
            self.in_transaction = false;
        }
        Ok(())
    }

    /// Makes a request builder to put an artifact type.
    pub fn put_artifact_type(&mut self, type_name: &str) -> requests::PutTypeRequest {
        requests::PutTypeRequest::new(self, TypeKind::Artifact, type_name)
    }

    /// Makes a request builder to put an execution type.
    pub fn put_execution_type(&mut self, type_name: &str) -> requests::PutTypeRequest {
        requests::PutTypeRequest::new(self, TypeKind::Execution, type_name)
    }

    /// Makes a request builder to put a context type.
    pub fn put_context_type(&mut self, type_name: &str) -> requests::PutTypeRequest {
        requests::PutTypeRequest::new(self, TypeKind::Context, type_name)
    }

    pub async fn get_artifact_type(&mut self, type_name: &str) -> Result<ArtifactType, GetError> {
        self.execute_get_types(
            TypeKind::Artifact,
            |id, name, properties| ArtifactType {
                id,
                name,
                properties,
            },
            GetTypesOptions::by_name(type_name),
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| GetError::NotFound {
            target: format!("artifact type {:?}", type_name),
        })
    }

    pub async fn get_artifact_types(&mut self) -> Result<Vec<ArtifactType>, GetError> {
        self.get_artifact_types_by_id(&[]).await
    }

    /// Gets artifact types by id (all types if `ids` is empty).
    pub async fn get_artifact_types_by_id(
        &mut self,
        ids: &[TypeId],
    ) -> Result<Vec<ArtifactType>, GetError> {
        let options = GetTypesOptions {
            name: None,
            ids: ids.to_vec(),
        };
        self.execute_get_types(
            TypeKind::Artifact,
            |id, name, properties| ArtifactType {
                id,
                name,
                properties,
            },
            options,
        )
        .await
    }

    pub async fn get_execution_type(
        &mut self,
        type_name: &str,
    ) -> Result<ExecutionType, GetError> {
        self.execute_get_types(
            TypeKind::Execution,
            |id, name, properties| ExecutionType {
                id,
                name,
                properties,
            },
            GetTypesOptions::by_name(type_name),
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| GetError::NotFound {
            target: format!("execution type {:?}", type_name),
        })
    }

    /// Gets execution types by id (all types if `ids` is empty).
    pub async fn get_execution_types_by_id(
        &mut self,
        ids: &[TypeId],
    ) -> Result<Vec<ExecutionType>, GetError> {
        let options = GetTypesOptions {
            name: None,
            ids: ids.to_vec(),
        };
        self.execute_get_types(
            TypeKind::Execution,
            |id, name, properties| ExecutionType {
                id,
                name,
                properties,
            },
            options,
        )
        .await
    }

    pub async fn get_context_type(&mut self, type_name: &str) -> Result<ContextType, GetError> {
        self.execute_get_types(
            TypeKind::Context,
            |id, name, properties| ContextType {
                id,
                name,
                properties,
            },
            GetTypesOptions::by_name(type_name),
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| GetError::NotFound {
            target: format!("context type {:?}", type_name),
        })
    }

    /// Makes a request builder to create a new artifact.
    pub fn post_artifact(&mut self, type_id: TypeId) -> requests::PostArtifactRequest {
        requests::PostArtifactRequest::new(self, type_id)
    }

    /// Makes a request builder to update an artifact.
    pub fn put_artifact(&mut self, artifact_id: ArtifactId) -> requests::PutItemRequest {
        requests::PutItemRequest::new(self, Id::Artifact(artifact_id))
    }

    /// Makes a request builder to create a new execution.
    pub fn post_execution(&mut self, type_id: TypeId) -> requests::PostExecutionRequest {
        requests::PostExecutionRequest::new(self, type_id)
    }

    /// Makes a request builder to update an execution.
    pub fn put_execution(&mut self, execution_id: ExecutionId) -> requests::PutItemRequest {
        requests::PutItemRequest::new(self, Id::Execution(execution_id))
    }

    /// Makes a request builder to create a new context.
    pub fn post_context(
        &mut self,
        type_id: TypeId,
        context_name: &str,
    ) -> requests::PostContextRequest {
        requests::PostContextRequest::new(self, type_id, context_name)
    }

    /// Makes a request builder to update a context.
    pub fn put_context(&mut self, context_id: ContextId) -> requests::PutItemRequest {
        requests::PutItemRequest::new(self, Id::Context(context_id))
    }

    pub async fn get_artifacts(
        &mut self,
        options: GetArtifactsOptions,
    ) -> Result<Vec<Artifact>, GetError> {
        self.execute_get_items(GetItemsOptions::Artifact(options))
            .await
    }

    pub async fn get_artifacts_by_id(
        &mut self,
        ids: &[ArtifactId],
    ) -> Result<Vec<Artifact>, GetError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut artifacts = Vec::new();
        for chunk in ids.chunks(MAX_BIND_IDS) {
            artifacts.extend(
                self.get_artifacts(GetArtifactsOptions::default().ids(chunk))
                    .await?,
            );
        }
        Ok(artifacts)
    }

    pub async fn get_artifacts_by_uri(&mut self, uri: &str) -> Result<Vec<Artifact>, GetError> {
        self.get_artifacts(GetArtifactsOptions::default().uri(uri))
            .await
    }

    pub async fn get_artifacts_by_type(
        &mut self,
        type_name: &str,
    ) -> Result<Vec<Artifact>, GetError> {
        self.get_artifacts(GetArtifactsOptions::default().ty(type_name))
            .await
    }

    pub async fn get_artifacts_by_context(
        &mut self,
        context_id: ContextId,
    ) -> Result<Vec<Artifact>, GetError> {
        self.get_artifacts(GetArtifactsOptions::default().context(context_id))
            .await
    }

    pub async fn get_executions(
        &mut self,
        options: GetExecutionsOptions,
    ) -> Result<Vec<Execution>, GetError> {
        self.execute_get_items(GetItemsOptions::Execution(options))
            .await
    }

    pub async fn get_executions_by_id(
        &mut self,
        ids: &[ExecutionId],
    ) -> Result<Vec<Execution>, GetError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut executions = Vec::new();
        for chunk in ids.chunks(MAX_BIND_IDS) {
            executions.extend(
                self.get_executions(GetExecutionsOptions::default().ids(chunk))
                    .await?,
            );
        }
        Ok(executions)
    }

    pub async fn get_executions_by_context(
        &mut self,
        context_id: ContextId,
    ) -> Result<Vec<Execution>, GetError> {
        self.get_executions(GetExecutionsOptions::default().context(context_id))
            .await
    }

    pub async fn get_contexts(
        &mut self,
        options: GetContextsOptions,
    ) -> Result<Vec<Context>, GetError> {
        self.execute_get_items(GetItemsOptions::Context(options))
            .await
    }

    pub async fn get_contexts_by_type(
        &mut self,
        type_name: &str,
    ) -> Result<Vec<Context>, GetError> {
        self.get_contexts(GetContextsOptions::default().ty(type_name))
            .await
    }

    pub async fn get_context_by_type_and_name(
        &mut self,
        type_name: &str,
        context_name: &str,
    ) -> Result<Option<Context>, GetError> {
        Ok(self
            .get_contexts(GetContextsOptions::default().type_and_name(type_name, context_name))
            .await?
            .into_iter()
            .next())
    }

    pub async fn get_contexts_by_execution(
        &mut self,
        execution_id: ExecutionId,
    ) -> Result<Vec<Context>, GetError> {
        self.get_contexts(GetContextsOptions::default().execution(execution_id))
            .await
    }

    pub async fn get_contexts_by_artifact(
        &mut self,
        artifact_id: ArtifactId,
    ) -> Result<Vec<Context>, GetError> {
        self.get_contexts(GetContextsOptions::default().artifact(artifact_id))
            .await
    }

    pub async fn get_children_contexts_by_context(
        &mut self,
        parent_id: ContextId,
    ) -> Result<Vec<Context>, GetError> {
        self.get_contexts(GetContextsOptions::default().parent(parent_id))
            .await
    }

    pub async fn get_parent_contexts_by_context(
        &mut self,
        child_id: ContextId,
    ) -> Result<Vec<Context>, GetError> {
        self.get_contexts(GetContextsOptions::default().child(child_id))
            .await
    }

    /// Links a child context to its parent. Repeated links are no-ops.
    pub async fn put_parent_context(
        &mut self,
        parent_id: ContextId,
        child_id: ContextId,
    ) -> Result<(), PutError> {
        self.check_item_exists(Id::Context(parent_id)).await?;
        self.check_item_exists(Id::Context(child_id)).await?;
        sqlx::query(&self.query.insert_or_ignore_parent_context())
            .bind(child_id.get())
            .bind(parent_id.get())
            .execute(&mut self.connection)
            .await?;
        Ok(())
    }

    /// Attributes an artifact to a context. Repeated attributions are no-ops.
    pub async fn put_attribution(
        &mut self,
        context_id: ContextId,
        artifact_id: ArtifactId,
    ) -> Result<(), PutError> {
        self.execute_put_relation(context_id, Id::Artifact(artifact_id))
            .await
    }

    /// Associates an execution with a context. Repeated associations are no-ops.
    pub async fn put_association(
        &mut self,
        context_id: ContextId,
        execution_id: ExecutionId,
    ) -> Result<(), PutError> {
        self.execute_put_relation(context_id, Id::Execution(execution_id))
            .await
    }

    /// Attributes artifacts and associates executions in a single transaction.
    pub async fn put_attributions_and_associations(
        &mut self,
        attributions: &[(ContextId, ArtifactId)],
        associations: &[(ContextId, ExecutionId)],
    ) -> Result<(), PutError> {
        let mut connection = self.connection.begin().await?;
        for (context_id, artifact_id) in attributions {
            sqlx::query(&self.query.insert_or_ignore_attribution())
                .bind(context_id.get())
                .bind(artifact_id.get())
                .execute(&mut connection)
                .await?;
        }
        for (context_id, execution_id) in associations {
            sqlx::query(&self.query.insert_or_ignore_association())
                .bind(context_id.get())
                .bind(execution_id.get())
                .execute(&mut connection)
                .await?;
        }
        connection.commit().await?;
        Ok(())
    }

    /// Records an event unless one of the same type already links the pair.
    ///
    /// Returns `true` if a new event was inserted.
    pub async fn put_event(
        &mut self,
        execution_id: ExecutionId,
        artifact_id: ArtifactId,
        event_type: EventType,
    ) -> Result<bool, PutError> {
        self.check_item_exists(Id::Execution(execution_id)).await?;
        self.check_item_exists(Id::Artifact(artifact_id)).await?;

        let result = sqlx::query(&self.query.insert_or_ignore_event())
            .bind(artifact_id.get())
            .bind(execution_id.get())
            .bind(event_type as i32)
            .bind(current_millis())
            .execute(&mut self.connection)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Records events in a single transaction; already recorded ones are skipped.
    pub async fn put_events(&mut self, events: &[Event]) -> Result<(), PutError> {
        let mut connection = self.connection.begin().await?;
        for event in events {
            sqlx::query(&self.query.insert_or_ignore_event())
                .bind(event.artifact_id.get())
                .bind(event.execution_id.get())
                .bind(event.ty as i32)
                .bind(event.create_time_since_epoch.as_millis() as i64)
                .execute(&mut connection)
                .await?;
        }
        connection.commit().await?;
        Ok(())
    }

    pub async fn get_events(&mut self, options: GetEventsOptions) -> Result<Vec<Event>, GetError> {
        let (sql, args) = self.query.get_events(&options);
        let mut rows =
            sqlx::query_as_with::<_, query::Event, _>(&sql, args).fetch(&mut self.connection);
        let mut events = Vec::new();
        while let Some(row) = rows.try_next().await? {
            events.push(Event {
                artifact_id: ArtifactId::new(row.artifact_id),
                execution_id: ExecutionId::new(row.execution_id),
                ty: EventType::from_i32(row.ty)?,
                create_time_since_epoch: Duration::from_millis(
                    row.milliseconds_since_epoch.unwrap_or(0).max(0) as u64,
                ),
            });
        }
        Ok(events)
    }

    pub async fn get_events_by_artifact_ids(
        &mut self,
        ids: &[ArtifactId],
    ) -> Result<Vec<Event>, GetError> {
        let mut events = Vec::new();
        for chunk in ids.chunks(MAX_BIND_IDS) {
            events.extend(
                self.get_events(GetEventsOptions::default().artifact_ids(chunk))
                    .await?,
            );
        }
        Ok(events)
    }

    pub async fn get_events_by_execution_ids(
        &mut self,
        ids: &[ExecutionId],
    ) -> Result<Vec<Event>, GetError> {
        let mut events = Vec::new();
        for chunk in ids.chunks(MAX_BIND_IDS) {
            events.extend(
                self.get_events(GetEventsOptions::default().execution_ids(chunk))
                    .await?,
            );
        }
        Ok(events)
    }

    pub(crate) async fn execute_post_item(
        &mut self,
        type_id: TypeId,
        options: ItemOptions,
    ) -> Result<i32, PostError> {
        let type_kind = options.type_kind;
        let property_types = self
            .get_type_properties(type_kind, type_id)
            .await?
            .ok_or(PostError::TypeNotFound { type_kind, type_id })?;
        for (name, value) in &options.properties {
            if property_types.get(name).copied() != Some(value.ty()) {
                return Err(PostError::UndefinedProperty {
                    type_kind,
                    type_id,
                    property_name: name.clone(),
                });
            }
        }

        let mut connection = self.connection.begin().await?;

        if let Some(item_name) = &options.name {
            let (sql, args) = self
                .query
                .check_item_name(type_kind, type_id, None, item_name);
            let count: i64 = sqlx::query_scalar_with(&sql, args)
                .fetch_one(&mut connection)
                .await?;
            if count > 0 {
                return Err(PostError::NameAlreadyExists {
                    type_kind,
                    item_name: item_name.clone(),
                });
            }
        }

        let (sql, args) = self.query.insert_item(type_id, &options);
        sqlx::query_with(&sql, args)
            .execute(&mut connection)
            .await?;

        let sql = self.query.get_last_item_id(type_kind);
        let item_id: i32 = sqlx::query_scalar(&sql).fetch_one(&mut connection).await?;

        let properties = options
            .properties
            .iter()
            .map(|(k, v)| (k, v, false))
            .chain(options.custom_properties.iter().map(|(k, v)| (k, v, true)));
        for (name, value, is_custom) in properties {
            let (sql, args) = self.query.upsert_item_property(
                Id::from_kind(item_id, type_kind),
                name,
                value,
                is_custom,
            );
            sqlx::query_with(&sql, args)
                .execute(&mut connection)
                .await?;
        }

        connection.commit().await?;
        tracing::debug!(%type_kind, item_id, "created item");
        Ok(item_id)
    }

    async fn get_type_properties(
        &mut self,
        type_kind: TypeKind,
        type_id: TypeId,
    ) -> Result<Option<PropertyTypes>, GetError> {
        Ok(self
            .execute_get_types(
                type_kind,
                |_, _, properties| properties,
                GetTypesOptions::by_id(type_id),
            )
            .await?
            .into_iter()
            .next())
    }

    async fn check_item_exists(&mut self, item_id: Id) -> Result<(), PutError> {
        let count: i64 = sqlx::query_scalar(&self.query.check_item_id(item_id.kind()))
            .bind(item_id.get())
            .fetch_one(&mut self.connection)
            .await?;
        if count == 0 {
            return Err(PutError::NotFound { item_id });
        }
        Ok(())
    }

    pub(crate) async fn execute_put_item(
        &mut self,
        item_id: Id,
        options: ItemOptions,
    ) -> Result<(), PutError> {
        let (sql, args) = self.query.get_type_id(item_id);
        let type_id = sqlx::query_scalar_with(&sql, args)
            .fetch_optional(&mut self.connection)
            .await?
            .map(TypeId::new)
            .ok_or(PutError::NotFound { item_id })?;

        let property_types = self
            .get_type_properties(item_id.kind(), type_id)
            .await?
            .ok_or(PutError::TypeNotFound { type_id, item_id })?;
        for (name, value) in &options.properties {
            if property_types.get(name).copied() != Some(value.ty()) {
                return Err(PutError::UndefinedProperty {
                    item_id,
                    property_name: name.clone(),
                    property_type: value.ty(),
                });
            }
        }

        let mut connection = self.connection.begin().await?;

        if let Some(item_name) = &options.name {
            let (sql, args) =
                self.query
                    .check_item_name(item_id.kind(), type_id, Some(item_id), item_name);
            let count: i64 = sqlx::query_scalar_with(&sql, args)
                .fetch_one(&mut connection)
                .await?;
            if count > 0 {
                return Err(PutError::NameAlreadyExists {
                    item_id,
                    item_name: item_name.clone(),
                });
            }
        }

        let (sql, args) = self.query.update_item(item_id, &options);
        sqlx::query_with(&sql, args)
            .execute(&mut connection)
            .await?;

        let properties = options
            .properties
            .iter()
            .map(|(k, v)| (k, v, false))
            .chain(options.custom_properties.iter().map(|(k, v)| (k, v, true)));
        for (name, value, is_custom) in properties {
            let (sql, args) = self
                .query
                .upsert_item_property(item_id, name, value, is_custom);
            sqlx::query_with(&sql, args)
                .execute(&mut connection)
                .await?;
        }

        connection.commit().await?;
        Ok(())
    }

    pub(crate) async fn execute_get_items<T>(
        &mut self,
        options: GetItemsOptions,
    ) -> Result<Vec<T>, GetError>
    where
        T: for<'a> sqlx::FromRow<'a, sqlx::any::AnyRow> + InsertProperty,
    {
        let (sql, args) = self.query.get_items(&options);
        let mut rows = sqlx::query_with(&sql, args).fetch(&mut self.connection);
        let mut items = BTreeMap::new();
        let mut order = Vec::new();
        while let Some(row) = rows.try_next().await? {
            let id: i32 = row.try_get("id")?;
            if items.insert(id, T::from_row(&row)?).is_none() {
                order.push(id);
            }
        }
        std::mem::drop(rows);
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let ids = items.keys().copied().collect::<Vec<_>>();
        for chunk in ids.chunks(MAX_BIND_IDS) {
            let (sql, args) = self
                .query
                .get_item_properties(options.type_kind(), chunk.iter().copied());
            let mut rows = sqlx::query_as_with::<_, query::Property, _>(&sql, args)
                .fetch(&mut self.connection);
            while let Some(row) = rows.try_next().await? {
                let is_custom_property = row.is_custom_property;
                let id = row.id;
                let (name, value) = row.into_name_and_value()?;
                if let Some(item) = items.get_mut(&id) {
                    item.insert_property(is_custom_property, name, value);
                }
            }
        }

        let mut result = Vec::new();
        for id in order {
            if let Some(item) = items.remove(&id) {
                result.push(item);
            }
        }
        Ok(result)
    }

    async fn execute_put_relation(
        &mut self,
        context_id: ContextId,
        item_id: Id,
    ) -> Result<(), PutError> {
        let is_attribution = matches!(item_id, Id::Artifact(_));
        self.check_item_exists(Id::Context(context_id)).await?;
        self.check_item_exists(item_id).await?;

        let sql = if is_attribution {
            self.query.insert_or_ignore_attribution()
        } else {
            self.query.insert_or_ignore_association()
        };
        sqlx::query(&sql)
            .bind(context_id.get())
            .bind(item_id.get())
            .execute(&mut self.connection)
            .await?;

        Ok(())
    }

    async fn initialize_database(&mut self) -> Result<(), InitError> {
        let versions = sqlx::query_scalar::<_, i32>(self.query.select_schema_version())
            .fetch_all(&mut self.connection)
            .await;

        match versions {
            Ok(versions) if versions.len() > 1 => Err(InitError::TooManyMlmdEnvRecords {
                count: versions.len(),
            }),
            Ok(versions) if versions == [SCHEMA_VERSION] => Ok(()),
            Ok(versions) if !versions.is_empty() => Err(InitError::UnsupportedSchemaVersion {
                actual: versions[0],
                expected: SCHEMA_VERSION,
            }),
            _ => {
                tracing::info!(version = SCHEMA_VERSION, "creating metadata schema");
                let mut connection = self.connection.begin().await?;

                for query in self.query.create_tables() {
                    sqlx::query(query).execute(&mut connection).await?;
                }

                sqlx::query(&self.query.insert_schema_version())
                    .bind(SCHEMA_VERSION)
                    .execute(&mut connection)
                    .await?;

                connection.commit().await?;
                Ok(())
            }
        }
    }

    pub(crate) async fn execute_put_type(
        &mut self,
        type_kind: TypeKind,
        type_name: &str,
        mut options: PutTypeOptions,
    ) -> Result<TypeId, PutError> {
        let mut connection = self.connection.begin().await?;
        let ty = sqlx::query_as::<_, query::Type>(&self.query.get_type_by_name())
            .bind(type_kind as i32)
            .bind(type_name)
            .fetch_optional(&mut connection)
            .await?;
        let ty = if let Some(ty) = ty {
            let properties = sqlx::query_as::<_, query::TypeProperty>(
                &self.query.get_type_properties_by_type_id(),
            )
            .bind(ty.id)
            .fetch_all(&mut connection)
            .await?;

            for property in properties {
                match options.properties.remove(&property.name) {
                    None if options.can_omit_fields => {}
                    Some(v) if v as i32 == property.data_type => {}
                    _ => {
                        return Err(PutError::TypeAlreadyExists {
                            type_kind,
                            type_name: type_name.to_owned(),
                        });
                    }
                }
            }
            if !options.properties.is_empty() && !options.can_add_fields {
                return Err(PutError::TypeAlreadyExists {
                    type_kind,
                    type_name: type_name.to_owned(),
                });
            }

            ty
        } else {
            sqlx::query(&self.query.insert_type())
                .bind(type_kind as i32)
                .bind(type_name)
                .execute(&mut connection)
                .await?;

            sqlx::query_as::<_, query::Type>(&self.query.get_type_by_name())
                .bind(type_kind as i32)
                .bind(type_name)
                .fetch_one(&mut connection)
                .await?
        };
        for (name, value) in &options.properties {
            sqlx::query(&self.query.insert_type_property())
                .bind(ty.id)
                .bind(name)
                .bind(*value as i32)
                .execute(&mut connection)
                .await?;
        }
        connection.commit().await?;

        Ok(TypeId::new(ty.id))
    }

    pub(crate) async fn execute_get_types<F, T>(
        &mut self,
        type_kind: TypeKind,
        f: F,
        options: GetTypesOptions,
    ) -> Result<Vec<T>, GetError>
    where
        F: Fn(TypeId, String, PropertyTypes) -> T,
    {
        let (sql, args) = self.query.get_types(type_kind, &options);
        let mut types = BTreeMap::new();
        let mut rows =
            sqlx::query_as_with::<_, query::Type, _>(&sql, args).fetch(&mut self.connection);
        while let Some(row) = rows.try_next().await? {
            types.insert(row.id, (row.name, BTreeMap::new()));
        }
        std::mem::drop(rows);
        if types.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = sqlx::query_as::<_, query::TypeProperty>(self.query.get_type_properties())
            .fetch(&mut self.connection);
        while let Some(row) = rows.try_next().await? {
            if let Some(ty) = types.get_mut(&row.type_id) {
                ty.1.insert(row.name, PropertyType::from_i32(row.data_type)?);
            }
        }

        Ok(types
            .into_iter()
            .map(|(id, (name, properties))| f(TypeId::new(id), name, properties))
            .collect())
    }
}
