//! Client-side recording of pipelines, stages, executions and artifacts.
use self::dataslice::DataSlice;
use crate::errors::{Error, PostError, Result};
use crate::metadata::{
    join_uuids, names, property_types_of, split_uuids, Artifact, ArtifactId, Context, ContextId,
    Direction, EventType, Execution, ExecutionId, PropertyType, PropertyValue, PropertyValues,
    TypeId,
};
use crate::metadata_store::options::{GetArtifactsOptions, GetContextsOptions, GetExecutionsOptions};
use crate::MetadataStore;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub mod dataslice;
#[cfg(test)]
mod tests;

/// Source-control provenance stamped on every execution.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GitInfo {
    pub repo: String,
    pub start_commit: String,
    pub end_commit: String,
}

#[derive(Debug, Clone)]
pub struct RecorderOptions {
    pub git: GitInfo,

    /// Directory under which `cmf_artifacts/` files (metrics, slices) are written.
    pub work_dir: PathBuf,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            git: GitInfo::default(),
            work_dir: PathBuf::from("."),
        }
    }
}

/// Writes the metadata graph of pipeline runs into a [`MetadataStore`].
///
/// Every operation returns the node it created or reused, so callers carry
/// the pipeline, stage and execution values explicitly.
#[derive(Debug)]
pub struct Recorder<'a> {
    store: &'a mut MetadataStore,
    options: RecorderOptions,
    metrics: BTreeMap<(ExecutionId, String), Vec<PropertyValues>>,
}

impl<'a> Recorder<'a> {
    pub fn new(store: &'a mut MetadataStore, options: RecorderOptions) -> Self {
        Self {
            store,
            options,
            metrics: BTreeMap::new(),
        }
    }

    pub fn store(&mut self) -> &mut MetadataStore {
        &mut *self.store
    }

    pub fn options(&self) -> &RecorderOptions {
        &self.options
    }

    /// Gets or creates the pipeline named `name`.
    pub async fn create_pipeline(
        &mut self,
        name: &str,
        custom_properties: PropertyValues,
    ) -> Result<Context> {
        self.get_or_create_context(
            names::PIPELINE_TYPE,
            names::PIPELINE,
            name,
            custom_properties,
        )
        .await
    }

    /// Gets or creates the stage `<pipeline>/<name>` and links it to its pipeline.
    pub async fn create_stage(
        &mut self,
        pipeline: &Context,
        name: &str,
        custom_properties: PropertyValues,
    ) -> Result<Context> {
        let prefix = format!("{}/", pipeline.name);
        let full_name = if name.starts_with(&prefix) {
            name.to_owned()
        } else {
            format!("{}{}", prefix, name)
        };
        self.merge_created_context(pipeline, &full_name, custom_properties)
            .await
    }

    /// Gets or creates a stage by its fully qualified name.
    pub async fn merge_created_context(
        &mut self,
        pipeline: &Context,
        full_name: &str,
        custom_properties: PropertyValues,
    ) -> Result<Context> {
        let stage = self
            .get_or_create_context(
                names::STAGE_TYPE,
                names::PIPELINE_STAGE,
                full_name,
                custom_properties,
            )
            .await?;
        self.store.put_parent_context(pipeline.id, stage.id).await?;
        Ok(stage)
    }

    /// Creates a new execution of `execution_type` in `stage`.
    ///
    /// `properties` may supply `Execution` (the command line) and
    /// `Execution_uuid`; a UUID is minted when absent. Context and pipeline
    /// properties are always derived from `stage`.
    pub async fn create_execution(
        &mut self,
        stage: &Context,
        execution_type: &str,
        properties: PropertyValues,
        custom_properties: PropertyValues,
    ) -> Result<Execution> {
        self.post_execution(stage, execution_type, None, properties, custom_properties)
            .await
    }

    /// Gets the execution of `execution_type` named `name`, or creates it.
    ///
    /// A reused execution gains the new run's UUID and its custom properties
    /// are overwritten key by key.
    pub async fn create_reusable_execution(
        &mut self,
        stage: &Context,
        execution_type: &str,
        name: &str,
        mut properties: PropertyValues,
        custom_properties: PropertyValues,
    ) -> Result<Execution> {
        let uuids = properties
            .get(names::EXECUTION_UUID)
            .map(|v| v.to_text())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(mint_uuid);
        properties.insert(names::EXECUTION_UUID.to_owned(), uuids.clone().into());

        let existing = self
            .store
            .get_executions(GetExecutionsOptions::default().type_and_name(execution_type, name))
            .await?
            .into_iter()
            .next();
        match existing {
            Some(execution) => {
                let merged = join_uuids(
                    &execution
                        .properties
                        .get(names::EXECUTION_UUID)
                        .map(|v| v.to_text())
                        .unwrap_or_default(),
                    &uuids,
                );
                self.store
                    .put_execution(execution.id)
                    .property(names::EXECUTION_UUID, merged)
                    .custom_properties(custom_properties)
                    .execute()
                    .await?;
                self.store.put_association(stage.id, execution.id).await?;
                tracing::debug!(id = %execution.id, name, "reused execution");
                self.execution_by_id(execution.id).await
            }
            None => {
                self.post_execution(
                    stage,
                    execution_type,
                    Some(name),
                    properties,
                    custom_properties,
                )
                .await
            }
        }
    }

    /// Attaches an execution received from another store.
    ///
    /// A named execution is reused as in [`Recorder::create_reusable_execution`];
    /// otherwise a new one is created carrying the source UUIDs.
    pub async fn merge_created_execution(
        &mut self,
        stage: &Context,
        execution_type: &str,
        properties: PropertyValues,
        custom_properties: PropertyValues,
        name: &str,
    ) -> Result<Execution> {
        let has_uuid = properties
            .get(names::EXECUTION_UUID)
            .map_or(false, |v| !v.to_text().is_empty());
        if !has_uuid {
            return Err(Error::SchemaMismatch(format!(
                "execution of type {:?} has no {}",
                execution_type,
                names::EXECUTION_UUID
            )));
        }
        let execution_type = if execution_type.is_empty() {
            properties
                .get(names::CONTEXT_TYPE)
                .map(|v| v.to_text())
                .unwrap_or_else(|| stage.name.clone())
        } else {
            execution_type.to_owned()
        };
        if name.is_empty() {
            self.create_execution(stage, &execution_type, properties, custom_properties)
                .await
        } else {
            self.create_reusable_execution(
                stage,
                &execution_type,
                name,
                properties,
                custom_properties,
            )
            .await
        }
    }

    /// Merges `custom_properties` into the execution `execution_id`.
    ///
    /// Integers are stored as integers; any other value is stored as a string.
    pub async fn update_execution(
        &mut self,
        execution_id: ExecutionId,
        custom_properties: PropertyValues,
    ) -> Result<Execution> {
        let execution = self.execution_by_id(execution_id).await?;
        self.store
            .put_execution(execution.id)
            .custom_properties(stored_custom_properties(&custom_properties))
            .execute()
            .await?;
        tracing::debug!(id = %execution.id, keys = custom_properties.len(), "updated execution");
        self.execution_by_id(execution.id).await
    }

    async fn post_execution(
        &mut self,
        stage: &Context,
        execution_type: &str,
        name: Option<&str>,
        properties: PropertyValues,
        custom_properties: PropertyValues,
    ) -> Result<Execution> {
        let pipeline = self.pipeline_of(stage).await?;

        let mut props = PropertyValues::new();
        props.insert(names::EXECUTION.to_owned(), command_line().into());
        props.insert(names::GIT_REPO.to_owned(), self.options.git.repo.clone().into());
        props.insert(
            names::GIT_START_COMMIT.to_owned(),
            self.options.git.start_commit.clone().into(),
        );
        props.insert(
            names::GIT_END_COMMIT.to_owned(),
            self.options.git.end_commit.clone().into(),
        );
        props.insert(names::EXECUTION_TYPE_NAME.to_owned(), execution_type.into());
        props.extend(properties);
        props.insert(names::CONTEXT_TYPE.to_owned(), stage.name.clone().into());
        props.insert(names::CONTEXT_ID.to_owned(), stage.id.get().into());
        props.insert(
            names::PIPELINE_TYPE_PROPERTY.to_owned(),
            pipeline.name.clone().into(),
        );
        props.insert(names::PIPELINE_ID.to_owned(), pipeline.id.get().into());
        let has_uuid = props
            .get(names::EXECUTION_UUID)
            .map_or(false, |v| !v.to_text().is_empty());
        if !has_uuid {
            props.insert(names::EXECUTION_UUID.to_owned(), mint_uuid().into());
        }

        let type_id = self
            .store
            .put_execution_type(execution_type)
            .can_add_fields()
            .can_omit_fields()
            .properties(property_types_of(&props))
            .execute()
            .await?;
        let mut request = self
            .store
            .post_execution(type_id)
            .properties(props)
            .custom_properties(custom_properties);
        if let Some(name) = name {
            request = request.name(name);
        }
        let id = request.execute().await?;
        self.store.put_association(stage.id, id).await?;
        tracing::debug!(%id, execution_type, stage = %stage.name, "created execution");
        self.execution_by_id(id).await
    }

    /// Logs a dataset file, versioned by the SHA-256 digest of its contents.
    pub async fn log_dataset(
        &mut self,
        execution: &Execution,
        path: &str,
        direction: Direction,
        custom_properties: PropertyValues,
    ) -> Result<Artifact> {
        let version = hash_file(path).await?;
        let mut props = PropertyValues::new();
        props.insert(
            names::ARTIFACT_GIT_REPO.to_owned(),
            self.options.git.repo.clone().into(),
        );
        props.insert(
            names::URL.to_owned(),
            pipeline_qualified(execution, path).into(),
        );
        self.log_dataset_with_version(
            execution,
            path,
            &version,
            direction,
            props,
            custom_properties,
        )
        .await
    }

    /// Logs a dataset whose version (content hash) is already known.
    ///
    /// The artifact is named `<url>:<version>` and identified by `version`.
    /// A dataset already known under that version is linked instead, after
    /// its `url` list and custom properties are updated.
    pub async fn log_dataset_with_version(
        &mut self,
        execution: &Execution,
        url: &str,
        version: &str,
        direction: Direction,
        properties: PropertyValues,
        custom_properties: PropertyValues,
    ) -> Result<Artifact> {
        let url_property = text_property(&properties, names::URL);
        if let Some(existing) = self.find_artifact(names::DATASET, version).await? {
            if !custom_properties.is_empty() {
                self.update_existing_artifact(&existing, &custom_properties)
                    .await?;
            }
            self.update_dataset_url(&existing, &url_property).await?;
            self.link_execution_to_artifact(execution, existing.id, direction)
                .await?;
            return self.artifact_by_id(existing.id).await;
        }

        let uri = if version.trim().is_empty() {
            mint_uuid()
        } else {
            version.to_owned()
        };
        let mut props = PropertyValues::new();
        props.insert(
            names::ARTIFACT_GIT_REPO.to_owned(),
            text_property(&properties, names::ARTIFACT_GIT_REPO).into(),
        );
        props.insert(names::COMMIT.to_owned(), version.into());
        props.insert(names::URL.to_owned(), url_property.into());
        self.create_artifact(
            execution,
            NewArtifact {
                type_name: names::DATASET,
                name: format!("{}:{}", url, version),
                uri,
                properties: props,
                custom_properties,
            },
            direction,
        )
        .await
    }

    /// Logs a model file, versioned by the SHA-256 digest of its contents.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_model(
        &mut self,
        execution: &Execution,
        path: &str,
        direction: Direction,
        model_framework: &str,
        model_type: &str,
        model_name: &str,
        custom_properties: PropertyValues,
    ) -> Result<Artifact> {
        let hash = hash_file(path).await?;
        let mut props = PropertyValues::new();
        props.insert(names::MODEL_FRAMEWORK.to_owned(), model_framework.into());
        props.insert(names::MODEL_TYPE.to_owned(), model_type.into());
        props.insert(names::MODEL_NAME.to_owned(), model_name.into());
        props.insert(names::COMMIT.to_owned(), hash.clone().into());
        props.insert(
            names::URL.to_owned(),
            pipeline_qualified(execution, path).into(),
        );
        self.log_model_with_version(execution, path, &hash, direction, props, custom_properties)
            .await
    }

    /// Logs a model whose content hash is already known.
    ///
    /// A new model is named `<path>:<uri>:<execution id>`.
    pub async fn log_model_with_version(
        &mut self,
        execution: &Execution,
        path: &str,
        uri: &str,
        direction: Direction,
        properties: PropertyValues,
        custom_properties: PropertyValues,
    ) -> Result<Artifact> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(Error::SchemaMismatch(format!(
                "model {:?} has an empty uri",
                path
            )));
        }
        let url_property = text_property(&properties, names::URL);
        if let Some(existing) = self.find_artifact(names::MODEL, uri).await? {
            self.update_dataset_url(&existing, &url_property).await?;
            self.link_execution_to_artifact(execution, existing.id, direction)
                .await?;
            return self.artifact_by_id(existing.id).await;
        }

        let mut props = PropertyValues::new();
        for key in [
            names::MODEL_FRAMEWORK,
            names::MODEL_TYPE,
            names::MODEL_NAME,
            names::COMMIT,
        ] {
            props.insert(key.to_owned(), text_property(&properties, key).into());
        }
        props.insert(names::URL.to_owned(), url_property.into());
        self.create_artifact(
            execution,
            NewArtifact {
                type_name: names::MODEL,
                name: format!("{}:{}:{}", path, uri, execution.id),
                uri: uri.to_owned(),
                properties: props,
                custom_properties,
            },
            direction,
        )
        .await
    }

    /// Logs coarse-grained metrics of an execution as a `Metrics` artifact
    /// without a backing file.
    pub async fn log_execution_metrics(
        &mut self,
        execution: &Execution,
        metrics_name: &str,
        custom_properties: PropertyValues,
    ) -> Result<Artifact> {
        let uri = mint_uuid();
        let name = format!("{}:{}:{}", metrics_name, uri, execution.id);
        let mut props = PropertyValues::new();
        props.insert(names::METRICS_NAME.to_owned(), name.clone().into());
        self.create_artifact(
            execution,
            NewArtifact {
                type_name: names::METRICS,
                name,
                uri,
                properties: props,
                custom_properties,
            },
            Direction::Output,
        )
        .await
    }

    /// Recreates metrics logged by another store.
    ///
    /// `metrics_name` has the form `<name>:<uri>:<execution id>`; the
    /// execution id is replaced by the local one.
    pub async fn log_execution_metrics_from_client(
        &mut self,
        execution: &Execution,
        metrics_name: &str,
        custom_properties: PropertyValues,
    ) -> Result<Artifact> {
        let tokens = metrics_name.split(':').collect::<Vec<_>>();
        if tokens.len() < 3 {
            return Err(Error::SchemaMismatch(format!(
                "metrics name {:?} is not of the form name:uri:execution",
                metrics_name
            )));
        }
        let (name, uri) = (tokens[0], tokens[1]);
        if let Some(existing) = self.find_artifact(names::METRICS, uri).await? {
            self.link_execution_to_artifact(execution, existing.id, Direction::Output)
                .await?;
            return Ok(existing);
        }

        let mut props = PropertyValues::new();
        props.insert(names::METRICS_NAME.to_owned(), metrics_name.into());
        self.create_artifact(
            execution,
            NewArtifact {
                type_name: names::METRICS,
                name: format!("{}:{}:{}", name, uri, execution.id),
                uri: uri.to_owned(),
                properties: props,
                custom_properties,
            },
            Direction::Output,
        )
        .await
    }

    /// Buffers one step of fine-grained metrics until [`Recorder::commit_metrics`].
    pub fn log_metric(
        &mut self,
        execution: &Execution,
        metrics_name: &str,
        custom_properties: PropertyValues,
    ) {
        self.metrics
            .entry((execution.id, metrics_name.to_owned()))
            .or_default()
            .push(custom_properties);
    }

    /// Names of the metrics buffered for `execution` and not yet committed.
    pub fn pending_metrics(&self, execution: &Execution) -> Vec<String> {
        self.metrics
            .keys()
            .filter(|(id, _)| *id == execution.id)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Writes the buffered steps of `metrics_name` and logs them as a
    /// `Step_Metrics` artifact.
    pub async fn commit_metrics(
        &mut self,
        execution: &Execution,
        metrics_name: &str,
    ) -> Result<Artifact> {
        let rows = self
            .metrics
            .remove(&(execution.id, metrics_name.to_owned()))
            .ok_or_else(|| Error::NotFound(format!("metrics {:?}", metrics_name)))?;
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                let mut object = serde_json::Map::new();
                object.insert("SequenceNumber".to_owned(), (i + 1).into());
                for (k, v) in row {
                    object.insert(k, serde_json::to_value(v)?);
                }
                Ok(serde_json::Value::Object(object))
            })
            .collect::<Result<Vec<_>, serde_json::Error>>()?;
        let content = serde_json::to_vec_pretty(&rows)?;

        let execution_uuid = current_uuid(execution);
        let path = format!("cmf_artifacts/{}/metrics/{}", execution_uuid, metrics_name);
        self.write_artifact_file(&path, &content).await?;
        let hash = sha256_hex(&content);

        let mut custom = PropertyValues::new();
        custom.insert("Name".to_owned(), metrics_name.into());
        custom.insert(names::COMMIT.to_owned(), hash.clone().into());
        self.create_artifact(
            execution,
            NewArtifact {
                type_name: names::STEP_METRICS,
                name: format!("{}:{}:{}:{}", path, hash, execution.id, execution_uuid),
                uri: hash,
                properties: PropertyValues::new(),
                custom_properties: custom,
            },
            Direction::Output,
        )
        .await
    }

    /// Links existing step metrics identified by `uri`, or records them under `metrics_name`.
    pub async fn commit_existing_metrics(
        &mut self,
        execution: &Execution,
        metrics_name: &str,
        uri: &str,
        custom_properties: PropertyValues,
    ) -> Result<Artifact> {
        let uri = uri.trim();
        if let Some(existing) = self.find_artifact(names::STEP_METRICS, uri).await? {
            self.link_execution_to_artifact(execution, existing.id, Direction::Output)
                .await?;
            return Ok(existing);
        }
        self.create_artifact(
            execution,
            NewArtifact {
                type_name: names::STEP_METRICS,
                name: metrics_name.to_owned(),
                uri: uri.to_owned(),
                properties: PropertyValues::new(),
                custom_properties,
            },
            Direction::Output,
        )
        .await
    }

    pub fn create_dataslice(&self, name: &str) -> DataSlice {
        DataSlice::new(name)
    }

    /// Gets or creates an artifact of any type received from another store.
    #[allow(clippy::too_many_arguments)]
    pub async fn merge_artifact(
        &mut self,
        execution: &Execution,
        type_name: &str,
        name: &str,
        uri: &str,
        properties: PropertyValues,
        custom_properties: PropertyValues,
        direction: Direction,
    ) -> Result<Artifact> {
        if let Some(existing) = self.find_artifact(type_name, uri).await? {
            if !custom_properties.is_empty() {
                self.update_existing_artifact(&existing, &custom_properties)
                    .await?;
            }
            self.link_execution_to_artifact(execution, existing.id, direction)
                .await?;
            return self.artifact_by_id(existing.id).await;
        }
        self.create_artifact(
            execution,
            NewArtifact {
                type_name,
                name: name.to_owned(),
                uri: uri.to_owned(),
                properties,
                custom_properties,
            },
            direction,
        )
        .await
    }

    /// Overwrites custom properties of `artifact`.
    ///
    /// Integers are stored as integers; any other value is stored as a string.
    pub async fn update_existing_artifact(
        &mut self,
        artifact: &Artifact,
        custom_properties: &PropertyValues,
    ) -> Result<()> {
        self.store
            .put_artifact(artifact.id)
            .custom_properties(stored_custom_properties(custom_properties))
            .execute()
            .await?;
        Ok(())
    }

    /// Adds `url` to the comma-joined `url` property of `artifact`.
    pub async fn update_dataset_url(&mut self, artifact: &Artifact, url: &str) -> Result<()> {
        let url = url.trim();
        if url.is_empty() {
            return Ok(());
        }
        let current = text_property(&artifact.properties, names::URL);
        if current.split(',').any(|u| u.trim() == url) {
            return Ok(());
        }
        let updated = if current.trim().is_empty() {
            url.to_owned()
        } else {
            format!("{},{}", current, url)
        };
        self.store
            .put_artifact_type(&artifact.type_name)
            .can_add_fields()
            .can_omit_fields()
            .property(names::URL, PropertyType::String)
            .execute()
            .await?;
        self.store
            .put_artifact(artifact.id)
            .property(names::URL, updated)
            .execute()
            .await?;
        Ok(())
    }

    /// Adds `url` to the `url` property of every model in `models`.
    pub async fn update_model_url(
        &mut self,
        models: &[Artifact],
        url: &str,
    ) -> Result<Vec<Artifact>> {
        let mut updated = Vec::with_capacity(models.len());
        for model in models {
            self.update_dataset_url(model, url).await?;
            updated.push(self.artifact_by_id(model.id).await?);
        }
        Ok(updated)
    }

    /// Writes back the name, uri and properties of an edited model.
    pub async fn update_model_output(&mut self, model: &Artifact) -> Result<Artifact> {
        self.store
            .put_artifact_type(&model.type_name)
            .can_add_fields()
            .can_omit_fields()
            .properties(property_types_of(&model.properties))
            .execute()
            .await?;
        let mut request = self
            .store
            .put_artifact(model.id)
            .properties(model.properties.clone())
            .custom_properties(model.custom_properties.clone());
        if let Some(name) = &model.name {
            request = request.name(name);
        }
        if let Some(uri) = &model.uri {
            request = request.uri(uri);
        }
        request.execute().await?;
        self.artifact_by_id(model.id).await
    }

    /// Logs a validation result of `execution` as an internal output.
    ///
    /// The artifact is named by a fresh UUID and never leaves the local store.
    pub async fn log_validation_output(
        &mut self,
        execution: &Execution,
        version: &str,
        custom_properties: PropertyValues,
    ) -> Result<Artifact> {
        let uri = mint_uuid();
        let mut props = PropertyValues::new();
        props.insert(names::VERSION.to_owned(), version.into());
        self.create_artifact_with_event(
            execution,
            NewArtifact {
                type_name: names::VALIDATION_OUTPUT,
                name: uri.clone(),
                uri,
                properties: props,
                custom_properties,
            },
            EventType::InternalOutput,
        )
        .await
    }

    /// Reads the slice file at `path`, relative to the work directory.
    pub async fn read_dataslice(&self, path: &str) -> Result<DataSlice> {
        DataSlice::read(self.options.work_dir.join(path)).await
    }

    /// Merges `custom_properties` into the record `record` of a committed
    /// slice file.
    ///
    /// Only the file is rewritten; the logged artifact keeps the hash it was
    /// committed with.
    pub async fn update_dataslice(
        &self,
        path: &str,
        record: &str,
        custom_properties: PropertyValues,
    ) -> Result<()> {
        let mut slice = self.read_dataslice(path).await?;
        slice.update_data(record, custom_properties)?;
        self.write_artifact_file(path, &slice.content()?).await
    }

    /// Records the event between `execution` and the artifact and attributes
    /// the artifact to the execution's stage. Both writes are idempotent.
    pub async fn link_execution_to_artifact(
        &mut self,
        execution: &Execution,
        artifact_id: ArtifactId,
        direction: Direction,
    ) -> Result<()> {
        self.link_event(execution, artifact_id, direction.event_type())
            .await
    }

    async fn link_event(
        &mut self,
        execution: &Execution,
        artifact_id: ArtifactId,
        event_type: EventType,
    ) -> Result<()> {
        let stage_id = self.stage_id_of(execution).await?;
        self.store
            .put_event(execution.id, artifact_id, event_type)
            .await?;
        self.store.put_attribution(stage_id, artifact_id).await?;
        Ok(())
    }

    pub(crate) async fn find_artifact(
        &mut self,
        type_name: &str,
        uri: &str,
    ) -> Result<Option<Artifact>> {
        if uri.is_empty() {
            return Ok(None);
        }
        Ok(self
            .store
            .get_artifacts(GetArtifactsOptions::default().ty(type_name).uri(uri))
            .await?
            .into_iter()
            .next())
    }

    async fn create_artifact(
        &mut self,
        execution: &Execution,
        artifact: NewArtifact<'_>,
        direction: Direction,
    ) -> Result<Artifact> {
        self.create_artifact_with_event(execution, artifact, direction.event_type())
            .await
    }

    async fn create_artifact_with_event(
        &mut self,
        execution: &Execution,
        artifact: NewArtifact<'_>,
        event_type: EventType,
    ) -> Result<Artifact> {
        let type_id = self
            .artifact_type(artifact.type_name, &artifact.properties)
            .await?;
        let result = self
            .store
            .post_artifact(type_id)
            .name(&artifact.name)
            .uri(&artifact.uri)
            .properties(artifact.properties)
            .custom_properties(artifact.custom_properties)
            .execute()
            .await;
        let id = match result {
            Ok(id) => id,
            Err(PostError::NameAlreadyExists { .. }) => self
                .store
                .get_artifacts(
                    GetArtifactsOptions::default().type_and_name(artifact.type_name, &artifact.name),
                )
                .await?
                .into_iter()
                .next()
                .map(|a| a.id)
                .ok_or_else(|| Error::Conflict(artifact.name.clone()))?,
            Err(e) => return Err(e.into()),
        };
        self.link_event(execution, id, event_type).await?;
        tracing::debug!(%id, name = %artifact.name, ty = artifact.type_name, "logged artifact");
        self.artifact_by_id(id).await
    }

    async fn artifact_type(&mut self, type_name: &str, properties: &PropertyValues) -> Result<TypeId> {
        Ok(self
            .store
            .put_artifact_type(type_name)
            .can_add_fields()
            .can_omit_fields()
            .properties(property_types_of(properties))
            .execute()
            .await?)
    }

    async fn get_or_create_context(
        &mut self,
        type_name: &str,
        property_name: &str,
        name: &str,
        custom_properties: PropertyValues,
    ) -> Result<Context> {
        let type_id = self
            .store
            .put_context_type(type_name)
            .can_add_fields()
            .can_omit_fields()
            .property(property_name, PropertyType::String)
            .execute()
            .await?;
        if let Some(context) = self
            .store
            .get_context_by_type_and_name(type_name, name)
            .await?
        {
            return Ok(context);
        }

        let result = self
            .store
            .post_context(type_id, name)
            .property(property_name, name)
            .custom_properties(custom_properties)
            .execute()
            .await;
        match result {
            Ok(id) => {
                tracing::info!(%id, name, ty = type_name, "created context");
                self.context_by_id(id).await
            }
            Err(PostError::NameAlreadyExists { .. }) => self
                .store
                .get_context_by_type_and_name(type_name, name)
                .await?
                .ok_or_else(|| Error::Conflict(name.to_owned())),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) async fn pipeline_of(&mut self, stage: &Context) -> Result<Context> {
        self.store
            .get_parent_contexts_by_context(stage.id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("pipeline of stage {:?}", stage.name)))
    }

    async fn stage_id_of(&mut self, execution: &Execution) -> Result<ContextId> {
        if let Some(id) = execution.int_property(names::CONTEXT_ID) {
            return Ok(ContextId::new(id as i32));
        }
        self.store
            .get_contexts_by_execution(execution.id)
            .await?
            .into_iter()
            .next()
            .map(|c| c.id)
            .ok_or_else(|| Error::NotFound(format!("stage of execution {}", execution.id)))
    }

    async fn context_by_id(&mut self, id: ContextId) -> Result<Context> {
        self.store
            .get_contexts(GetContextsOptions::default().ids(&[id]))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("context {}", id)))
    }

    async fn execution_by_id(&mut self, id: ExecutionId) -> Result<Execution> {
        self.store
            .get_executions_by_id(&[id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("execution {}", id)))
    }

    async fn artifact_by_id(&mut self, id: ArtifactId) -> Result<Artifact> {
        self.store
            .get_artifacts_by_id(&[id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("artifact {}", id)))
    }

    async fn write_artifact_file(&self, relative_path: &str, content: &[u8]) -> Result<()> {
        let path = self.options.work_dir.join(relative_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(())
    }
}

struct NewArtifact<'b> {
    type_name: &'b str,
    name: String,
    uri: String,
    properties: PropertyValues,
    custom_properties: PropertyValues,
}

pub(crate) fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Integers are kept; any other custom value is stored as its text.
fn stored_custom_properties(custom_properties: &PropertyValues) -> PropertyValues {
    custom_properties
        .iter()
        .map(|(k, v)| {
            let v = match v {
                PropertyValue::Int(_) => v.clone(),
                _ => PropertyValue::String(v.to_text()),
            };
            (k.clone(), v)
        })
        .collect()
}

async fn hash_file(path: &str) -> Result<String> {
    let content = tokio::fs::read(path).await?;
    Ok(sha256_hex(&content))
}

fn mint_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn command_line() -> String {
    std::env::args().collect::<Vec<_>>().join(" ")
}

/// The UUID of the latest run recorded on `execution`.
fn current_uuid(execution: &Execution) -> String {
    split_uuids(
        &execution
            .properties
            .get(names::EXECUTION_UUID)
            .map(|v| v.to_text())
            .unwrap_or_default(),
    )
    .pop()
    .unwrap_or_default()
}

fn pipeline_qualified(execution: &Execution, path: &str) -> String {
    match execution.string_property(names::PIPELINE_TYPE_PROPERTY) {
        Some(pipeline) => format!("{}:{}", pipeline, path),
        None => path.to_owned(),
    }
}

fn text_property(properties: &PropertyValues, key: &str) -> String {
    properties.get(key).map(|v| v.to_text()).unwrap_or_default()
}
