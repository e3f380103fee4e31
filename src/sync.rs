//! Push and pull of pipeline subgraphs between stores.
//!
//! A store exports a pipeline with [`dumptojson`] (or the part of every
//! pipeline updated since a point in time with [`extract_to_json`]); the
//! receiving store merges it with [`update_mlmd`], which skips executions it
//! already holds.
use self::payload::{
    ArtifactNode, EventNode, ExecutionNode, MlmdPayload, PipelineNode, StageNode,
};
use crate::cmfquery::CmfQuery;
use crate::errors::{Error, Result};
use crate::metadata::{
    names, split_uuids, Artifact, Context, Direction, Execution, PropertyValue, PropertyValues,
};
use crate::recorder::{Recorder, RecorderOptions};
use crate::MetadataStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

pub mod payload;

/// Outcome of a push or pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,

    /// Every execution of the payload is already in the store.
    Exists,
    PipelineNotExist,
    InvalidJsonPayload,

    /// The payload was written by an incompatible client (missing
    /// `Execution_uuid`, conflicting property types).
    VersionUpdate,
    NoExecUuid,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Exists => "exists",
            Self::PipelineNotExist => "pipeline_not_exist",
            Self::InvalidJsonPayload => "invalid_json_payload",
            Self::VersionUpdate => "version_update",
            Self::NoExecUuid => "no_exec_uuid",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// A client payload merged into the server store.
    Push,

    /// A server payload merged into a client store.
    Pull,
}

/// Execution UUIDs of a store and a payload for one pipeline.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecutionDiff {
    pub in_store: BTreeSet<String>,

    /// UUIDs of the non-reusable executions of the payload.
    pub in_payload: BTreeSet<String>,
    pub already_present: BTreeSet<String>,

    /// `Some(VersionUpdate)` when a non-reusable execution has no UUID.
    pub status: Option<SyncStatus>,
}

pub async fn identify_existing_and_new_executions(
    query: &mut CmfQuery<'_>,
    pipeline: &PipelineNode,
    pipeline_name: &str,
) -> Result<ExecutionDiff> {
    let mut diff = ExecutionDiff::default();
    for row in query.get_all_executions_in_pipeline(pipeline_name).await? {
        if let Some(uuids) = row.get(names::EXECUTION_UUID) {
            diff.in_store.extend(split_uuids(&uuids.to_text()));
        }
    }

    for execution in pipeline.stages.iter().flat_map(|s| &s.executions) {
        if execution.is_reusable() {
            continue;
        }
        match execution.uuids() {
            Some(uuids) => diff.in_payload.extend(uuids),
            None => {
                diff.status = Some(SyncStatus::VersionUpdate);
                return Ok(diff);
            }
        }
    }
    diff.already_present = diff
        .in_store
        .intersection(&diff.in_payload)
        .cloned()
        .collect();
    Ok(diff)
}

/// Merges the executions of `payload_json` that `store` does not hold yet.
///
/// Only the pipeline named `pipeline_name` is merged when given, every
/// pipeline of the payload otherwise. The merge is atomic: on failure the
/// store is left unchanged.
pub async fn update_mlmd(
    store: &mut MetadataStore,
    payload_json: &str,
    pipeline_name: Option<&str>,
    direction: SyncDirection,
) -> Result<SyncStatus> {
    let mut payload = match serde_json::from_str::<MlmdPayload>(payload_json) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "rejected a malformed payload");
            return Ok(SyncStatus::InvalidJsonPayload);
        }
    };
    if payload.pipelines.is_empty() {
        return Ok(SyncStatus::InvalidJsonPayload);
    }
    let selected = match pipeline_name {
        Some(name) => match payload.pipelines.iter().position(|p| p.name == name) {
            Some(i) => vec![payload.pipelines.swap_remove(i)],
            None => return Ok(SyncStatus::PipelineNotExist),
        },
        None => std::mem::take(&mut payload.pipelines),
    };

    // The diff reads inside the merge transaction.
    store.begin_transaction().await?;
    match diff_and_merge(store, selected, direction).await {
        Ok(SyncStatus::Success) => {
            store.commit_transaction().await?;
            Ok(SyncStatus::Success)
        }
        Ok(status) => {
            store.rollback_transaction().await?;
            Ok(status)
        }
        Err(e) => {
            store.rollback_transaction().await?;
            if e.is_schema_mismatch() {
                tracing::warn!(error = %e, "payload conflicts with the store schema");
                Ok(SyncStatus::VersionUpdate)
            } else {
                Err(e)
            }
        }
    }
}

async fn diff_and_merge(
    store: &mut MetadataStore,
    selected: Vec<PipelineNode>,
    direction: SyncDirection,
) -> Result<SyncStatus> {
    let mut remaining = Vec::new();
    for mut pipeline in selected {
        let diff =
            identify_existing_and_new_executions(&mut CmfQuery::new(store), &pipeline, &pipeline.name)
                .await?;
        if let Some(status) = diff.status {
            tracing::warn!(pipeline = %pipeline.name, %status, "payload has an execution without uuid");
            return Ok(status);
        }
        retain_new_executions(&mut pipeline, &diff.already_present);
        if pipeline.stages.is_empty() {
            tracing::info!(pipeline = %pipeline.name, "every execution is already present");
        } else {
            remaining.push(pipeline);
        }
    }
    if remaining.is_empty() {
        return Ok(SyncStatus::Exists);
    }
    if direction == SyncDirection::Push {
        for pipeline in &mut remaining {
            stamp_pipeline(pipeline);
        }
    }

    merge_pipelines(store, &remaining).await?;
    tracing::info!(
        pipelines = ?remaining.iter().map(|p| &p.name).collect::<Vec<_>>(),
        ?direction,
        "merged payload"
    );
    Ok(SyncStatus::Success)
}

/// Drops non-reusable executions whose UUIDs are already present, then the stages left empty.
fn retain_new_executions(pipeline: &mut PipelineNode, already_present: &BTreeSet<String>) {
    for stage in &mut pipeline.stages {
        stage.executions.retain(|execution| {
            execution.is_reusable()
                || !execution
                    .uuids()
                    .unwrap_or_default()
                    .iter()
                    .any(|u| already_present.contains(u))
        });
    }
    pipeline.stages.retain(|stage| !stage.executions.is_empty());
}

/// Merges every pipeline of `payload_json` into `store`, without diffing.
pub async fn parse_json_to_mlmd(
    store: &mut MetadataStore,
    payload_json: &str,
    direction: SyncDirection,
) -> Result<()> {
    let mut payload = serde_json::from_str::<MlmdPayload>(payload_json)?;
    if direction == SyncDirection::Push {
        create_original_time_since_epoch(&mut payload);
    }
    store.begin_transaction().await?;
    match merge_pipelines(store, &payload.pipelines).await {
        Ok(()) => Ok(store.commit_transaction().await?),
        Err(e) => {
            store.rollback_transaction().await?;
            Err(e)
        }
    }
}

/// Keeps the creation time of every node in the source store as the custom
/// property `original_create_time_since_epoch`.
///
/// A node already carrying the property keeps its value, so the stamp always
/// refers to the store where the node was first recorded.
pub fn create_original_time_since_epoch(payload: &mut MlmdPayload) {
    for pipeline in &mut payload.pipelines {
        stamp_pipeline(pipeline);
    }
}

fn stamp_pipeline(pipeline: &mut PipelineNode) {
    pipeline.original_create_time_since_epoch = Some(
        pipeline
            .original_create_time_since_epoch
            .unwrap_or(pipeline.create_time_since_epoch),
    );
    stamp(&mut pipeline.custom_properties, pipeline.create_time_since_epoch);
    for stage in &mut pipeline.stages {
        stamp(&mut stage.custom_properties, stage.create_time_since_epoch);
        for execution in &mut stage.executions {
            stamp(
                &mut execution.custom_properties,
                execution.create_time_since_epoch,
            );
            for event in &mut execution.events {
                let artifact = &mut event.artifact;
                stamp(&mut artifact.custom_properties, artifact.create_time_since_epoch);
            }
        }
    }
}

fn stamp(custom_properties: &mut PropertyValues, create_time: u64) {
    custom_properties
        .entry(names::ORIGINAL_CREATE_TIME.to_owned())
        .or_insert(PropertyValue::Int(create_time as i64));
}

async fn merge_pipelines(store: &mut MetadataStore, pipelines: &[PipelineNode]) -> Result<()> {
    let mut recorder = Recorder::new(store, RecorderOptions::default());
    for pipeline in pipelines {
        merge_pipeline(&mut recorder, pipeline).await?;
    }
    Ok(())
}

async fn merge_pipeline(recorder: &mut Recorder<'_>, pipeline: &PipelineNode) -> Result<()> {
    let context = recorder
        .create_pipeline(&pipeline.name, pipeline.custom_properties.clone())
        .await?;
    for stage in &pipeline.stages {
        let stage_context = recorder
            .merge_created_context(&context, &stage.name, stage.custom_properties.clone())
            .await?;
        for node in &stage.executions {
            let execution = recorder
                .merge_created_execution(
                    &stage_context,
                    &node.ty,
                    node.properties.clone(),
                    node.custom_properties.clone(),
                    &node.name,
                )
                .await?;
            for event in &node.events {
                merge_event(recorder, &execution, event).await?;
            }
            tracing::debug!(
                id = %execution.id,
                stage = %stage.name,
                events = node.events.len(),
                "merged execution"
            );
        }
    }
    Ok(())
}

async fn merge_event(
    recorder: &mut Recorder<'_>,
    execution: &Execution,
    event: &EventNode,
) -> Result<Artifact> {
    let artifact = &event.artifact;
    let direction = Direction::from_wire(event.ty).ok_or_else(|| {
        Error::SchemaMismatch(format!(
            "event type {} linking artifact {:?}",
            event.ty, artifact.name
        ))
    })?;
    let custom_properties = artifact.custom_properties.clone();
    let head = artifact.name.split(':').next().unwrap_or(&artifact.name);
    match artifact.ty.as_str() {
        names::DATASET => {
            let url = artifact
                .name
                .strip_suffix(&format!(":{}", artifact.uri))
                .unwrap_or(head);
            recorder
                .log_dataset_with_version(
                    execution,
                    url,
                    &artifact.uri,
                    direction,
                    artifact.properties.clone(),
                    custom_properties,
                )
                .await
        }
        names::MODEL => {
            let path = artifact
                .name
                .split_once(&format!(":{}:", artifact.uri))
                .map_or(head, |(path, _)| path);
            recorder
                .log_model_with_version(
                    execution,
                    path,
                    &artifact.uri,
                    direction,
                    artifact.properties.clone(),
                    custom_properties,
                )
                .await
        }
        names::METRICS => {
            recorder
                .log_execution_metrics_from_client(execution, &artifact.name, custom_properties)
                .await
        }
        names::DATASLICE => {
            let slice = recorder.create_dataslice(&artifact.name);
            slice
                .commit_existing(recorder, execution, &artifact.uri, custom_properties)
                .await
        }
        names::STEP_METRICS => {
            recorder
                .commit_existing_metrics(execution, &artifact.name, &artifact.uri, custom_properties)
                .await
        }
        other => {
            recorder
                .merge_artifact(
                    execution,
                    other,
                    &artifact.name,
                    &artifact.uri,
                    artifact.properties.clone(),
                    custom_properties,
                    direction,
                )
                .await
        }
    }
}

/// Serializes the pipeline named `pipeline_name` to the wire format.
///
/// Returns `None` if the pipeline does not exist. With `execution_uuid`
/// only the execution carrying that UUID is exported; an unknown UUID is
/// [`Error::NotFound`].
pub async fn dumptojson(
    store: &mut MetadataStore,
    pipeline_name: &str,
    execution_uuid: Option<&str>,
) -> Result<Option<String>> {
    let pipeline = match store
        .get_context_by_type_and_name(names::PIPELINE_TYPE, pipeline_name)
        .await?
    {
        Some(pipeline) => pipeline,
        None => return Ok(None),
    };
    let filter = ExportFilter {
        execution_uuid,
        updated_after: None,
    };
    let node = export_pipeline(store, &pipeline, &filter)
        .await?
        .unwrap_or_default();
    if let Some(uuid) = execution_uuid {
        if node.stages.iter().all(|s| s.executions.is_empty()) {
            return Err(Error::NotFound(format!(
                "execution {:?} in pipeline {:?}",
                uuid, pipeline_name
            )));
        }
    }
    let payload = MlmdPayload {
        pipelines: vec![node],
    };
    Ok(Some(serde_json::to_string(&payload)?))
}

/// Serializes every node updated after `last_sync_time` (milliseconds since
/// epoch), together with the ancestors needed to attach it.
pub async fn extract_to_json(store: &mut MetadataStore, last_sync_time: u64) -> Result<String> {
    let filter = ExportFilter {
        execution_uuid: None,
        updated_after: Some(last_sync_time),
    };
    let mut pipelines = Vec::new();
    for pipeline in store.get_contexts_by_type(names::PIPELINE_TYPE).await? {
        if let Some(node) = export_pipeline(store, &pipeline, &filter).await? {
            pipelines.push(node);
        }
    }
    tracing::debug!(last_sync_time, pipelines = pipelines.len(), "extracted delta");
    Ok(serde_json::to_string(&MlmdPayload { pipelines })?)
}

#[derive(Debug, Clone, Copy)]
struct ExportFilter<'a> {
    execution_uuid: Option<&'a str>,
    updated_after: Option<u64>,
}

impl ExportFilter<'_> {
    fn is_updated(&self, last_update: Duration) -> bool {
        self.updated_after
            .map_or(true, |since| millis(last_update) > since)
    }

    fn selects(&self, execution: &Execution) -> bool {
        self.execution_uuid
            .map_or(true, |uuid| execution.uuids().iter().any(|u| u == uuid))
    }
}

/// Builds the wire tree of `pipeline`; `None` when nothing in it passes `filter`.
///
/// Only INPUT and OUTPUT events are exported. An event is kept when its
/// execution or its artifact is updated; an execution, stage or pipeline is
/// kept when it is updated or has a kept child.
/// Under a uuid filter only the stages holding the selected execution are kept.
async fn export_pipeline(
    store: &mut MetadataStore,
    pipeline: &Context,
    filter: &ExportFilter<'_>,
) -> Result<Option<PipelineNode>> {
    let mut stages = Vec::new();
    for stage in store.get_children_contexts_by_context(pipeline.id).await? {
        let mut executions = Vec::new();
        for execution in store.get_executions_by_context(stage.id).await? {
            if !filter.selects(&execution) {
                continue;
            }
            let execution_updated = filter.is_updated(execution.last_update_time_since_epoch);
            let events = store.get_events_by_execution_ids(&[execution.id]).await?;
            let ids = events.iter().map(|e| e.artifact_id).collect::<Vec<_>>();
            let artifacts = store.get_artifacts_by_id(&ids).await?;

            let mut event_nodes = Vec::new();
            for event in &events {
                if Direction::from_wire(event.ty as i32).is_none() {
                    continue;
                }
                let artifact = match artifacts.iter().find(|a| a.id == event.artifact_id) {
                    Some(artifact) => artifact,
                    None => continue,
                };
                if execution_updated || filter.is_updated(artifact.last_update_time_since_epoch) {
                    event_nodes.push(EventNode {
                        ty: event.ty as i32,
                        artifact: artifact_node(artifact),
                    });
                }
            }
            if execution_updated || !event_nodes.is_empty() {
                executions.push(execution_node(&execution, event_nodes));
            }
        }
        let stage_selected = filter.execution_uuid.is_none()
            && filter.is_updated(stage.last_update_time_since_epoch);
        if stage_selected || !executions.is_empty() {
            stages.push(StageNode {
                id: Some(stage.id.get()),
                name: stage.name.clone(),
                ty: Some(stage.type_name.clone()),
                create_time_since_epoch: millis(stage.create_time_since_epoch),
                last_update_time_since_epoch: millis(stage.last_update_time_since_epoch),
                properties: stage.properties.clone(),
                custom_properties: exported_custom_properties(&stage.custom_properties),
                executions,
            });
        }
    }
    if !filter.is_updated(pipeline.last_update_time_since_epoch) && stages.is_empty() {
        return Ok(None);
    }
    Ok(Some(PipelineNode {
        id: Some(pipeline.id.get()),
        name: pipeline.name.clone(),
        ty: Some(pipeline.type_name.clone()),
        create_time_since_epoch: millis(pipeline.create_time_since_epoch),
        last_update_time_since_epoch: millis(pipeline.last_update_time_since_epoch),
        properties: pipeline.properties.clone(),
        custom_properties: exported_custom_properties(&pipeline.custom_properties),
        original_create_time_since_epoch: None,
        stages,
    }))
}

fn execution_node(execution: &Execution, events: Vec<EventNode>) -> ExecutionNode {
    ExecutionNode {
        id: Some(execution.id.get()),
        name: execution.name.clone().unwrap_or_default(),
        ty: execution.type_name.clone(),
        create_time_since_epoch: millis(execution.create_time_since_epoch),
        last_update_time_since_epoch: millis(execution.last_update_time_since_epoch),
        properties: execution.properties.clone(),
        custom_properties: exported_custom_properties(&execution.custom_properties),
        events,
    }
}

fn artifact_node(artifact: &Artifact) -> ArtifactNode {
    ArtifactNode {
        id: Some(artifact.id.get()),
        name: artifact.name().to_owned(),
        ty: artifact.type_name.clone(),
        uri: artifact.uri().to_owned(),
        create_time_since_epoch: millis(artifact.create_time_since_epoch),
        last_update_time_since_epoch: millis(artifact.last_update_time_since_epoch),
        properties: artifact.properties.clone(),
        custom_properties: exported_custom_properties(&artifact.custom_properties),
    }
}

/// The custom property `type` would shadow the node type on the wire.
fn exported_custom_properties(custom_properties: &PropertyValues) -> PropertyValues {
    custom_properties
        .iter()
        .map(|(k, v)| {
            let k = if k == "type" { "user_type" } else { k.as_str() };
            (k.to_owned(), v.clone())
        })
        .collect()
}

fn millis(t: Duration) -> u64 {
    t.as_millis() as u64
}
