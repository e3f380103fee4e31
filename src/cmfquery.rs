//! Read-side queries over the metadata graph.
use self::rows::{
    ArtifactRow, ExecutionLinkRow, ExecutionNode, ExecutionRow, ExecutionTree, LineageLink,
    ModelCard,
};
use crate::errors::Result;
use crate::metadata::{
    names, Artifact, ArtifactId, Context, ContextId, EventType, Execution, ExecutionId,
};
use crate::metadata_store::options::GetArtifactsOptions;
use crate::MetadataStore;
use std::collections::{BTreeSet, HashSet, VecDeque};

pub mod rows;
#[cfg(test)]
mod tests;

/// Query engine.
///
/// Every query returns an empty result when its anchor (pipeline, stage,
/// artifact or execution) does not exist.
#[derive(Debug)]
pub struct CmfQuery<'a> {
    store: &'a mut MetadataStore,
}

impl<'a> CmfQuery<'a> {
    pub fn new(store: &'a mut MetadataStore) -> Self {
        Self { store }
    }

    pub fn store(&mut self) -> &mut MetadataStore {
        &mut *self.store
    }

    pub async fn get_pipeline_names(&mut self) -> Result<Vec<String>> {
        Ok(self
            .store
            .get_contexts_by_type(names::PIPELINE_TYPE)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    pub async fn get_pipeline_id(&mut self, pipeline_name: &str) -> Result<Option<ContextId>> {
        Ok(self.pipeline(pipeline_name).await?.map(|p| p.id))
    }

    pub async fn get_pipeline_stages(&mut self, pipeline_name: &str) -> Result<Vec<String>> {
        Ok(self
            .stages(pipeline_name)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    /// Every execution of every stage of the pipeline, each exactly once.
    pub async fn get_all_executions_in_pipeline(
        &mut self,
        pipeline_name: &str,
    ) -> Result<Vec<ExecutionRow>> {
        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for stage in self.stages(pipeline_name).await? {
            for execution in self.store.get_executions_by_context(stage.id).await? {
                if seen.insert(execution.id) {
                    rows.push(ExecutionRow::from(&execution));
                }
            }
        }
        Ok(rows)
    }

    pub async fn get_all_executions_in_stage(
        &mut self,
        stage_name: &str,
    ) -> Result<Vec<ExecutionRow>> {
        let stage = match self
            .store
            .get_context_by_type_and_name(names::STAGE_TYPE, stage_name)
            .await?
        {
            Some(stage) => stage,
            None => return Ok(Vec::new()),
        };
        Ok(self
            .store
            .get_executions_by_context(stage.id)
            .await?
            .iter()
            .map(ExecutionRow::from)
            .collect())
    }

    pub async fn get_all_executions_by_ids_list(
        &mut self,
        ids: &[ExecutionId],
    ) -> Result<Vec<ExecutionRow>> {
        Ok(self
            .store
            .get_executions_by_id(ids)
            .await?
            .iter()
            .map(ExecutionRow::from)
            .collect())
    }

    /// Executions that consumed or produced the named artifact.
    pub async fn get_all_executions_for_artifact(
        &mut self,
        artifact_name: &str,
    ) -> Result<Vec<ExecutionLinkRow>> {
        match self.artifact_by_name(artifact_name).await? {
            Some(artifact) => self.get_all_executions_for_artifact_id(artifact.id).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn get_all_executions_for_artifact_id(
        &mut self,
        artifact_id: ArtifactId,
    ) -> Result<Vec<ExecutionLinkRow>> {
        let mut rows = Vec::new();
        for event in self.store.get_events_by_artifact_ids(&[artifact_id]).await? {
            let execution = match self
                .store
                .get_executions_by_id(&[event.execution_id])
                .await?
                .into_iter()
                .next()
            {
                Some(execution) => execution,
                None => continue,
            };
            let stage = self
                .store
                .get_contexts_by_execution(execution.id)
                .await?
                .into_iter()
                .next();
            let pipeline = match &stage {
                Some(stage) => self
                    .store
                    .get_parent_contexts_by_context(stage.id)
                    .await?
                    .into_iter()
                    .next(),
                None => None,
            };
            rows.push(ExecutionLinkRow {
                ty: event.ty.label(),
                execution_id: execution.id,
                execution_name: execution.name.clone().unwrap_or_default(),
                execution_type_name: ExecutionNode::from(&execution).type_name,
                stage: stage.map(|c| c.name).unwrap_or_default(),
                pipeline: pipeline.map(|c| c.name).unwrap_or_default(),
            });
        }
        Ok(rows)
    }

    /// Names of all artifacts.
    pub async fn get_all_artifacts(&mut self) -> Result<Vec<String>> {
        Ok(self
            .store
            .get_artifacts(GetArtifactsOptions::default())
            .await?
            .into_iter()
            .map(|a| a.name.unwrap_or_default())
            .collect())
    }

    pub async fn get_all_artifact_types(&mut self) -> Result<Vec<String>> {
        Ok(self
            .store
            .get_artifact_types()
            .await?
            .into_iter()
            .map(|t| t.name)
            .collect())
    }

    /// Artifacts attributed to any stage of the pipeline.
    pub async fn get_all_artifacts_by_context(
        &mut self,
        pipeline_name: &str,
    ) -> Result<Vec<ArtifactRow>> {
        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for stage in self.stages(pipeline_name).await? {
            for artifact in self.store.get_artifacts_by_context(stage.id).await? {
                if seen.insert(artifact.id) {
                    rows.push(ArtifactRow::from(&artifact));
                }
            }
        }
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    pub async fn get_all_artifacts_by_ids_list(
        &mut self,
        ids: &[ArtifactId],
    ) -> Result<Vec<ArtifactRow>> {
        Ok(self
            .store
            .get_artifacts_by_id(ids)
            .await?
            .iter()
            .map(ArtifactRow::from)
            .collect())
    }

    pub async fn get_all_artifacts_by_type(&mut self, type_name: &str) -> Result<Vec<ArtifactRow>> {
        Ok(self
            .store
            .get_artifacts_by_type(type_name)
            .await?
            .iter()
            .map(ArtifactRow::from)
            .collect())
    }

    pub async fn get_artifact(&mut self, name: &str) -> Result<Option<ArtifactRow>> {
        Ok(self
            .artifact_by_name(name)
            .await?
            .as_ref()
            .map(ArtifactRow::from))
    }

    pub async fn get_artifact_by_id(&mut self, id: ArtifactId) -> Result<Option<ArtifactRow>> {
        Ok(self
            .store
            .get_artifacts_by_id(&[id])
            .await?
            .first()
            .map(ArtifactRow::from))
    }

    /// Input and output artifacts of an execution, one row per event.
    pub async fn get_all_artifacts_for_execution(
        &mut self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ArtifactRow>> {
        self.get_all_artifacts_for_executions(&[execution_id]).await
    }

    pub async fn get_all_artifacts_for_executions(
        &mut self,
        execution_ids: &[ExecutionId],
    ) -> Result<Vec<ArtifactRow>> {
        let events = self.store.get_events_by_execution_ids(execution_ids).await?;
        let mut keys = Vec::new();
        let mut seen = HashSet::new();
        for event in &events {
            if seen.insert((event.artifact_id, event.ty.label())) {
                keys.push((event.artifact_id, event.ty));
            }
        }
        let ids = keys.iter().map(|(id, _)| *id).collect::<Vec<_>>();
        let artifacts = self.store.get_artifacts_by_id(&ids).await?;
        Ok(keys
            .into_iter()
            .filter_map(|(id, ty)| {
                artifacts
                    .iter()
                    .find(|a| a.id == id)
                    .map(|a| ArtifactRow::with_event(a, ty))
            })
            .collect())
    }

    /// Outputs of the executions that consumed the named artifact.
    ///
    /// When `pipeline_id` is given only executions of that pipeline are followed.
    pub async fn get_one_hop_child_artifacts(
        &mut self,
        artifact_name: &str,
        pipeline_id: Option<ContextId>,
    ) -> Result<Vec<ArtifactRow>> {
        let artifact = match self.artifact_by_name(artifact_name).await? {
            Some(artifact) => artifact,
            None => return Ok(Vec::new()),
        };
        let ids = self.child_artifact_ids(artifact.id, pipeline_id).await?;
        self.get_all_artifacts_by_ids_list(&ids).await
    }

    /// Inputs of the executions that produced the named artifact.
    pub async fn get_one_hop_parent_artifacts(
        &mut self,
        artifact_name: &str,
    ) -> Result<Vec<ArtifactRow>> {
        match self.artifact_by_name(artifact_name).await? {
            Some(artifact) => self.get_one_hop_parent_artifacts_with_id(artifact.id).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn get_one_hop_parent_artifacts_with_id(
        &mut self,
        artifact_id: ArtifactId,
    ) -> Result<Vec<ArtifactRow>> {
        let ids = self.parent_artifact_ids(artifact_id).await?;
        self.get_all_artifacts_by_ids_list(&ids).await
    }

    /// Every artifact downstream of the named artifact, in breadth-first order.
    pub async fn get_all_child_artifacts(&mut self, artifact_name: &str) -> Result<Vec<ArtifactRow>> {
        let artifact = match self.artifact_by_name(artifact_name).await? {
            Some(artifact) => artifact,
            None => return Ok(Vec::new()),
        };
        let ids = self.closure(artifact.id, true).await?;
        self.rows_in_order(&ids).await
    }

    /// Every artifact upstream of the named artifact, in breadth-first order.
    pub async fn get_all_parent_artifacts(
        &mut self,
        artifact_name: &str,
    ) -> Result<Vec<ArtifactRow>> {
        let artifact = match self.artifact_by_name(artifact_name).await? {
            Some(artifact) => artifact,
            None => return Ok(Vec::new()),
        };
        let ids = self.closure(artifact.id, false).await?;
        self.rows_in_order(&ids).await
    }

    /// Executions that produced any upstream artifact of the named artifact.
    pub async fn get_all_parent_executions(
        &mut self,
        artifact_name: &str,
    ) -> Result<Vec<ExecutionRow>> {
        let artifact = match self.artifact_by_name(artifact_name).await? {
            Some(artifact) => artifact,
            None => return Ok(Vec::new()),
        };
        let parents = self.closure(artifact.id, false).await?;
        let producers = self
            .store
            .get_events_by_artifact_ids(&parents)
            .await?
            .into_iter()
            .filter(|e| e.ty.is_output())
            .map(|e| e.execution_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        self.get_all_executions_by_ids_list(&producers).await
    }

    /// Executions that produced the inputs of `execution_ids`.
    pub async fn get_one_hop_parent_executions(
        &mut self,
        execution_ids: &[ExecutionId],
        pipeline_id: Option<ContextId>,
    ) -> Result<Vec<Execution>> {
        let ids = self
            .get_one_hop_parent_executions_ids(execution_ids, pipeline_id)
            .await?;
        Ok(self.store.get_executions_by_id(&ids).await?)
    }

    pub async fn get_one_hop_parent_executions_ids(
        &mut self,
        execution_ids: &[ExecutionId],
        pipeline_id: Option<ContextId>,
    ) -> Result<Vec<ExecutionId>> {
        let inputs = self.artifacts_of(execution_ids, EventType::is_input).await?;
        let producers = self.executions_of(&inputs, EventType::is_output).await?;
        self.filter_by_pipeline(producers, pipeline_id).await
    }

    /// The upstream execution graph of `execution_ids`.
    ///
    /// Nodes (the given executions included) are listed by ascending id and
    /// every discovered parent-to-child edge is listed once.
    pub async fn get_all_parent_executions_by_id(
        &mut self,
        execution_ids: &[ExecutionId],
        pipeline_id: Option<ContextId>,
    ) -> Result<ExecutionTree> {
        let mut visited = execution_ids.iter().copied().collect::<BTreeSet<_>>();
        let mut queue = execution_ids.iter().copied().collect::<VecDeque<_>>();
        let mut links = Vec::new();
        let mut seen_links = HashSet::new();
        while let Some(child) = queue.pop_front() {
            for parent in self
                .get_one_hop_parent_executions_ids(&[child], pipeline_id)
                .await?
            {
                if seen_links.insert((parent, child)) {
                    links.push(LineageLink {
                        source: parent,
                        target: child,
                    });
                }
                if visited.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
        let ids = visited.into_iter().collect::<Vec<_>>();
        let nodes = self
            .store
            .get_executions_by_id(&ids)
            .await?
            .iter()
            .map(ExecutionNode::from)
            .collect();
        Ok(ExecutionTree { nodes, links })
    }

    /// The producer of the named artifact with the lowest id.
    pub async fn find_producer_execution(&mut self, artifact_name: &str) -> Result<Option<Execution>> {
        let producers = self.find_producer_executions(artifact_name).await?;
        if producers.len() > 1 {
            tracing::debug!(
                artifact = artifact_name,
                ids = ?producers.iter().map(|e| e.id).collect::<Vec<_>>(),
                "multiple executions claim the artifact as output"
            );
        }
        Ok(producers.into_iter().next())
    }

    /// All producers of the named artifact, by ascending id.
    pub async fn find_producer_executions(&mut self, artifact_name: &str) -> Result<Vec<Execution>> {
        let artifact = match self.artifact_by_name(artifact_name).await? {
            Some(artifact) => artifact,
            None => return Ok(Vec::new()),
        };
        let ids = self
            .executions_of(&[artifact.id], EventType::is_output)
            .await?;
        Ok(self.store.get_executions_by_id(&ids).await?)
    }

    /// Collects the model, the executions touching it and their other inputs and outputs.
    pub async fn get_model_data(&mut self, model_id: ArtifactId) -> Result<ModelCard> {
        let model = self.get_all_artifacts_by_ids_list(&[model_id]).await?;
        if model.first().map_or(true, |m| m.type_name != names::MODEL) {
            return Ok(ModelCard::default());
        }
        let execution_ids = self
            .executions_of(&[model_id], |_| true)
            .await?;
        let executions = self.get_all_executions_by_ids_list(&execution_ids).await?;

        let mut inputs = self.artifacts_of(&execution_ids, EventType::is_input).await?;
        inputs.retain(|id| *id != model_id);
        let mut outputs = self
            .artifacts_of(&execution_ids, EventType::is_output)
            .await?;
        outputs.retain(|id| *id != model_id);
        Ok(ModelCard {
            model,
            executions,
            inputs: self.get_all_artifacts_by_ids_list(&inputs).await?,
            outputs: self.get_all_artifacts_by_ids_list(&outputs).await?,
        })
    }

    /// Serializes the pipeline subgraph, see [`crate::sync::dumptojson`].
    pub async fn dumptojson(
        &mut self,
        pipeline_name: &str,
        execution_uuid: Option<&str>,
    ) -> Result<Option<String>> {
        crate::sync::dumptojson(self.store, pipeline_name, execution_uuid).await
    }

    /// Serializes nodes updated after `last_sync_time`, see [`crate::sync::extract_to_json`].
    pub async fn extract_to_json(&mut self, last_sync_time: u64) -> Result<String> {
        crate::sync::extract_to_json(self.store, last_sync_time).await
    }

    async fn pipeline(&mut self, name: &str) -> Result<Option<Context>> {
        Ok(self
            .store
            .get_context_by_type_and_name(names::PIPELINE_TYPE, name)
            .await?)
    }

    async fn stages(&mut self, pipeline_name: &str) -> Result<Vec<Context>> {
        match self.pipeline(pipeline_name).await? {
            Some(pipeline) => Ok(self
                .store
                .get_children_contexts_by_context(pipeline.id)
                .await?),
            None => Ok(Vec::new()),
        }
    }

    /// Artifact names are unique per type; across types the lowest id wins.
    async fn artifact_by_name(&mut self, name: &str) -> Result<Option<Artifact>> {
        Ok(self
            .store
            .get_artifacts(GetArtifactsOptions::default().name(name))
            .await?
            .into_iter()
            .next())
    }

    /// Distinct executions with an event of the selected kind on any of `artifact_ids`.
    async fn executions_of(
        &mut self,
        artifact_ids: &[ArtifactId],
        kind: impl Fn(EventType) -> bool,
    ) -> Result<Vec<ExecutionId>> {
        Ok(self
            .store
            .get_events_by_artifact_ids(artifact_ids)
            .await?
            .into_iter()
            .filter(|e| kind(e.ty))
            .map(|e| e.execution_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    /// Distinct artifacts with an event of the selected kind on any of `execution_ids`.
    async fn artifacts_of(
        &mut self,
        execution_ids: &[ExecutionId],
        kind: impl Fn(EventType) -> bool,
    ) -> Result<Vec<ArtifactId>> {
        Ok(self
            .store
            .get_events_by_execution_ids(execution_ids)
            .await?
            .into_iter()
            .filter(|e| kind(e.ty))
            .map(|e| e.artifact_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    async fn filter_by_pipeline(
        &mut self,
        execution_ids: Vec<ExecutionId>,
        pipeline_id: Option<ContextId>,
    ) -> Result<Vec<ExecutionId>> {
        let pipeline_id = match pipeline_id {
            Some(id) => id,
            None => return Ok(execution_ids),
        };
        Ok(self
            .store
            .get_executions_by_id(&execution_ids)
            .await?
            .into_iter()
            .filter(|e| e.int_property(names::PIPELINE_ID) == Some(i64::from(pipeline_id.get())))
            .map(|e| e.id)
            .collect())
    }

    async fn child_artifact_ids(
        &mut self,
        artifact_id: ArtifactId,
        pipeline_id: Option<ContextId>,
    ) -> Result<Vec<ArtifactId>> {
        let consumers = self
            .executions_of(&[artifact_id], EventType::is_input)
            .await?;
        let consumers = self.filter_by_pipeline(consumers, pipeline_id).await?;
        self.artifacts_of(&consumers, EventType::is_output).await
    }

    async fn parent_artifact_ids(&mut self, artifact_id: ArtifactId) -> Result<Vec<ArtifactId>> {
        let producers = self
            .executions_of(&[artifact_id], EventType::is_output)
            .await?;
        self.artifacts_of(&producers, EventType::is_input).await
    }

    /// Breadth-first closure over one-hop children (or parents).
    ///
    /// Each artifact is expanded at most once, so cyclic graphs terminate.
    /// The anchor is only listed if it is reachable from itself.
    async fn closure(&mut self, anchor: ArtifactId, downstream: bool) -> Result<Vec<ArtifactId>> {
        let mut expanded = HashSet::new();
        expanded.insert(anchor);
        let mut listed = HashSet::new();
        let mut result = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(anchor);
        while let Some(id) = queue.pop_front() {
            let next = if downstream {
                self.child_artifact_ids(id, None).await?
            } else {
                self.parent_artifact_ids(id).await?
            };
            for n in next {
                if listed.insert(n) {
                    result.push(n);
                }
                if expanded.insert(n) {
                    queue.push_back(n);
                }
            }
        }
        if listed.contains(&anchor) {
            tracing::warn!(artifact = %anchor, "artifact lineage contains a cycle");
        }
        Ok(result)
    }

    async fn rows_in_order(&mut self, ids: &[ArtifactId]) -> Result<Vec<ArtifactRow>> {
        let artifacts = self.store.get_artifacts_by_id(ids).await?;
        Ok(ids
            .iter()
            .filter_map(|id| artifacts.iter().find(|a| a.id == *id))
            .map(ArtifactRow::from)
            .collect())
    }
}
