//! Lineage views built on top of [`CmfQuery`].
use self::names::{artifact_display_name, execution_display_name, truncate_artifact_name};
use crate::cmfquery::rows::LineageLink;
use crate::cmfquery::CmfQuery;
use crate::errors::{Error, Result};
use crate::metadata::{names as cmf_names, split_uuids, ArtifactId, ExecutionId};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;

pub mod names;

const DATASET_COLOR: &str = "#48D1CC";
const MODEL_COLOR: &str = "#2E8B57";
const METRICS_COLOR: &str = "#FF8C00";
const OTHER_COLOR: &str = "#D3D3D3";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForceNode {
    pub id: ArtifactId,
    pub name: String,
    pub color: &'static str,
}

/// Artifacts of a pipeline and the one-hop links between them.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ForceGraph {
    pub nodes: Vec<ForceNode>,
    pub links: Vec<LineageLink<ArtifactId>>,
}

/// A node of a layered tree, referring to its parents by label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub id: String,
    pub parents: Vec<String>,
}

/// Nodes grouped into layers; every node of a layer shares the same parent set.
pub type Layers = Vec<Vec<TreeNode>>;

fn color_of(type_name: &str) -> &'static str {
    match type_name {
        cmf_names::DATASET => DATASET_COLOR,
        cmf_names::MODEL => MODEL_COLOR,
        cmf_names::METRICS | cmf_names::STEP_METRICS => METRICS_COLOR,
        _ => OTHER_COLOR,
    }
}

pub async fn force_graph(query: &mut CmfQuery<'_>, pipeline_name: &str) -> Result<ForceGraph> {
    let pipeline_id = match query.get_pipeline_id(pipeline_name).await? {
        Some(id) => id,
        None => return Ok(ForceGraph::default()),
    };
    let artifacts = query.get_all_artifacts_by_context(pipeline_name).await?;
    let members = artifacts.iter().map(|a| a.id).collect::<HashSet<_>>();

    let mut links = IndexSet::new();
    for artifact in &artifacts {
        for child in query
            .get_one_hop_child_artifacts(&artifact.name, Some(pipeline_id))
            .await?
        {
            if members.contains(&child.id) {
                links.insert(LineageLink {
                    source: artifact.id,
                    target: child.id,
                });
            }
        }
    }
    Ok(ForceGraph {
        nodes: artifacts
            .iter()
            .map(|a| ForceNode {
                id: a.id,
                name: truncate_artifact_name(&a.name),
                color: color_of(&a.type_name),
            })
            .collect(),
        links: links.into_iter().collect(),
    })
}

/// Layered artifact tree of a pipeline. `Environment` artifacts are left out.
pub async fn artifact_tree(query: &mut CmfQuery<'_>, pipeline_name: &str) -> Result<Layers> {
    let artifacts = query
        .get_all_artifacts_by_context(pipeline_name)
        .await?
        .into_iter()
        .filter(|a| a.type_name != cmf_names::ENVIRONMENT)
        .collect::<Vec<_>>();
    let labels = artifacts
        .iter()
        .map(|a| (a.id, artifact_display_name(&a.name, &a.type_name)))
        .collect::<HashMap<_, _>>();

    let mut parents = IndexMap::new();
    for artifact in &artifacts {
        let ids = query
            .get_one_hop_parent_artifacts_with_id(artifact.id)
            .await?
            .into_iter()
            .filter(|p| p.type_name != cmf_names::ENVIRONMENT)
            .map(|p| p.id)
            .collect();
        parents.insert(artifact.id, ids);
    }
    Ok(topological_layers(&parents, |id| label_or_id(&labels, id)))
}

/// Layered upstream tree of the execution of `pipeline_name` whose uuid starts with `uuid4`.
pub async fn execution_tree(
    query: &mut CmfQuery<'_>,
    pipeline_name: &str,
    uuid4: &str,
) -> Result<Layers> {
    let pipeline_id = query.get_pipeline_id(pipeline_name).await?;
    let start = query
        .get_all_executions_in_pipeline(pipeline_name)
        .await?
        .into_iter()
        .find(|e| {
            e.get(cmf_names::EXECUTION_UUID)
                .map(|v| split_uuids(&v.to_text()))
                .unwrap_or_default()
                .iter()
                .any(|u| u.starts_with(uuid4))
        })
        .ok_or_else(|| {
            Error::NotFound(format!(
                "execution with uuid {:?} in pipeline {:?}",
                uuid4, pipeline_name
            ))
        })?;

    let tree = query
        .get_all_parent_executions_by_id(&[start.id], pipeline_id)
        .await?;
    let labels = tree
        .nodes
        .iter()
        .map(|n| (n.id, execution_display_name(&n.type_name, &n.uuid)))
        .collect::<HashMap<_, _>>();
    let mut parents = tree
        .nodes
        .iter()
        .map(|n| (n.id, Vec::new()))
        .collect::<IndexMap<ExecutionId, Vec<ExecutionId>>>();
    for link in &tree.links {
        if let Some(p) = parents.get_mut(&link.target) {
            p.push(link.source);
        }
    }
    Ok(topological_layers(&parents, |id| label_or_id(&labels, id)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum TangledKey {
    Artifact(ArtifactId),
    Execution(ExecutionId),
}

/// Layered tree mixing the artifacts and the executions of a pipeline.
///
/// An input event makes the artifact a parent of the execution, an output
/// event makes the execution a parent of the artifact.
pub async fn tangled_tree(query: &mut CmfQuery<'_>, pipeline_name: &str) -> Result<Layers> {
    let executions = query.get_all_executions_in_pipeline(pipeline_name).await?;
    let mut labels = HashMap::new();
    let mut parents: IndexMap<TangledKey, Vec<TangledKey>> = IndexMap::new();
    for execution in &executions {
        let key = TangledKey::Execution(execution.id);
        let type_name = execution
            .get(cmf_names::EXECUTION_TYPE_NAME)
            .map(|v| v.to_text())
            .unwrap_or_else(|| execution.type_name.clone());
        let uuid = execution
            .get(cmf_names::EXECUTION_UUID)
            .map(|v| v.to_text())
            .unwrap_or_default();
        labels.insert(key, execution_display_name(&type_name, &uuid));
        parents.entry(key).or_default();

        for artifact in query.get_all_artifacts_for_execution(execution.id).await? {
            let artifact_key = TangledKey::Artifact(artifact.id);
            labels
                .entry(artifact_key)
                .or_insert_with(|| artifact_display_name(&artifact.name, &artifact.type_name));
            parents.entry(artifact_key).or_default();
            match artifact.event {
                Some("INPUT") => parents[&key].push(artifact_key),
                Some("OUTPUT") => parents[&artifact_key].push(key),
                _ => {}
            }
        }
    }
    Ok(topological_layers(&parents, |k| {
        labels.get(k).cloned().unwrap_or_else(|| format!("{:?}", k))
    }))
}

fn label_or_id<K: Hash + Eq + std::fmt::Display>(labels: &HashMap<K, String>, id: &K) -> String {
    labels.get(id).cloned().unwrap_or_else(|| id.to_string())
}

/// Kahn's topological sort over `parents` (node to its parents), grouped into layers.
///
/// Layers follow the order in which their parent sets are first reached.
/// Parents that are not themselves keys are dropped. Nodes left unresolved by
/// a cycle are appended in key order so every node is emitted exactly once.
pub fn topological_layers<K, F>(parents: &IndexMap<K, Vec<K>>, label: F) -> Layers
where
    K: Copy + Eq + Hash + Ord + Debug,
    F: Fn(&K) -> String,
{
    let parents = parents
        .iter()
        .map(|(node, ps)| {
            let ps = ps
                .iter()
                .filter(|p| parents.contains_key(*p))
                .copied()
                .collect::<IndexSet<_>>();
            (*node, ps)
        })
        .collect::<IndexMap<_, _>>();

    let mut in_degree = parents
        .iter()
        .map(|(node, ps)| (*node, ps.len()))
        .collect::<HashMap<_, _>>();
    let mut children: HashMap<K, Vec<K>> = HashMap::new();
    for (node, ps) in &parents {
        for p in ps {
            children.entry(*p).or_default().push(*node);
        }
    }

    let mut queue = parents
        .keys()
        .filter(|n| in_degree[*n] == 0)
        .copied()
        .collect::<VecDeque<_>>();
    let mut order = Vec::with_capacity(parents.len());
    while let Some(node) = queue.pop_front() {
        order.push(node);
        for child in children.get(&node).into_iter().flatten() {
            if let Some(d) = in_degree.get_mut(child) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(*child);
                }
            }
        }
    }

    if order.len() < parents.len() {
        let mut unresolved = in_degree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(n, _)| *n)
            .collect::<Vec<_>>();
        unresolved.sort_unstable();
        tracing::warn!(nodes = ?unresolved, "lineage contains a cycle");
        order.extend(unresolved);
    }

    let mut layers: IndexMap<Vec<K>, Vec<TreeNode>> = IndexMap::new();
    for node in order {
        let ps = &parents[&node];
        let mut key = ps.iter().copied().collect::<Vec<_>>();
        key.sort_unstable();
        layers.entry(key).or_default().push(TreeNode {
            id: label(&node),
            parents: ps.iter().map(&label).collect(),
        });
    }
    layers.into_values().collect()
}
