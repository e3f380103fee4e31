use super::error::{ApiError, ApiResult};
use super::stream::{json_response, raw_json_response};
use super::AppState;
use crate::cmfquery::CmfQuery;
use crate::lineage;
use crate::metadata::ArtifactId;
use crate::sync::{self, SyncDirection, SyncStatus};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    #[serde(default)]
    pub id: Option<i32>,
    #[serde(default)]
    pub pipeline_name: String,

    /// The payload, either as a JSON document or as its serialized text.
    pub json_payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct PullParams {
    pub exec_uuid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeltaParams {
    #[serde(default)]
    pub last_sync_time: u64,
}

#[derive(Debug, Deserialize)]
pub struct ModelCardParams {
    #[serde(rename = "modelId")]
    pub model_id: i32,
}

fn push_status_code(status: SyncStatus) -> StatusCode {
    match status {
        SyncStatus::Success | SyncStatus::Exists => StatusCode::OK,
        SyncStatus::VersionUpdate => StatusCode::CONFLICT,
        SyncStatus::InvalidJsonPayload
        | SyncStatus::PipelineNotExist
        | SyncStatus::NoExecUuid => StatusCode::BAD_REQUEST,
    }
}

pub async fn push(
    State(state): State<AppState>,
    request: Result<Json<PushRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "rejected a malformed push request");
            let status = SyncStatus::InvalidJsonPayload;
            return Ok((push_status_code(status), Json(status)).into_response());
        }
    };
    let payload = match request.json_payload {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    };
    let pipeline_name = Some(request.pipeline_name.as_str()).filter(|name| !name.is_empty());

    let mut store = state.store().await?;
    let status = sync::update_mlmd(&mut store, &payload, pipeline_name, SyncDirection::Push).await?;
    tracing::info!(client_id = ?request.id, pipeline = ?pipeline_name, %status, "push");
    Ok((push_status_code(status), Json(status)).into_response())
}

pub async fn pull(
    State(state): State<AppState>,
    Path(pipeline): Path<String>,
    Query(params): Query<PullParams>,
) -> ApiResult<Response> {
    let mut store = state.store().await?;
    match sync::dumptojson(&mut store, &pipeline, params.exec_uuid.as_deref()).await {
        Ok(Some(payload)) => Ok(raw_json_response(payload.into_bytes(), state.stream_threshold)),
        Ok(None) => Ok(Json("NULL").into_response()),
        Err(e) if e.is_not_found() => Ok(Json(SyncStatus::NoExecUuid).into_response()),
        Err(e) => Err(e.into()),
    }
}

pub async fn delta(
    State(state): State<AppState>,
    Query(params): Query<DeltaParams>,
) -> ApiResult<Response> {
    let mut store = state.store().await?;
    let payload = sync::extract_to_json(&mut store, params.last_sync_time).await?;
    Ok(raw_json_response(payload.into_bytes(), state.stream_threshold))
}

pub async fn pipelines(State(state): State<AppState>) -> ApiResult<Response> {
    let mut store = state.store().await?;
    let names = CmfQuery::new(&mut store).get_pipeline_names().await?;
    Ok(Json(names).into_response())
}

pub async fn executions(
    State(state): State<AppState>,
    Path(pipeline): Path<String>,
) -> ApiResult<Response> {
    let mut store = state.store().await?;
    let rows = CmfQuery::new(&mut store)
        .get_all_executions_in_pipeline(&pipeline)
        .await?;
    Ok(json_response(&rows, state.stream_threshold))
}

pub async fn artifacts(
    State(state): State<AppState>,
    Path((pipeline, type_name)): Path<(String, String)>,
) -> ApiResult<Response> {
    let mut store = state.store().await?;
    let mut rows = CmfQuery::new(&mut store)
        .get_all_artifacts_by_context(&pipeline)
        .await?;
    rows.retain(|row| row.type_name == type_name);
    Ok(json_response(&rows, state.stream_threshold))
}

pub async fn artifact_force_graph(
    State(state): State<AppState>,
    Path(pipeline): Path<String>,
) -> ApiResult<Response> {
    let mut store = state.store().await?;
    let graph = lineage::force_graph(&mut CmfQuery::new(&mut store), &pipeline).await?;
    Ok(json_response(&graph, state.stream_threshold))
}

pub async fn artifact_tangled_tree(
    State(state): State<AppState>,
    Path(pipeline): Path<String>,
) -> ApiResult<Response> {
    let mut store = state.store().await?;
    let layers = lineage::artifact_tree(&mut CmfQuery::new(&mut store), &pipeline).await?;
    Ok(json_response(&layers, state.stream_threshold))
}

pub async fn execution_tangled_tree(
    State(state): State<AppState>,
    Path((uuid, pipeline)): Path<(String, String)>,
) -> ApiResult<Response> {
    let mut store = state.store().await?;
    let layers = lineage::execution_tree(&mut CmfQuery::new(&mut store), &pipeline, &uuid).await?;
    Ok(json_response(&layers, state.stream_threshold))
}

pub async fn artifact_execution_tangled_tree(
    State(state): State<AppState>,
    Path(pipeline): Path<String>,
) -> ApiResult<Response> {
    let mut store = state.store().await?;
    let layers = lineage::tangled_tree(&mut CmfQuery::new(&mut store), &pipeline).await?;
    Ok(json_response(&layers, state.stream_threshold))
}

/// The model card as an array of four row lists.
pub async fn model_card(
    State(state): State<AppState>,
    Query(params): Query<ModelCardParams>,
) -> ApiResult<Response> {
    let mut store = state.store().await?;
    let card = CmfQuery::new(&mut store)
        .get_model_data(ArtifactId::new(params.model_id))
        .await?;
    if card.is_empty() {
        return Err(ApiError::NotFound(format!(
            "artifact {} is not a model",
            params.model_id
        )));
    }
    Ok(json_response(
        &(card.model, card.executions, card.inputs, card.outputs),
        state.stream_threshold,
    ))
}
