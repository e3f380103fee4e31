use super::*;
use crate::metadata::{names, Direction, PropertyValues};
use crate::recorder::{Recorder, RecorderOptions};
use crate::testing::temp_store;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tower::ServiceExt;

const PIPELINE: &str = "Test-env";

fn uuid_properties(uuid: &str) -> PropertyValues {
    let mut properties = PropertyValues::new();
    properties.insert(names::EXECUTION_UUID.to_owned(), uuid.into());
    properties
}

/// `Prepare` writes `data.xml.gz`, `Train` reads it and writes a model.
async fn record(store: &mut MetadataStore) -> i32 {
    let mut recorder = Recorder::new(store, RecorderOptions::default());
    let pipeline = recorder
        .create_pipeline(PIPELINE, PropertyValues::new())
        .await
        .unwrap();

    let prepare = recorder
        .create_stage(&pipeline, "Prepare", PropertyValues::new())
        .await
        .unwrap();
    let prepare = recorder
        .create_execution(&prepare, "Prepare", uuid_properties("a1b2c3d4-0001"), PropertyValues::new())
        .await
        .unwrap();
    recorder
        .log_dataset_with_version(
            &prepare,
            "artifacts/data.xml.gz",
            "236d",
            Direction::Output,
            PropertyValues::new(),
            PropertyValues::new(),
        )
        .await
        .unwrap();

    let train = recorder
        .create_stage(&pipeline, "Train", PropertyValues::new())
        .await
        .unwrap();
    let train = recorder
        .create_execution(&train, "Train", uuid_properties("e5f6a7b8-0002"), PropertyValues::new())
        .await
        .unwrap();
    recorder
        .log_dataset_with_version(
            &train,
            "artifacts/data.xml.gz",
            "236d",
            Direction::Input,
            PropertyValues::new(),
            PropertyValues::new(),
        )
        .await
        .unwrap();
    let model = recorder
        .log_model_with_version(
            &train,
            "artifacts/model.pkl",
            "5f1e",
            Direction::Output,
            PropertyValues::new(),
            PropertyValues::new(),
        )
        .await
        .unwrap();
    model.id.get()
}

async fn router_with(store: MetadataStore, stream_threshold: usize) -> Router {
    create_router(AppState::new(store, stream_threshold))
}

async fn recorded_router(stream_threshold: usize) -> (NamedTempFile, Router, i32) {
    let (file, mut store) = temp_store().await;
    let model_id = record(&mut store).await;
    (file, router_with(store, stream_threshold).await, model_id)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(router, request).await
}

async fn push(router: &Router, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/mlmd_push")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn pipelines_and_executions_are_listed() {
    let (_file, router, _) = recorded_router(usize::MAX).await;

    let (status, body) = get(&router, "/pipelines").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([PIPELINE]));

    let (status, body) = get(&router, "/executions/Test-env").await;
    assert_eq!(status, StatusCode::OK);
    let uuids = body
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row[names::EXECUTION_UUID].clone())
        .collect::<Vec<_>>();
    assert_eq!(uuids, vec![json!("a1b2c3d4-0001"), json!("e5f6a7b8-0002")]);

    let (_, body) = get(&router, "/executions/missing").await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn artifacts_are_filtered_by_type() {
    let (_file, router, _) = recorded_router(usize::MAX).await;

    let (status, body) = get(&router, "/artifacts/Test-env/Dataset").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("artifacts/data.xml.gz:236d"));

    let (_, body) = get(&router, "/artifacts/Test-env/Model").await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn push_reports_sync_status() {
    let (_source_file, mut source) = temp_store().await;
    record(&mut source).await;
    let payload = crate::sync::dumptojson(&mut source, PIPELINE, None)
        .await
        .unwrap()
        .unwrap();

    let (_file, store) = temp_store().await;
    let router = router_with(store, usize::MAX).await;
    let request = json!({"id": 1, "pipeline_name": PIPELINE, "json_payload": payload});

    let (status, body) = push(&router, request.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("success"));

    let (status, body) = push(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("exists"));

    let (status, body) = push(
        &router,
        json!({"pipeline_name": "other", "json_payload": payload}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!("pipeline_not_exist"));

    let (status, body) = push(
        &router,
        json!({"pipeline_name": PIPELINE, "json_payload": "{not json"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!("invalid_json_payload"));

    let (_, body) = get(&router, "/pipelines").await;
    assert_eq!(body, json!([PIPELINE]));
}

#[tokio::test]
async fn payload_without_uuid_is_a_conflict() {
    let (_file, store) = temp_store().await;
    let router = router_with(store, usize::MAX).await;
    let payload = json!({"Pipeline": [{"name": PIPELINE, "stages": [{"name": "Test-env/Prepare",
        "executions": [{"type": "Test-env/Prepare", "properties": {}, "events": []}]}]}]});

    let (status, body) = push(
        &router,
        json!({"pipeline_name": PIPELINE, "json_payload": payload}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body, json!("version_update"));
}

#[tokio::test]
async fn pull_exports_pipelines() {
    let (_file, router, _) = recorded_router(usize::MAX).await;

    let (status, body) = get(&router, "/mlmd_pull/Test-env").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Pipeline"][0]["name"], json!(PIPELINE));
    assert_eq!(body["Pipeline"][0]["stages"].as_array().unwrap().len(), 2);

    let (_, body) = get(&router, "/mlmd_pull/Test-env?exec_uuid=e5f6a7b8-0002").await;
    let stages = body["Pipeline"][0]["stages"].as_array().unwrap();
    assert_eq!(stages.len(), 1);
    assert_eq!(stages[0]["executions"].as_array().unwrap().len(), 1);

    let (status, body) = get(&router, "/mlmd_pull/missing").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("NULL"));

    let (status, body) = get(&router, "/mlmd_pull/Test-env?exec_uuid=ffff").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("no_exec_uuid"));
}

#[tokio::test]
async fn delta_is_empty_in_the_future() {
    let (_file, router, _) = recorded_router(usize::MAX).await;

    let (status, body) = get(&router, "/mlmd_delta?last_sync_time=0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Pipeline"].as_array().unwrap().len(), 1);

    let (_, body) = get(&router, "/mlmd_delta?last_sync_time=99999999999999").await;
    assert_eq!(body, json!({"Pipeline": []}));
}

#[tokio::test]
async fn lineage_views_are_served() {
    let (_file, router, _) = recorded_router(usize::MAX).await;

    let (status, body) = get(&router, "/artifact-lineage/force-directed-graph/Test-env").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(body["links"].as_array().unwrap().len(), 1);

    let (status, body) = get(&router, "/artifact-lineage/tangled-tree/Test-env").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = get(&router, "/execution-lineage/tangled-tree/e5f6/Test-env").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = get(&router, "/execution-lineage/tangled-tree/ffff/Test-env").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, body) = get(&router, "/artifact-execution-lineage/tangled-tree/Test-env").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn model_card_needs_a_model() {
    let (_file, router, model_id) = recorded_router(usize::MAX).await;

    let (status, body) = get(&router, &format!("/model-card?modelId={}", model_id)).await;
    assert_eq!(status, StatusCode::OK);
    let frames = body.as_array().unwrap();
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[0][0]["id"], json!(model_id));
    assert_eq!(frames[1].as_array().unwrap().len(), 1);
    assert_eq!(frames[2][0]["name"], json!("artifacts/data.xml.gz:236d"));
    assert_eq!(frames[3], json!([]));

    let (status, body) = get(&router, "/model-card?modelId=1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn large_responses_are_streamed() {
    let (_file, router, _) = recorded_router(8).await;

    let (status, body) = get(&router, "/mlmd_pull/Test-env").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Pipeline"][0]["name"], json!(PIPELINE));

    let (_, body) = get(&router, "/executions/Test-env").await;
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn reads_skip_uncommitted_writes() {
    let (_file, store) = temp_store().await;
    let state = AppState::new(store, usize::MAX);
    {
        let mut store = state.store.lock().await;
        record(&mut store).await;
        store.begin_transaction().await.unwrap();
        Recorder::new(&mut store, RecorderOptions::default())
            .create_pipeline("left-open", PropertyValues::new())
            .await
            .unwrap();
    }
    let router = create_router(state.clone());

    let (status, body) = get(&router, "/pipelines").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([PIPELINE]));
    assert!(!state.store.lock().await.in_transaction());
}

#[tokio::test]
async fn malformed_push_request_is_an_invalid_payload() {
    let (_file, store) = temp_store().await;
    let router = router_with(store, usize::MAX).await;

    for body in ["{not json", r#"{"pipeline_name": "Test-env"}"#] {
        let request = Request::builder()
            .method("POST")
            .uri("/mlmd_push")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!("invalid_json_payload"));
    }
}
