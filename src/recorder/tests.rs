use super::*;
use crate::metadata::EventType;
use crate::testing::temp_store;

fn options(work_dir: &std::path::Path) -> RecorderOptions {
    RecorderOptions {
        git: GitInfo {
            repo: "https://example.com/repo.git".to_owned(),
            start_commit: "c0".to_owned(),
            end_commit: "c1".to_owned(),
        },
        work_dir: work_dir.to_path_buf(),
    }
}

#[tokio::test]
async fn pipeline_and_stage_are_get_or_create() {
    let (_file, mut store) = temp_store().await;
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new(&mut store, options(dir.path()));

    let mut custom = PropertyValues::new();
    custom.insert("owner".to_owned(), "alice".into());
    let p0 = recorder.create_pipeline("Test-env", custom).await.unwrap();
    let p1 = recorder
        .create_pipeline("Test-env", PropertyValues::new())
        .await
        .unwrap();
    assert_eq!(p0.id, p1.id);
    assert_eq!(
        p1.custom_properties.get("owner"),
        Some(&PropertyValue::from("alice"))
    );
    assert_eq!(
        p1.properties.get(names::PIPELINE),
        Some(&PropertyValue::from("Test-env"))
    );

    let s0 = recorder
        .create_stage(&p0, "Prepare", PropertyValues::new())
        .await
        .unwrap();
    let s1 = recorder
        .create_stage(&p0, "Test-env/Prepare", PropertyValues::new())
        .await
        .unwrap();
    assert_eq!(s0.id, s1.id);
    assert_eq!(s0.name, "Test-env/Prepare");

    let parent = recorder.pipeline_of(&s0).await.unwrap();
    assert_eq!(parent.id, p0.id);
}

#[tokio::test]
async fn execution_carries_standard_properties() {
    let (_file, mut store) = temp_store().await;
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new(&mut store, options(dir.path()));
    let pipeline = recorder
        .create_pipeline("p", PropertyValues::new())
        .await
        .unwrap();
    let stage = recorder
        .create_stage(&pipeline, "train", PropertyValues::new())
        .await
        .unwrap();

    let mut props = PropertyValues::new();
    props.insert(names::EXECUTION.to_owned(), "python train.py".into());
    props.insert(names::CONTEXT_ID.to_owned(), 999.into());
    let e1 = recorder
        .create_execution(&stage, "Train", props, PropertyValues::new())
        .await
        .unwrap();
    assert_eq!(e1.type_name, "Train");
    assert_eq!(e1.string_property(names::EXECUTION), Some("python train.py"));
    assert_eq!(e1.int_property(names::CONTEXT_ID), Some(stage.id.get() as i64));
    assert_eq!(e1.int_property(names::PIPELINE_ID), Some(pipeline.id.get() as i64));
    assert_eq!(e1.string_property(names::CONTEXT_TYPE), Some("p/train"));
    assert_eq!(
        e1.string_property(names::GIT_REPO),
        Some("https://example.com/repo.git")
    );
    assert_eq!(e1.uuids().len(), 1);
    assert!(!e1.is_reusable());

    let e2 = recorder
        .create_execution(&stage, "Train", PropertyValues::new(), PropertyValues::new())
        .await
        .unwrap();
    assert_ne!(e1.id, e2.id);
    assert_ne!(e1.uuids(), e2.uuids());

    let executions = recorder
        .store()
        .get_executions_by_context(stage.id)
        .await
        .unwrap();
    assert_eq!(executions.len(), 2);
}

#[tokio::test]
async fn reusable_execution_collects_uuids() {
    let (_file, mut store) = temp_store().await;
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new(&mut store, options(dir.path()));
    let pipeline = recorder
        .create_pipeline("p", PropertyValues::new())
        .await
        .unwrap();
    let stage = recorder
        .create_stage(&pipeline, "load", PropertyValues::new())
        .await
        .unwrap();

    let mut props = PropertyValues::new();
    props.insert(names::EXECUTION_UUID.to_owned(), "u1".into());
    let mut custom = PropertyValues::new();
    custom.insert("seed".to_owned(), 1.into());
    let first = recorder
        .create_reusable_execution(&stage, "Load", "load", props, custom)
        .await
        .unwrap();
    assert!(first.is_reusable());

    let mut props = PropertyValues::new();
    props.insert(names::EXECUTION_UUID.to_owned(), "u2".into());
    let mut custom = PropertyValues::new();
    custom.insert("seed".to_owned(), 2.into());
    let second = recorder
        .create_reusable_execution(&stage, "Load", "load", props, custom)
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.uuids(), vec!["u1", "u2"]);
    assert_eq!(second.custom_properties.get("seed"), Some(&PropertyValue::Int(2)));
}

#[tokio::test]
async fn log_dataset_links_existing_content() {
    let (_file, mut store) = temp_store().await;
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data.xml.gz");
    std::fs::write(&data, b"<xml/>").unwrap();
    let data = data.to_str().unwrap().to_owned();

    let mut recorder = Recorder::new(&mut store, options(dir.path()));
    let pipeline = recorder
        .create_pipeline("Test-env", PropertyValues::new())
        .await
        .unwrap();
    let stage = recorder
        .create_stage(&pipeline, "Prepare", PropertyValues::new())
        .await
        .unwrap();
    let e1 = recorder
        .create_execution(&stage, "Prepare", PropertyValues::new(), PropertyValues::new())
        .await
        .unwrap();

    let artifact = recorder
        .log_dataset(&e1, &data, Direction::Output, PropertyValues::new())
        .await
        .unwrap();
    let hash = sha256_hex(b"<xml/>");
    assert_eq!(artifact.type_name, names::DATASET);
    assert_eq!(artifact.uri(), hash);
    assert_eq!(artifact.name(), format!("{}:{}", data, hash));
    assert_eq!(
        artifact.properties.get(names::URL),
        Some(&PropertyValue::from(format!("Test-env:{}", data)))
    );

    // Logging the same content again reuses the artifact.
    let e2 = recorder
        .create_execution(&stage, "Prepare", PropertyValues::new(), PropertyValues::new())
        .await
        .unwrap();
    let mut props = PropertyValues::new();
    props.insert(names::URL.to_owned(), "s3://bucket/data.xml.gz".into());
    let mut custom = PropertyValues::new();
    custom.insert("rows".to_owned(), 3.into());
    custom.insert("ratio".to_owned(), 0.5.into());
    let again = recorder
        .log_dataset_with_version(&e2, &data, &hash, Direction::Input, props, custom)
        .await
        .unwrap();
    assert_eq!(again.id, artifact.id);
    assert_eq!(
        again.properties.get(names::URL),
        Some(&PropertyValue::from(format!(
            "Test-env:{},s3://bucket/data.xml.gz",
            data
        )))
    );
    assert_eq!(again.custom_properties.get("rows"), Some(&PropertyValue::Int(3)));
    assert_eq!(
        again.custom_properties.get("ratio"),
        Some(&PropertyValue::from("0.5"))
    );

    let store = recorder.store();
    assert_eq!(store.get_artifacts_by_type(names::DATASET).await.unwrap().len(), 1);
    let events = store.get_events_by_artifact_ids(&[artifact.id]).await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .any(|e| e.execution_id == e1.id && e.ty == EventType::Output));
    assert!(events
        .iter()
        .any(|e| e.execution_id == e2.id && e.ty == EventType::Input));
    assert_eq!(
        store.get_contexts_by_artifact(artifact.id).await.unwrap()[0].id,
        stage.id
    );
}

#[tokio::test]
async fn models_and_metrics_are_logged() {
    let (_file, mut store) = temp_store().await;
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new(&mut store, options(dir.path()));
    let pipeline = recorder
        .create_pipeline("p", PropertyValues::new())
        .await
        .unwrap();
    let stage = recorder
        .create_stage(&pipeline, "train", PropertyValues::new())
        .await
        .unwrap();
    let execution = recorder
        .create_execution(&stage, "Train", PropertyValues::new(), PropertyValues::new())
        .await
        .unwrap();

    let mut props = PropertyValues::new();
    props.insert(names::MODEL_FRAMEWORK.to_owned(), "sklearn".into());
    let model = recorder
        .log_model_with_version(
            &execution,
            "model.pkl",
            "abcd1234",
            Direction::Output,
            props,
            PropertyValues::new(),
        )
        .await
        .unwrap();
    assert_eq!(model.name(), format!("model.pkl:abcd1234:{}", execution.id));
    assert_eq!(
        model.properties.get(names::MODEL_FRAMEWORK),
        Some(&PropertyValue::from("sklearn"))
    );
    assert!(matches!(
        recorder
            .log_model_with_version(
                &execution,
                "model.pkl",
                " ",
                Direction::Output,
                PropertyValues::new(),
                PropertyValues::new()
            )
            .await,
        Err(Error::SchemaMismatch(_))
    ));

    let mut custom = PropertyValues::new();
    custom.insert("auc".to_owned(), 0.9.into());
    let metrics = recorder
        .log_execution_metrics(&execution, "training_metrics", custom)
        .await
        .unwrap();
    assert_eq!(metrics.type_name, names::METRICS);
    assert!(metrics.name().starts_with("training_metrics:"));
    assert!(metrics.name().ends_with(&format!(":{}", execution.id)));

    let from_client = recorder
        .log_execution_metrics_from_client(
            &execution,
            &format!("training_metrics:{}:77", metrics.uri()),
            PropertyValues::new(),
        )
        .await
        .unwrap();
    assert_eq!(from_client.id, metrics.id);
    let rekeyed = recorder
        .log_execution_metrics_from_client(&execution, "eval:u9:77", PropertyValues::new())
        .await
        .unwrap();
    assert_eq!(rekeyed.name(), format!("eval:u9:{}", execution.id));
    assert!(recorder
        .log_execution_metrics_from_client(&execution, "eval", PropertyValues::new())
        .await
        .is_err());
}

#[tokio::test]
async fn step_metrics_are_committed_to_a_file() {
    let (_file, mut store) = temp_store().await;
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new(&mut store, options(dir.path()));
    let pipeline = recorder
        .create_pipeline("p", PropertyValues::new())
        .await
        .unwrap();
    let stage = recorder
        .create_stage(&pipeline, "train", PropertyValues::new())
        .await
        .unwrap();
    let execution = recorder
        .create_execution(&stage, "Train", PropertyValues::new(), PropertyValues::new())
        .await
        .unwrap();

    for loss in [0.5, 0.25] {
        let mut row = PropertyValues::new();
        row.insert("loss".to_owned(), loss.into());
        recorder.log_metric(&execution, "training", row);
    }
    let artifact = recorder.commit_metrics(&execution, "training").await.unwrap();
    assert_eq!(artifact.type_name, names::STEP_METRICS);
    assert_eq!(
        artifact.custom_properties.get("Name"),
        Some(&PropertyValue::from("training"))
    );

    let uuid = execution.uuids().remove(0);
    let path = dir
        .path()
        .join(format!("cmf_artifacts/{}/metrics/training", uuid));
    let content = std::fs::read(&path).unwrap();
    assert_eq!(artifact.uri(), sha256_hex(&content));
    let rows: Vec<serde_json::Value> = serde_json::from_slice(&content).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1]["SequenceNumber"], 2);
    assert_eq!(rows[1]["loss"], 0.25);

    assert!(matches!(
        recorder.commit_metrics(&execution, "training").await,
        Err(Error::NotFound(_))
    ));

    let existing = recorder
        .commit_existing_metrics(&execution, "other", artifact.uri(), PropertyValues::new())
        .await
        .unwrap();
    assert_eq!(existing.id, artifact.id);
}

#[tokio::test]
async fn dataslices_are_committed() {
    let (_file, mut store) = temp_store().await;
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new(&mut store, options(dir.path()));
    let pipeline = recorder
        .create_pipeline("p", PropertyValues::new())
        .await
        .unwrap();
    let stage = recorder
        .create_stage(&pipeline, "slice", PropertyValues::new())
        .await
        .unwrap();
    let execution = recorder
        .create_execution(&stage, "Slice", PropertyValues::new(), PropertyValues::new())
        .await
        .unwrap();

    let mut slice = recorder.create_dataslice("slice-a");
    let mut custom = PropertyValues::new();
    custom.insert("label".to_owned(), "cat".into());
    slice.add_data("data/raw/1.png", custom);
    slice.add_data("data/raw/2.png", PropertyValues::new());
    assert_eq!(slice.len(), 2);

    let artifact = slice
        .commit(&mut recorder, &execution, PropertyValues::new())
        .await
        .unwrap();
    assert_eq!(artifact.type_name, names::DATASLICE);
    assert!(artifact.name().ends_with(&format!(":{}", artifact.uri())));
    let events = recorder
        .store()
        .get_events_by_artifact_ids(&[artifact.id])
        .await
        .unwrap();
    assert_eq!(events[0].ty, EventType::Output);

    // Known content is consumed, unknown content is produced.
    let consumer = recorder
        .create_execution(&stage, "Slice", PropertyValues::new(), PropertyValues::new())
        .await
        .unwrap();
    let linked = slice
        .commit_existing(&mut recorder, &consumer, artifact.uri(), PropertyValues::new())
        .await
        .unwrap();
    assert_eq!(linked.id, artifact.id);
    let created = slice
        .commit_existing(&mut recorder, &consumer, "ffff", PropertyValues::new())
        .await
        .unwrap();
    assert_eq!(created.name(), "slice-a");

    let events = recorder
        .store()
        .get_events_by_execution_ids(&[consumer.id])
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .any(|e| e.artifact_id == artifact.id && e.ty == EventType::Input));
    assert!(events
        .iter()
        .any(|e| e.artifact_id == created.id && e.ty == EventType::Output));
}

#[tokio::test]
async fn merged_execution_requires_a_uuid() {
    let (_file, mut store) = temp_store().await;
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new(&mut store, options(dir.path()));
    let pipeline = recorder
        .create_pipeline("p", PropertyValues::new())
        .await
        .unwrap();
    let stage = recorder
        .merge_created_context(&pipeline, "p/train", PropertyValues::new())
        .await
        .unwrap();

    let result = recorder
        .merge_created_execution(&stage, "Train", PropertyValues::new(), PropertyValues::new(), "")
        .await;
    assert!(result.unwrap_err().is_schema_mismatch());

    let mut props = PropertyValues::new();
    props.insert(names::EXECUTION_UUID.to_owned(), "u1".into());
    props.insert(names::CONTEXT_TYPE.to_owned(), "p/train".into());
    let execution = recorder
        .merge_created_execution(&stage, "", props, PropertyValues::new(), "")
        .await
        .unwrap();
    assert_eq!(execution.type_name, "p/train");
    assert_eq!(execution.uuids(), vec!["u1"]);
}

async fn train_execution(recorder: &mut Recorder<'_>) -> Execution {
    let pipeline = recorder
        .create_pipeline("p", PropertyValues::new())
        .await
        .unwrap();
    let stage = recorder
        .create_stage(&pipeline, "train", PropertyValues::new())
        .await
        .unwrap();
    recorder
        .create_execution(&stage, "Train", PropertyValues::new(), PropertyValues::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn execution_custom_properties_are_merged() {
    let (_file, mut store) = temp_store().await;
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new(&mut store, options(dir.path()));
    let pipeline = recorder
        .create_pipeline("p", PropertyValues::new())
        .await
        .unwrap();
    let stage = recorder
        .create_stage(&pipeline, "train", PropertyValues::new())
        .await
        .unwrap();
    let mut custom = PropertyValues::new();
    custom.insert("seed".to_owned(), 1.into());
    custom.insert("split".to_owned(), "0.2".into());
    let execution = recorder
        .create_execution(&stage, "Train", PropertyValues::new(), custom)
        .await
        .unwrap();

    let mut update = PropertyValues::new();
    update.insert("seed".to_owned(), 7.into());
    update.insert("lr".to_owned(), 0.01.into());
    let updated = recorder.update_execution(execution.id, update).await.unwrap();
    assert_eq!(updated.id, execution.id);
    assert_eq!(updated.custom_properties.get("seed"), Some(&PropertyValue::Int(7)));
    assert_eq!(
        updated.custom_properties.get("lr"),
        Some(&PropertyValue::from("0.01"))
    );
    assert_eq!(
        updated.custom_properties.get("split"),
        Some(&PropertyValue::from("0.2"))
    );
    assert_eq!(updated.uuids(), execution.uuids());

    let missing = recorder
        .update_execution(ExecutionId::new(999), PropertyValues::new())
        .await;
    assert!(matches!(missing, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn committed_dataslice_records_are_updated() {
    let (_file, mut store) = temp_store().await;
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new(&mut store, options(dir.path()));
    let execution = train_execution(&mut recorder).await;

    let mut slice = recorder.create_dataslice("slice-a");
    let mut custom = PropertyValues::new();
    custom.insert("label".to_owned(), "cat".into());
    slice.add_data("data/raw/1.png", custom);
    slice.add_data("data/raw/2.png", PropertyValues::new());
    let artifact = slice
        .commit(&mut recorder, &execution, PropertyValues::new())
        .await
        .unwrap();
    let (path, _) = artifact.name().split_once(':').unwrap();

    let read = recorder.read_dataslice(path).await.unwrap();
    assert_eq!(read.name(), "slice-a");
    assert_eq!(read.len(), 2);
    assert_eq!(
        read.get("data/raw/1.png").unwrap().get("label"),
        Some(&PropertyValue::from("cat"))
    );

    let mut update = PropertyValues::new();
    update.insert("label".to_owned(), "dog".into());
    update.insert("reviewed".to_owned(), 1.into());
    recorder
        .update_dataslice(path, "data/raw/1.png", update)
        .await
        .unwrap();
    let read = recorder.read_dataslice(path).await.unwrap();
    let row = read.get("data/raw/1.png").unwrap();
    assert_eq!(row.get("label"), Some(&PropertyValue::from("dog")));
    assert_eq!(row.get("reviewed"), Some(&PropertyValue::Int(1)));
    assert!(read.get("data/raw/2.png").unwrap().is_empty());

    let missing = recorder
        .update_dataslice(path, "data/raw/9.png", PropertyValues::new())
        .await;
    assert!(matches!(missing, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn validation_output_is_an_internal_event() {
    let (_file, mut store) = temp_store().await;
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new(&mut store, options(dir.path()));
    let execution = train_execution(&mut recorder).await;

    let mut custom = PropertyValues::new();
    custom.insert("passed".to_owned(), 1.into());
    let artifact = recorder
        .log_validation_output(&execution, "v1", custom)
        .await
        .unwrap();
    assert_eq!(artifact.type_name, names::VALIDATION_OUTPUT);
    assert_eq!(artifact.name(), artifact.uri());
    assert_eq!(
        artifact.properties.get(names::VERSION),
        Some(&PropertyValue::from("v1"))
    );

    let events = recorder
        .store()
        .get_events_by_execution_ids(&[execution.id])
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ty, EventType::InternalOutput);

    let json = crate::sync::dumptojson(recorder.store(), "p", None)
        .await
        .unwrap()
        .unwrap();
    assert!(!json.contains(names::VALIDATION_OUTPUT));
}

#[tokio::test]
async fn model_url_and_output_are_updated() {
    let (_file, mut store) = temp_store().await;
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new(&mut store, options(dir.path()));
    let execution = train_execution(&mut recorder).await;

    let mut props = PropertyValues::new();
    props.insert(names::URL.to_owned(), "p:model.pkl".into());
    let model = recorder
        .log_model_with_version(
            &execution,
            "model.pkl",
            "abcd1234",
            Direction::Output,
            props,
            PropertyValues::new(),
        )
        .await
        .unwrap();

    let updated = recorder
        .update_model_url(&[model.clone()], "s3://bucket/model.pkl")
        .await
        .unwrap();
    assert_eq!(
        updated[0].properties.get(names::URL),
        Some(&PropertyValue::from("p:model.pkl,s3://bucket/model.pkl"))
    );
    let again = recorder
        .update_model_url(&updated, "s3://bucket/model.pkl")
        .await
        .unwrap();
    assert_eq!(again[0].properties, updated[0].properties);

    let mut edited = again[0].clone();
    edited
        .properties
        .insert(names::MODEL_TYPE.to_owned(), "RandomForest".into());
    edited
        .custom_properties
        .insert("accuracy".to_owned(), "0.9".into());
    let written = recorder.update_model_output(&edited).await.unwrap();
    assert_eq!(written.id, model.id);
    assert_eq!(
        written.properties.get(names::MODEL_TYPE),
        Some(&PropertyValue::from("RandomForest"))
    );
    assert_eq!(
        written.custom_properties.get("accuracy"),
        Some(&PropertyValue::from("0.9"))
    );
    assert_eq!(written.name(), model.name());
}
