use super::*;
use crate::metadata::{ArtifactState, PropertyValue};
use crate::testing::{sqlite_uri, temp_store};
use tempfile::NamedTempFile;

#[tokio::test]
async fn initialization_works() {
    // Create a new database.
    let file = NamedTempFile::new().unwrap();
    MetadataStore::connect(&sqlite_uri(file.path()))
        .await
        .unwrap();

    // Open the same database again.
    MetadataStore::connect(&sqlite_uri(file.path()))
        .await
        .unwrap();

    assert!(matches!(
        MetadataStore::connect("redis://localhost").await,
        Err(InitError::UnsupportedDatabase)
    ));
}

#[tokio::test]
async fn put_artifact_type_works() {
    let (_file, mut store) = temp_store().await;

    store
        .put_artifact_type("t0")
        .property("p0", PropertyType::Int)
        .execute()
        .await
        .unwrap();

    assert!(matches!(
        store
            .put_artifact_type("t0")
            .property("p0", PropertyType::Double)
            .execute()
            .await,
        Err(PutError::TypeAlreadyExists { .. })
    ));

    assert!(matches!(
        store
            .put_artifact_type("t0")
            .property("p0", PropertyType::Int)
            .property("p1", PropertyType::String)
            .execute()
            .await,
        Err(PutError::TypeAlreadyExists { .. })
    ));
    store
        .put_artifact_type("t0")
        .can_add_fields()
        .property("p0", PropertyType::Int)
        .property("p1", PropertyType::String)
        .execute()
        .await
        .unwrap();

    assert!(matches!(
        store.put_artifact_type("t0").execute().await,
        Err(PutError::TypeAlreadyExists { .. })
    ));
    store
        .put_artifact_type("t0")
        .can_omit_fields()
        .execute()
        .await
        .unwrap();

    // The same name may be used by a type of another kind.
    store.put_execution_type("t0").execute().await.unwrap();
}

#[tokio::test]
async fn get_artifact_type_works() {
    let (_file, mut store) = temp_store().await;

    let t0_id = store
        .put_artifact_type("t0")
        .property("p0", PropertyType::Int)
        .execute()
        .await
        .unwrap();
    let t1_id = store.put_artifact_type("t1").execute().await.unwrap();
    assert_ne!(t0_id, t1_id);

    assert_eq!(
        store.get_artifact_type("t0").await.unwrap(),
        ArtifactType {
            id: t0_id,
            name: "t0".to_owned(),
            properties: vec![("p0".to_owned(), PropertyType::Int)]
                .into_iter()
                .collect()
        }
    );
    assert!(matches!(
        store.get_artifact_type("t2").await.err(),
        Some(GetError::NotFound { .. })
    ));
    assert!(matches!(
        store.get_context_type("t0").await.err(),
        Some(GetError::NotFound { .. })
    ));

    let types = store.get_artifact_types().await.unwrap();
    assert_eq!(types.len(), 2);
    assert_eq!(types[0].name, "t0");
    assert_eq!(types[1].name, "t1");
}

#[tokio::test]
async fn post_artifact_works() {
    let (_file, mut store) = temp_store().await;
    let type_id = store
        .put_artifact_type("Dataset")
        .property("url", PropertyType::String)
        .execute()
        .await
        .unwrap();

    let id = store
        .post_artifact(type_id)
        .name("data.xml:abcd")
        .uri("abcd")
        .state(ArtifactState::Live)
        .property("url", "s3://bucket/data.xml")
        .custom_property("rows", 10)
        .execute()
        .await
        .unwrap();

    let artifacts = store.get_artifacts_by_id(&[id]).await.unwrap();
    assert_eq!(artifacts.len(), 1);
    let artifact = &artifacts[0];
    assert_eq!(artifact.type_name, "Dataset");
    assert_eq!(artifact.name(), "data.xml:abcd");
    assert_eq!(artifact.uri(), "abcd");
    assert_eq!(artifact.state, ArtifactState::Live);
    assert_eq!(
        artifact.properties.get("url"),
        Some(&PropertyValue::from("s3://bucket/data.xml"))
    );
    assert_eq!(
        artifact.custom_properties.get("rows"),
        Some(&PropertyValue::Int(10))
    );

    assert!(matches!(
        store
            .post_artifact(type_id)
            .property("undefined", 1)
            .execute()
            .await,
        Err(PostError::UndefinedProperty { .. })
    ));
    assert!(matches!(
        store.post_artifact(type_id).name("data.xml:abcd").execute().await,
        Err(PostError::NameAlreadyExists { .. })
    ));
    assert!(matches!(
        store.post_artifact(TypeId::new(100)).execute().await,
        Err(PostError::TypeNotFound { .. })
    ));

    assert_eq!(store.get_artifacts_by_uri("abcd").await.unwrap().len(), 1);
    assert_eq!(store.get_artifacts_by_type("Dataset").await.unwrap().len(), 1);
    assert!(store.get_artifacts_by_type("Model").await.unwrap().is_empty());
}

#[tokio::test]
async fn put_artifact_works() {
    let (_file, mut store) = temp_store().await;
    let type_id = store.put_artifact_type("Dataset").execute().await.unwrap();
    let id = store.post_artifact(type_id).uri("a").execute().await.unwrap();

    store
        .put_artifact(id)
        .uri("b")
        .custom_property("k", 1.5)
        .execute()
        .await
        .unwrap();
    store
        .put_artifact(id)
        .custom_property("k", "replaced")
        .execute()
        .await
        .unwrap();

    let artifact = store.get_artifacts_by_id(&[id]).await.unwrap().remove(0);
    assert_eq!(artifact.uri(), "b");
    assert_eq!(
        artifact.custom_properties.get("k"),
        Some(&PropertyValue::from("replaced"))
    );

    assert!(matches!(
        store.put_artifact(ArtifactId::new(100)).execute().await,
        Err(PutError::NotFound { .. })
    ));
}

#[tokio::test]
async fn contexts_and_relations_work() {
    let (_file, mut store) = temp_store().await;
    let ctx_type = store.put_context_type("Parent_Context").execute().await.unwrap();
    let stage_type = store.put_context_type("Pipeline_Stage").execute().await.unwrap();
    let exec_type = store.put_execution_type("Train").execute().await.unwrap();
    let art_type = store.put_artifact_type("Model").execute().await.unwrap();

    let pipeline = store.post_context(ctx_type, "p").execute().await.unwrap();
    let stage = store.post_context(stage_type, "p/train").execute().await.unwrap();
    assert!(matches!(
        store.post_context(ctx_type, "p").execute().await,
        Err(PostError::NameAlreadyExists { .. })
    ));

    store.put_parent_context(pipeline, stage).await.unwrap();
    store.put_parent_context(pipeline, stage).await.unwrap();
    let children = store.get_children_contexts_by_context(pipeline).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name, "p/train");
    let parents = store.get_parent_contexts_by_context(stage).await.unwrap();
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0].id, pipeline);

    let execution = store.post_execution(exec_type).execute().await.unwrap();
    let artifact = store.post_artifact(art_type).execute().await.unwrap();
    store.put_association(stage, execution).await.unwrap();
    store.put_association(stage, execution).await.unwrap();
    store.put_attribution(stage, artifact).await.unwrap();
    assert!(matches!(
        store.put_attribution(stage, ArtifactId::new(100)).await,
        Err(PutError::NotFound { .. })
    ));

    let executions = store.get_executions_by_context(stage).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].type_name, "Train");
    assert_eq!(store.get_artifacts_by_context(stage).await.unwrap().len(), 1);
    assert_eq!(store.get_contexts_by_execution(execution).await.unwrap()[0].id, stage);
    assert_eq!(store.get_contexts_by_artifact(artifact).await.unwrap()[0].id, stage);
    assert_eq!(
        store
            .get_context_by_type_and_name("Parent_Context", "p")
            .await
            .unwrap()
            .map(|c| c.id),
        Some(pipeline)
    );

    store
        .put_context(pipeline)
        .custom_property("owner", "ml-team")
        .execute()
        .await
        .unwrap();
    let contexts = store
        .get_contexts(GetContextsOptions::default().ids(&[pipeline]))
        .await
        .unwrap();
    assert_eq!(
        contexts[0].custom_properties.get("owner"),
        Some(&PropertyValue::from("ml-team"))
    );

    let train = store.get_execution_type("Train").await.unwrap();
    assert_eq!(train.id, exec_type);
    assert!(matches!(
        store.get_execution_type("Evaluate").await,
        Err(GetError::NotFound { .. })
    ));
}

#[tokio::test]
async fn bulk_writes_work() {
    let (_file, mut store) = temp_store().await;
    let stage_type = store.put_context_type("Pipeline_Stage").execute().await.unwrap();
    let train_type = store.put_execution_type("Train").execute().await.unwrap();
    let eval_type = store.put_execution_type("Evaluate").execute().await.unwrap();
    let art_type = store.put_artifact_type("Model").execute().await.unwrap();

    let stage = store.post_context(stage_type, "p/train").execute().await.unwrap();
    let train = store.post_execution(train_type).execute().await.unwrap();
    let eval = store.post_execution(eval_type).execute().await.unwrap();
    let model = store.post_artifact(art_type).execute().await.unwrap();

    store
        .put_attributions_and_associations(&[(stage, model)], &[(stage, train), (stage, eval)])
        .await
        .unwrap();
    assert_eq!(store.get_artifacts_by_context(stage).await.unwrap().len(), 1);
    assert_eq!(store.get_executions_by_context(stage).await.unwrap().len(), 2);

    let event = |execution_id, ty| Event {
        artifact_id: model,
        execution_id,
        ty,
        create_time_since_epoch: Duration::from_millis(1),
    };
    let events = [
        event(train, EventType::Output),
        event(eval, EventType::Input),
        event(train, EventType::Output),
    ];
    store.put_events(&events).await.unwrap();
    let recorded = store.get_events_by_artifact_ids(&[model]).await.unwrap();
    assert_eq!(recorded.len(), 2);

    let types = store.get_execution_types_by_id(&[eval_type]).await.unwrap();
    assert_eq!(types.len(), 1);
    assert_eq!(types[0].name, "Evaluate");
    assert_eq!(store.get_execution_types_by_id(&[]).await.unwrap().len(), 2);
    let types = store.get_artifact_types_by_id(&[art_type]).await.unwrap();
    assert_eq!(types[0].name, "Model");
}

#[tokio::test]
async fn put_event_is_idempotent() {
    let (_file, mut store) = temp_store().await;
    let exec_type = store.put_execution_type("Train").execute().await.unwrap();
    let art_type = store.put_artifact_type("Model").execute().await.unwrap();
    let execution = store.post_execution(exec_type).execute().await.unwrap();
    let artifact = store.post_artifact(art_type).execute().await.unwrap();

    assert!(store
        .put_event(execution, artifact, EventType::Output)
        .await
        .unwrap());
    assert!(!store
        .put_event(execution, artifact, EventType::Output)
        .await
        .unwrap());
    assert!(store
        .put_event(execution, artifact, EventType::Input)
        .await
        .unwrap());

    let events = store.get_events_by_execution_ids(&[execution]).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].ty, EventType::Output);
    assert_eq!(events[1].ty, EventType::Input);

    let events = store
        .get_events(
            GetEventsOptions::default()
                .artifact_ids(&[artifact])
                .ty(EventType::Input),
        )
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn rollback_discards_writes() {
    let (_file, mut store) = temp_store().await;
    let type_id = store.put_artifact_type("Dataset").execute().await.unwrap();

    store.begin_transaction().await.unwrap();
    store.post_artifact(type_id).uri("a").execute().await.unwrap();
    store.rollback_transaction().await.unwrap();
    assert!(store.get_artifacts_by_uri("a").await.unwrap().is_empty());

    store.begin_transaction().await.unwrap();
    store.post_artifact(type_id).uri("b").execute().await.unwrap();
    // A second begin discards the dangling transaction.
    store.begin_transaction().await.unwrap();
    store.post_artifact(type_id).uri("c").execute().await.unwrap();
    store.commit_transaction().await.unwrap();
    assert!(store.get_artifacts_by_uri("b").await.unwrap().is_empty());
    assert_eq!(store.get_artifacts_by_uri("c").await.unwrap().len(), 1);
}

#[tokio::test]
async fn aborted_transaction_is_not_observed() {
    let (_file, mut store) = temp_store().await;
    let type_id = store.put_artifact_type("Dataset").execute().await.unwrap();

    store.begin_transaction().await.unwrap();
    store.post_artifact(type_id).uri("a").execute().await.unwrap();
    assert!(store.in_transaction());

    store.discard_aborted_transaction().await.unwrap();
    assert!(!store.in_transaction());
    assert!(store.get_artifacts_by_uri("a").await.unwrap().is_empty());

    // Nothing to discard outside a transaction.
    store.discard_aborted_transaction().await.unwrap();
    store.post_artifact(type_id).uri("b").execute().await.unwrap();
    assert_eq!(store.get_artifacts_by_uri("b").await.unwrap().len(), 1);
}
