use super::*;
use crate::metadata::{Direction, PropertyValues};
use crate::recorder::{Recorder, RecorderOptions};
use crate::testing::temp_store;

struct Lineage {
    pipeline: Context,
    e1: Execution,
    e2: Execution,
}

async fn log(recorder: &mut Recorder<'_>, execution: &Execution, name: &str, direction: Direction) {
    let (url, version) = name.split_once(':').unwrap();
    recorder
        .log_dataset_with_version(
            execution,
            url,
            version,
            direction,
            PropertyValues::new(),
            PropertyValues::new(),
        )
        .await
        .unwrap();
}

/// `e1` produces `data.xml.gz:236d`; `e2` turns it into a train and a test split.
async fn two_step_lineage(store: &mut MetadataStore) -> Lineage {
    let mut recorder = Recorder::new(store, RecorderOptions::default());
    let pipeline = recorder
        .create_pipeline("Test-env", PropertyValues::new())
        .await
        .unwrap();
    let prepare = recorder
        .create_stage(&pipeline, "Prepare", PropertyValues::new())
        .await
        .unwrap();
    let e1 = recorder
        .create_execution(&prepare, "Prepare", PropertyValues::new(), PropertyValues::new())
        .await
        .unwrap();
    log(&mut recorder, &e1, "data.xml.gz:236d", Direction::Output).await;

    let featurize = recorder
        .create_stage(&pipeline, "Featurize", PropertyValues::new())
        .await
        .unwrap();
    let e2 = recorder
        .create_execution(&featurize, "Featurize", PropertyValues::new(), PropertyValues::new())
        .await
        .unwrap();
    log(&mut recorder, &e2, "data.xml.gz:236d", Direction::Input).await;
    log(&mut recorder, &e2, "train.tsv:32b7", Direction::Output).await;
    log(&mut recorder, &e2, "test.tsv:6f59", Direction::Output).await;
    Lineage { pipeline, e1, e2 }
}

fn names_of(rows: &[ArtifactRow]) -> Vec<&str> {
    rows.iter().map(|r| r.name.as_str()).collect()
}

#[tokio::test]
async fn minimal_lineage_works() {
    let (_file, mut store) = temp_store().await;
    let lineage = two_step_lineage(&mut store).await;
    let mut query = CmfQuery::new(&mut store);

    assert_eq!(query.get_pipeline_names().await.unwrap(), vec!["Test-env"]);
    assert_eq!(
        query.get_pipeline_id("Test-env").await.unwrap(),
        Some(lineage.pipeline.id)
    );
    assert_eq!(query.get_pipeline_id("missing").await.unwrap(), None);
    assert_eq!(
        query.get_pipeline_stages("Test-env").await.unwrap(),
        vec!["Test-env/Prepare", "Test-env/Featurize"]
    );
    assert_eq!(
        query.get_all_artifacts().await.unwrap(),
        vec!["data.xml.gz:236d", "train.tsv:32b7", "test.tsv:6f59"]
    );
    assert_eq!(query.get_all_artifact_types().await.unwrap(), vec!["Dataset"]);
    assert_eq!(
        query
            .find_producer_execution("data.xml.gz:236d")
            .await
            .unwrap()
            .map(|e| e.id),
        Some(lineage.e1.id)
    );
    assert!(query
        .find_producer_execution("missing")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn executions_are_listed_once_per_pipeline() {
    let (_file, mut store) = temp_store().await;
    let lineage = two_step_lineage(&mut store).await;
    let mut query = CmfQuery::new(&mut store);

    let rows = query.get_all_executions_in_pipeline("Test-env").await.unwrap();
    assert_eq!(
        rows.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![lineage.e1.id, lineage.e2.id]
    );
    assert_eq!(
        rows[0].get(names::EXECUTION_TYPE_NAME),
        Some(&"Prepare".into())
    );
    assert!(query
        .get_all_executions_in_pipeline("missing")
        .await
        .unwrap()
        .is_empty());

    let rows = query
        .get_all_executions_in_stage("Test-env/Featurize")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, lineage.e2.id);

    let links = query
        .get_all_executions_for_artifact("data.xml.gz:236d")
        .await
        .unwrap();
    assert_eq!(links.len(), 2);
    assert_eq!(links[0].ty, "OUTPUT");
    assert_eq!(links[0].stage, "Test-env/Prepare");
    assert_eq!(links[0].pipeline, "Test-env");
    assert_eq!(links[1].ty, "INPUT");
    assert_eq!(links[1].execution_type_name, "Featurize");
}

#[tokio::test]
async fn two_step_lineage_works() {
    let (_file, mut store) = temp_store().await;
    let lineage = two_step_lineage(&mut store).await;
    let mut query = CmfQuery::new(&mut store);

    let children = query
        .get_one_hop_child_artifacts("data.xml.gz:236d", None)
        .await
        .unwrap();
    assert_eq!(names_of(&children), vec!["train.tsv:32b7", "test.tsv:6f59"]);
    let children = query
        .get_one_hop_child_artifacts("data.xml.gz:236d", Some(ContextId::new(999)))
        .await
        .unwrap();
    assert!(children.is_empty());

    let all_children = query
        .get_all_child_artifacts("data.xml.gz:236d")
        .await
        .unwrap();
    assert_eq!(names_of(&all_children), vec!["train.tsv:32b7", "test.tsv:6f59"]);

    let parents = query
        .get_all_parent_artifacts("train.tsv:32b7")
        .await
        .unwrap();
    assert_eq!(names_of(&parents), vec!["data.xml.gz:236d"]);
    let one_hop = query
        .get_one_hop_parent_artifacts("train.tsv:32b7")
        .await
        .unwrap();
    assert_eq!(one_hop, parents);

    let executions = query
        .get_all_parent_executions("train.tsv:32b7")
        .await
        .unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].id, lineage.e1.id);

    assert_eq!(
        query
            .get_one_hop_parent_executions_ids(&[lineage.e2.id], Some(lineage.pipeline.id))
            .await
            .unwrap(),
        vec![lineage.e1.id]
    );
    let parents = query
        .get_one_hop_parent_executions(&[lineage.e2.id], None)
        .await
        .unwrap();
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0].id, lineage.e1.id);
    assert!(query
        .get_one_hop_parent_executions(&[lineage.e1.id], None)
        .await
        .unwrap()
        .is_empty());
    let tree = query
        .get_all_parent_executions_by_id(&[lineage.e2.id], None)
        .await
        .unwrap();
    assert_eq!(
        tree.nodes.iter().map(|n| n.id).collect::<Vec<_>>(),
        vec![lineage.e1.id, lineage.e2.id]
    );
    assert_eq!(tree.nodes[0].type_name, "Prepare");
    assert_eq!(tree.nodes[0].uuid, lineage.e1.uuids()[0]);
    assert_eq!(
        tree.links,
        vec![LineageLink {
            source: lineage.e1.id,
            target: lineage.e2.id
        }]
    );

    let rows = query
        .get_all_artifacts_for_execution(lineage.e2.id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].event, Some("INPUT"));
    assert_eq!(rows[1].event, Some("OUTPUT"));

    let rows = query.get_all_artifacts_by_context("Test-env").await.unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn cyclic_lineage_terminates() {
    let (_file, mut store) = temp_store().await;
    let lineage = two_step_lineage(&mut store).await;
    {
        let mut recorder = Recorder::new(&mut store, RecorderOptions::default());
        // `train.tsv` is consumed by the execution that produced it.
        log(&mut recorder, &lineage.e2, "train.tsv:32b7", Direction::Input).await;
        log(&mut recorder, &lineage.e2, "data.xml.gz:236d", Direction::Output).await;
    }
    let mut query = CmfQuery::new(&mut store);

    let children = query
        .get_all_child_artifacts("train.tsv:32b7")
        .await
        .unwrap();
    let mut names = names_of(&children);
    let total = names.len();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), total);
    assert!(names.contains(&"train.tsv:32b7"));

    let one_hop = query
        .get_one_hop_child_artifacts("train.tsv:32b7", None)
        .await
        .unwrap();
    for row in &one_hop {
        assert!(children.iter().any(|c| c.id == row.id));
    }

    let tree = query
        .get_all_parent_executions_by_id(&[lineage.e2.id], None)
        .await
        .unwrap();
    assert_eq!(tree.nodes.len(), 2);
}

#[tokio::test]
async fn model_card_works() {
    let (_file, mut store) = temp_store().await;
    let lineage = two_step_lineage(&mut store).await;
    let model = {
        let mut recorder = Recorder::new(&mut store, RecorderOptions::default());
        let stage = recorder
            .create_stage(&lineage.pipeline, "Train", PropertyValues::new())
            .await
            .unwrap();
        let train = recorder
            .create_execution(&stage, "Train", PropertyValues::new(), PropertyValues::new())
            .await
            .unwrap();
        log(&mut recorder, &train, "train.tsv:32b7", Direction::Input).await;
        recorder
            .log_model_with_version(
                &train,
                "model.pkl",
                "9a7b",
                Direction::Output,
                PropertyValues::new(),
                PropertyValues::new(),
            )
            .await
            .unwrap()
    };
    let mut query = CmfQuery::new(&mut store);

    let card = query.get_model_data(model.id).await.unwrap();
    assert_eq!(card.model.len(), 1);
    assert_eq!(card.executions.len(), 1);
    assert_eq!(names_of(&card.inputs), vec!["train.tsv:32b7"]);
    assert!(card.outputs.is_empty());

    let dataset = query.get_artifact("train.tsv:32b7").await.unwrap().unwrap();
    assert!(query.get_model_data(dataset.id).await.unwrap().is_empty());
    assert!(query
        .get_model_data(ArtifactId::new(999))
        .await
        .unwrap()
        .is_empty());

    assert_eq!(
        query
            .get_artifact_by_id(model.id)
            .await
            .unwrap()
            .map(|r| r.type_name),
        Some(names::MODEL.to_owned())
    );
    assert_eq!(query.get_all_artifacts_by_type(names::MODEL).await.unwrap().len(), 1);
}
