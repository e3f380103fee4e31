//! Records a two-step pipeline and prints what the query and lineage layers see.
//!
//! ```console
//! $ cargo run --example get-started -- sqlite://./mlmd?mode=rwc
//! ```
use cmf::cmfquery::CmfQuery;
use cmf::lineage;
use cmf::metadata::{Direction, PropertyValues};
use cmf::recorder::{Recorder, RecorderOptions};
use cmf::MetadataStore;
use structopt::StructOpt;

#[derive(StructOpt)]
struct Opt {
    database_uri: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opt = Opt::from_args();
    let mut store = MetadataStore::connect(&opt.database_uri).await?;

    {
        let mut recorder = Recorder::new(&mut store, RecorderOptions::default());

        println!("Create the pipeline and its Prepare stage");
        let pipeline = recorder
            .create_pipeline("Test-env", PropertyValues::new())
            .await?;
        let prepare = recorder
            .create_stage(&pipeline, "Prepare", PropertyValues::new())
            .await?;
        let prepare = recorder
            .create_execution(&prepare, "Prepare", PropertyValues::new(), PropertyValues::new())
            .await?;

        println!("Log the raw dataset as an output of Prepare");
        recorder
            .log_dataset_with_version(
                &prepare,
                "artifacts/data.xml.gz",
                "236d",
                Direction::Output,
                PropertyValues::new(),
                PropertyValues::new(),
            )
            .await?;

        println!("Train a model from it");
        let train = recorder
            .create_stage(&pipeline, "Train", PropertyValues::new())
            .await?;
        let train = recorder
            .create_execution(&train, "Train", PropertyValues::new(), PropertyValues::new())
            .await?;
        recorder
            .log_dataset_with_version(
                &train,
                "artifacts/data.xml.gz",
                "236d",
                Direction::Input,
                PropertyValues::new(),
                PropertyValues::new(),
            )
            .await?;
        recorder
            .log_model_with_version(
                &train,
                "artifacts/model.pkl",
                "5f1e",
                Direction::Output,
                PropertyValues::new(),
                PropertyValues::new(),
            )
            .await?;

        let mut metrics = PropertyValues::new();
        metrics.insert("auc".to_owned(), 0.93.into());
        recorder
            .log_execution_metrics(&train, "training_metrics", metrics)
            .await?;
    }

    let mut query = CmfQuery::new(&mut store);
    println!("Pipelines: {:?}", query.get_pipeline_names().await?);
    println!("Artifacts: {:?}", query.get_all_artifacts().await?);
    if let Some(producer) = query
        .find_producer_execution("artifacts/data.xml.gz:236d")
        .await?
    {
        println!("data.xml.gz was produced by execution {}", producer.id);
    }

    println!("Artifact lineage, one layer per line:");
    for layer in lineage::artifact_tree(&mut query, "Test-env").await? {
        let names = layer.iter().map(|n| n.id.as_str()).collect::<Vec<_>>();
        println!("  {}", names.join(", "));
    }

    Ok(())
}
