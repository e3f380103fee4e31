//! Step-scoped recording.
//!
//! ```no_run
//! # async fn run(store: &mut cmf::MetadataStore) -> cmf::errors::Result<()> {
//! use cmf::fluent::{with_current_recorder, StepParams};
//! use cmf::metadata::{Direction, PropertyValues};
//! use cmf::recorder::RecorderOptions;
//!
//! let params = StepParams::default().pipeline("iris").step("fetch");
//! with_current_recorder(store, RecorderOptions::default(), params, |step| {
//!     Box::pin(async move {
//!         step.log_dataset("data/iris.csv", Direction::Output, PropertyValues::new())
//!             .await?;
//!         Ok(())
//!     })
//! })
//! .await
//! # }
//! ```
use crate::errors::Result;
use crate::metadata::{Artifact, Context, Direction, Execution, PropertyValues};
use crate::recorder::{Recorder, RecorderOptions};
use crate::MetadataStore;
use futures::future::BoxFuture;
use serde::Deserialize;

const INIT_METHOD_ENV: &str = "CMF_FLUENT_INIT_METHOD";
const CMF_PARAMS_ENV: &str = "CMF_FLUENT_CMF_PARAMS";
const PIPELINE_ENV: &str = "CMF_FLUENT_PIPELINE";
const STEP_ENV: &str = "CMF_FLUENT_STEP";
const STEP_PROPERTIES_ENV: &str = "CMF_FLUENT_STEP_PROPERTIES";

const DEFAULT_FILENAME: &str = "mlmd";
const DEFAULT_PIPELINE: &str = "default";
const DEFAULT_STEP: &str = "default";

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CmfParams {
    pub filename: Option<String>,
    pub graph: Option<bool>,
}

/// Parameters of a step.
///
/// Each value is taken from the caller when set, then from the environment
/// when `CMF_FLUENT_INIT_METHOD=env`, then from the defaults.
#[derive(Debug, Default, Clone)]
pub struct StepParams {
    filename: Option<String>,
    graph: Option<bool>,
    pipeline: Option<String>,
    step: Option<String>,
    step_properties: Option<PropertyValues>,
}

impl StepParams {
    pub fn filename(mut self, filename: &str) -> Self {
        self.filename = Some(filename.to_owned());
        self
    }

    pub fn graph(mut self, enabled: bool) -> Self {
        self.graph = Some(enabled);
        self
    }

    pub fn pipeline(mut self, name: &str) -> Self {
        self.pipeline = Some(name.to_owned());
        self
    }

    pub fn step(mut self, name: &str) -> Self {
        self.step = Some(name.to_owned());
        self
    }

    pub fn step_properties(mut self, properties: PropertyValues) -> Self {
        self.step_properties = Some(properties);
        self
    }

    /// Resolves the parameters against the process environment.
    pub fn resolve(self) -> Result<ResolvedStepParams> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    pub(crate) fn resolve_with<F>(self, env: F) -> Result<ResolvedStepParams>
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_env = env(INIT_METHOD_ENV).map_or(false, |m| m == "env");
        let lookup = |key: &str| {
            if from_env {
                env(key).filter(|v| !v.is_empty())
            } else {
                None
            }
        };

        let cmf_params = match lookup(CMF_PARAMS_ENV) {
            Some(json) => serde_json::from_str::<CmfParams>(&json)?,
            None => CmfParams::default(),
        };
        let step_properties = match (self.step_properties, lookup(STEP_PROPERTIES_ENV)) {
            (Some(properties), _) => properties,
            (None, Some(json)) => serde_json::from_str(&json)?,
            (None, None) => PropertyValues::new(),
        };
        Ok(ResolvedStepParams {
            filename: self
                .filename
                .or(cmf_params.filename)
                .unwrap_or_else(|| DEFAULT_FILENAME.to_owned()),
            graph: self.graph.or(cmf_params.graph).unwrap_or(false),
            pipeline: self
                .pipeline
                .or_else(|| lookup(PIPELINE_ENV))
                .unwrap_or_else(|| DEFAULT_PIPELINE.to_owned()),
            step: self
                .step
                .or_else(|| lookup(STEP_ENV))
                .unwrap_or_else(|| DEFAULT_STEP.to_owned()),
            step_properties,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStepParams {
    pub filename: String,
    pub graph: bool,
    pub pipeline: String,
    pub step: String,
    pub step_properties: PropertyValues,
}

impl ResolvedStepParams {
    /// Opens (creating if needed) the embedded store at `filename`.
    pub async fn open_store(&self) -> Result<MetadataStore> {
        let uri = format!("sqlite://{}?mode=rwc", self.filename);
        Ok(MetadataStore::connect(&uri).await?)
    }
}

/// The pipeline, stage and execution of a running step.
#[derive(Debug)]
pub struct Step<'a> {
    recorder: Recorder<'a>,
    pipeline: Context,
    stage: Context,
    execution: Execution,
}

impl<'a> Step<'a> {
    pub fn pipeline(&self) -> &Context {
        &self.pipeline
    }

    pub fn stage(&self) -> &Context {
        &self.stage
    }

    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    pub fn recorder(&mut self) -> &mut Recorder<'a> {
        &mut self.recorder
    }

    pub async fn log_dataset(
        &mut self,
        path: &str,
        direction: Direction,
        custom_properties: PropertyValues,
    ) -> Result<Artifact> {
        self.recorder
            .log_dataset(&self.execution, path, direction, custom_properties)
            .await
    }

    pub async fn log_model(
        &mut self,
        path: &str,
        direction: Direction,
        model_framework: &str,
        model_type: &str,
        model_name: &str,
        custom_properties: PropertyValues,
    ) -> Result<Artifact> {
        self.recorder
            .log_model(
                &self.execution,
                path,
                direction,
                model_framework,
                model_type,
                model_name,
                custom_properties,
            )
            .await
    }

    pub async fn log_execution_metrics(
        &mut self,
        metrics_name: &str,
        custom_properties: PropertyValues,
    ) -> Result<Artifact> {
        self.recorder
            .log_execution_metrics(&self.execution, metrics_name, custom_properties)
            .await
    }

    pub fn log_metric(&mut self, metrics_name: &str, custom_properties: PropertyValues) {
        self.recorder
            .log_metric(&self.execution, metrics_name, custom_properties);
    }

    async fn finish(mut self) -> Result<Vec<Artifact>> {
        let mut committed = Vec::new();
        for name in self.recorder.pending_metrics(&self.execution) {
            committed.push(self.recorder.commit_metrics(&self.execution, &name).await?);
        }
        Ok(committed)
    }
}

/// Runs `f` inside a step: the pipeline, stage and execution are created
/// first, and metrics still buffered when `f` succeeds are committed.
pub async fn with_current_recorder<F, T>(
    store: &mut MetadataStore,
    options: RecorderOptions,
    params: StepParams,
    f: F,
) -> Result<T>
where
    F: for<'s> FnOnce(&'s mut Step<'_>) -> BoxFuture<'s, Result<T>>,
{
    let params = params.resolve()?;
    let mut recorder = Recorder::new(store, options);
    let pipeline = recorder
        .create_pipeline(&params.pipeline, PropertyValues::new())
        .await?;
    let stage = recorder
        .create_stage(&pipeline, &params.step, PropertyValues::new())
        .await?;
    let execution = recorder
        .create_execution(
            &stage,
            &params.step,
            PropertyValues::new(),
            params.step_properties.clone(),
        )
        .await?;
    tracing::info!(
        pipeline = %pipeline.name,
        step = %params.step,
        execution = %execution.id,
        "step started"
    );

    let mut step = Step {
        recorder,
        pipeline,
        stage,
        execution,
    };
    let output = f(&mut step).await?;
    let committed = step.finish().await?;
    if !committed.is_empty() {
        tracing::debug!(count = committed.len(), "committed pending metrics");
    }
    Ok(output)
}
