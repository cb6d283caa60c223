//! Stage pipeline
//!
//! Runs the fixed stage sequence for one sample: every per-molecule stage
//! runs for molecule A then molecule B before the next stage starts. A stage
//! only runs when its declared inputs are present, and only counts as
//! successful when its declared outputs exist and are non-empty afterwards.
//! The first failing stage ends the sample.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, instrument, warn};

use super::error::StageError;
use super::result::StageRecord;
use super::run_log::{stage_label, SampleLog};
use super::workspace::Workspace;
use crate::adapter::{
    Adapter, AdapterError, AdapterOutput, Failure, FailureCause, FormatConverter,
    GeometryOptimizer, Invocation, ParameterExtractor, ResidueNormalizer, StructureFetcher,
    TemplateDeployer, TopologyGenerator,
};
use crate::workflow::{DeployPolicy, Molecule, PipelineConfig, Sample, Stage, StageKind};

/// The stage that ended a sample, and why
#[derive(Debug)]
pub struct StageFailure {
    pub stage: StageKind,
    pub molecule: Option<Molecule>,
    pub error: StageError,
}

impl StageFailure {
    /// Human-readable reason, prefixed with the molecule token when there is one
    pub fn reason(&self) -> String {
        match self.molecule {
            Some(m) => format!("{}: {}", m.token(), self.error),
            None => self.error.to_string(),
        }
    }
}

/// What happened while running the pipeline for one sample
#[derive(Debug, Default)]
pub struct PipelineRun {
    pub failure: Option<StageFailure>,
    pub last_stage: Option<StageKind>,
    pub stages: Vec<StageRecord>,
    pub warnings: Vec<String>,
}

pub struct StagePipeline {
    adapters: HashMap<StageKind, Box<dyn Adapter>>,
    deploy_policy: DeployPolicy,
}

impl Default for StagePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl StagePipeline {
    /// A pipeline with no adapters registered
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            deploy_policy: DeployPolicy::default(),
        }
    }

    /// The standard adapter set built from configuration
    pub fn from_config(config: &PipelineConfig) -> Result<Self, AdapterError> {
        let limit = config.diagnostic_limit;
        Ok(Self::new()
            .with_adapter(StructureFetcher::new(&config.fetch, limit)?)
            .with_adapter(FormatConverter::new(&config.convert, limit))
            .with_adapter(GeometryOptimizer::new(&config.optimize, &config.optimizer, limit))
            .with_adapter(ResidueNormalizer::new())
            .with_adapter(TopologyGenerator::new(
                &config.topology,
                &config.parameterization,
                limit,
            ))
            .with_adapter(ParameterExtractor::new(config.parameters.section.clone()))
            .with_adapter(TemplateDeployer::new(config.template_dir.clone()))
            .deploy_policy(config.deploy_policy))
    }

    /// Register `adapter` for its stage, replacing any previous one
    pub fn with_adapter(mut self, adapter: impl Adapter + 'static) -> Self {
        self.adapters.insert(adapter.stage(), Box::new(adapter));
        self
    }

    pub fn deploy_policy(mut self, policy: DeployPolicy) -> Self {
        self.deploy_policy = policy;
        self
    }

    /// Directories the registered adapters read from
    pub fn reserved_paths(&self) -> Vec<PathBuf> {
        StageKind::ALL
            .iter()
            .filter_map(|k| self.adapters.get(k))
            .flat_map(|a| a.reserved_paths())
            .collect()
    }

    /// Stages with no registered adapter
    pub fn missing_stages(&self) -> Vec<StageKind> {
        StageKind::ALL
            .into_iter()
            .filter(|k| !self.adapters.contains_key(k))
            .collect()
    }

    pub async fn run(&self, sample: &Sample, workspace: &Workspace, log: &SampleLog) -> PipelineRun {
        self.run_from(StageKind::ALL[0], sample, workspace, log).await
    }

    /// Run `first` and every stage after it
    ///
    /// Any deploy marker is removed up front, so a sample only counts as
    /// deployed once this run's Deploy stage has succeeded.
    #[instrument(skip_all, fields(sample = %sample.key, first = %first))]
    pub async fn run_from(
        &self,
        first: StageKind,
        sample: &Sample,
        workspace: &Workspace,
        log: &SampleLog,
    ) -> PipelineRun {
        let mut run = PipelineRun::default();

        if let Err(error) = workspace.clear_deployed() {
            run.failure = Some(StageFailure {
                stage: first,
                molecule: None,
                error: StageError::Workspace {
                    path: workspace.root().display().to_string(),
                    error,
                },
            });
            return run;
        }

        for kind in StageKind::ALL.into_iter().filter(|k| *k >= first) {
            let targets: &[Option<Molecule>] = if kind.per_molecule() {
                &[Some(Molecule::A), Some(Molecule::B)]
            } else {
                &[None]
            };

            for &molecule in targets {
                run.last_stage = Some(kind);
                match self.run_stage(kind, molecule, sample, workspace, log, &mut run).await {
                    Ok(()) => {}
                    Err(error) if kind == StageKind::Deploy
                        && self.deploy_policy == DeployPolicy::BestEffort =>
                    {
                        let message = format!("template deployment skipped: {}", error);
                        warn!("Sample {}: {}", sample.key, message);
                        log.warning(&message);
                        run.warnings.push(message);
                    }
                    Err(error) => {
                        run.failure = Some(StageFailure {
                            stage: kind,
                            molecule,
                            error,
                        });
                        return run;
                    }
                }
            }
        }

        run
    }

    async fn run_stage(
        &self,
        kind: StageKind,
        molecule: Option<Molecule>,
        sample: &Sample,
        workspace: &Workspace,
        log: &SampleLog,
        run: &mut PipelineRun,
    ) -> Result<(), StageError> {
        let declared = molecule.map(|m| Stage::for_molecule(kind, m));
        let started = Instant::now();
        log.stage_started(kind, molecule);
        debug!("Running {}", stage_label(kind, molecule));

        let result = self
            .invoke(kind, molecule, sample, workspace, log, declared.as_ref())
            .await;
        let elapsed = started.elapsed();

        run.stages.push(StageRecord {
            stage: kind,
            molecule,
            elapsed,
            success: result.is_ok(),
        });

        match result {
            Ok(output) => {
                log.stage_finished(kind, molecule, elapsed, &output.diagnostic);
                Ok(())
            }
            Err(error) => {
                log.stage_failed(kind, molecule, elapsed, &error.to_string());
                Err(error)
            }
        }
    }

    async fn invoke(
        &self,
        kind: StageKind,
        molecule: Option<Molecule>,
        sample: &Sample,
        workspace: &Workspace,
        log: &SampleLog,
        declared: Option<&Stage>,
    ) -> Result<AdapterOutput, StageError> {
        let adapter = self.adapters.get(&kind).ok_or(StageError::NoAdapter(kind))?;

        if let Some(stage) = declared {
            if let Some(missing) = workspace.missing(&stage.inputs).first() {
                return Err(StageError::MissingInput {
                    stage: kind,
                    artifact: missing.to_string(),
                });
            }
        }

        let invocation = Invocation::new(sample, molecule, log);
        let output = match AssertUnwindSafe(adapter.invoke(workspace, &invocation))
            .catch_unwind()
            .await
        {
            Ok(result) => result?,
            Err(payload) => {
                return Err(AdapterError::for_stage(
                    kind,
                    Failure::new(FailureCause::Panicked, panic_message(payload.as_ref())),
                )
                .into())
            }
        };

        if let Some(stage) = declared {
            if let Some(missing) = workspace.missing(&stage.outputs).first() {
                return Err(StageError::MissingOutput {
                    stage: kind,
                    artifact: missing.to_string(),
                });
            }
        }

        if kind == StageKind::Deploy {
            workspace
                .mark_deployed(&output.paths)
                .map_err(|error| StageError::Workspace {
                    path: workspace.root().display().to_string(),
                    error,
                })?;
        }

        Ok(output)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
