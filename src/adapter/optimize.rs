//! Geometry Optimizer - force-field minimization of the converted structure
//!
//! The optimizer writes to a sibling file which replaces the input only
//! after it has been verified, so a failed run leaves the input untouched.

use async_trait::async_trait;

use super::fallback::FallbackChain;
use super::process::{check_output, run_command, with_report};
use super::{Adapter, AdapterError, AdapterOutput, Failure, FailureCause, Invocation};
use crate::engine::workspace::Workspace;
use crate::workflow::{
    Artifacts, CommandTemplate, OptimizerSettings, StageKind, TemplateVars, ToolConfig,
};

#[derive(Debug)]
pub struct GeometryOptimizer {
    chain: FallbackChain<CommandTemplate>,
    settings: OptimizerSettings,
    diagnostic_limit: usize,
}

impl GeometryOptimizer {
    pub fn new(tool: &ToolConfig, settings: &OptimizerSettings, diagnostic_limit: usize) -> Self {
        Self {
            chain: FallbackChain::new(tool.variants()),
            settings: settings.clone(),
            diagnostic_limit,
        }
    }
}

#[async_trait]
impl Adapter for GeometryOptimizer {
    fn stage(&self) -> StageKind {
        StageKind::Optimize
    }

    async fn invoke(
        &self,
        workspace: &Workspace,
        invocation: &Invocation<'_>,
    ) -> Result<AdapterOutput, AdapterError> {
        let molecule = invocation.require_molecule(StageKind::Optimize)?;
        let input = Artifacts::converted(molecule);
        let staged = format!("{}.opt.mol2", molecule.token());

        if !workspace.is_ready(&input) {
            return Err(AdapterError::Optimization(Failure::new(
                FailureCause::MissingInput(input),
                "",
            )));
        }

        let vars = TemplateVars::new()
            .with("input", &input)
            .with("output", &staged)
            .with("basename", molecule.token())
            .with("force_field", &self.settings.force_field)
            .with("steps", self.settings.steps)
            .with("dielectric", self.settings.dielectric)
            .with_path("workspace", workspace.root());
        let staged_path = workspace.path(&staged);

        let result = self
            .chain
            .run(|command| {
                let vars = &vars;
                let staged_path = &staged_path;
                async move {
                    let _ = std::fs::remove_file(staged_path);
                    let report =
                        run_command(&command, vars, workspace.root(), self.diagnostic_limit)
                            .await?;
                    check_output(staged_path).map_err(|f| with_report(f, &report))?;
                    Ok(report)
                }
            })
            .await;

        let report = match result {
            Ok((_, report)) => report,
            Err(failure) => {
                let _ = std::fs::remove_file(&staged_path);
                return Err(AdapterError::Optimization(failure));
            }
        };

        let input_path = workspace.path(&input);
        if let Err(e) = std::fs::rename(&staged_path, &input_path) {
            let _ = std::fs::remove_file(&staged_path);
            return Err(AdapterError::Optimization(Failure::io(
                &format!("replacing {}", input),
                &e,
            )));
        }

        Ok(AdapterOutput::new(vec![input_path], report.diagnostic))
    }
}
