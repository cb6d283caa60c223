//! Topology Generator - force-field parameterization of the optimized structure
//!
//! The parameterization tool writes into a scratch directory named after the
//! base name (`MOA.acpype/`). The coordinate and topology files are copied to
//! the workspace root and the scratch directory is removed whether the call
//! succeeded or not. Outputs of an earlier topology, including the parameter
//! file extracted from it, are removed before the tool runs.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::fallback::FallbackChain;
use super::process::{check_output, run_command, with_report};
use super::{Adapter, AdapterError, AdapterOutput, Failure, FailureCause, Invocation};
use crate::engine::workspace::Workspace;
use crate::workflow::{
    Artifacts, CommandTemplate, ParameterizationSettings, StageKind, TemplateVars, ToolConfig,
};

/// Removes the scratch directory when dropped
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Take ownership of `path`, clearing anything a previous run left there
    fn claim(path: PathBuf) -> Self {
        let scratch = Self { path };
        scratch.clear();
        scratch
    }

    fn clear(&self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!("Could not remove scratch directory {}: {}", self.path.display(), e);
            }
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        self.clear();
    }
}

fn remove_stale(path: &Path) -> Result<(), AdapterError> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(AdapterError::Topology(
            Failure::io(&format!("removing stale {}", path.display()), &e),
        )),
        _ => Ok(()),
    }
}

#[derive(Debug)]
pub struct TopologyGenerator {
    chain: FallbackChain<CommandTemplate>,
    settings: ParameterizationSettings,
    diagnostic_limit: usize,
}

impl TopologyGenerator {
    pub fn new(
        tool: &ToolConfig,
        settings: &ParameterizationSettings,
        diagnostic_limit: usize,
    ) -> Self {
        Self {
            chain: FallbackChain::new(tool.variants()),
            settings: settings.clone(),
            diagnostic_limit,
        }
    }
}

#[async_trait]
impl Adapter for TopologyGenerator {
    fn stage(&self) -> StageKind {
        StageKind::GenerateTopology
    }

    async fn invoke(
        &self,
        workspace: &Workspace,
        invocation: &Invocation<'_>,
    ) -> Result<AdapterOutput, AdapterError> {
        let molecule = invocation.require_molecule(StageKind::GenerateTopology)?;
        let input = Artifacts::converted(molecule);
        if !workspace.is_ready(&input) {
            return Err(AdapterError::Topology(Failure::new(
                FailureCause::MissingInput(input),
                "",
            )));
        }

        let vars = TemplateVars::new()
            .with("input", &input)
            .with("basename", molecule.token())
            .with("charge_method", &self.settings.charge_method)
            .with("force_field", &self.settings.force_field)
            .with("net_charge", self.settings.net_charge)
            .with_path("workspace", workspace.root());

        let scratch = ScratchDir::claim(workspace.path(&Artifacts::scratch_dir(molecule)));
        let produced = [Artifacts::coordinates(molecule), Artifacts::topology(molecule)];
        for name in produced.iter().chain([&Artifacts::parameters(molecule)]) {
            remove_stale(&workspace.path(name))?;
        }

        let (_, report) = self
            .chain
            .run(|command| {
                let vars = &vars;
                let scratch = &scratch;
                let produced = &produced;
                async move {
                    scratch.clear();
                    let report =
                        run_command(&command, vars, workspace.root(), self.diagnostic_limit)
                            .await?;
                    for name in produced {
                        check_output(&scratch.path().join(name))
                            .map_err(|f| with_report(f, &report))?;
                    }
                    Ok(report)
                }
            })
            .await
            .map_err(AdapterError::Topology)?;

        let mut paths = Vec::with_capacity(produced.len());
        for name in &produced {
            let target = workspace.path(name);
            std::fs::copy(scratch.path().join(name), &target).map_err(|e| {
                AdapterError::Topology(Failure::io(&format!("copying {}", name), &e))
            })?;
            paths.push(target);
        }

        drop(scratch);
        Ok(AdapterOutput::new(paths, report.diagnostic))
    }
}
