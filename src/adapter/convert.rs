//! Format Converter - structure file to bond-annotated mol2
//!
//! The source structure is deleted only once the converted file has been
//! verified to exist with a non-zero size.

use async_trait::async_trait;
use tracing::warn;

use super::fallback::FallbackChain;
use super::process::{check_output, run_command, with_report};
use super::{Adapter, AdapterError, AdapterOutput, Failure, FailureCause, Invocation};
use crate::engine::workspace::Workspace;
use crate::workflow::{Artifacts, CommandTemplate, StageKind, TemplateVars, ToolConfig};

#[derive(Debug)]
pub struct FormatConverter {
    chain: FallbackChain<CommandTemplate>,
    diagnostic_limit: usize,
}

impl FormatConverter {
    pub fn new(tool: &ToolConfig, diagnostic_limit: usize) -> Self {
        Self {
            chain: FallbackChain::new(tool.variants()),
            diagnostic_limit,
        }
    }
}

#[async_trait]
impl Adapter for FormatConverter {
    fn stage(&self) -> StageKind {
        StageKind::Convert
    }

    async fn invoke(
        &self,
        workspace: &Workspace,
        invocation: &Invocation<'_>,
    ) -> Result<AdapterOutput, AdapterError> {
        let molecule = invocation.require_molecule(StageKind::Convert)?;
        let input = Artifacts::structure(molecule);
        let output = Artifacts::converted(molecule);

        if !workspace.is_ready(&input) {
            return Err(AdapterError::Conversion(Failure::new(
                FailureCause::MissingInput(input),
                "",
            )));
        }

        let vars = TemplateVars::new()
            .with("input", &input)
            .with("output", &output)
            .with("basename", molecule.token())
            .with_path("workspace", workspace.root());
        let output_path = workspace.path(&output);

        let (_, report) = self
            .chain
            .run(|command| {
                let vars = &vars;
                let output_path = &output_path;
                async move {
                    // A stale file from an earlier run must not pass the output check
                    let _ = std::fs::remove_file(output_path);
                    let report =
                        run_command(&command, vars, workspace.root(), self.diagnostic_limit)
                            .await?;
                    check_output(output_path).map_err(|f| with_report(f, &report))?;
                    Ok(report)
                }
            })
            .await
            .map_err(AdapterError::Conversion)?;

        if let Err(e) = std::fs::remove_file(workspace.path(&input)) {
            warn!("Could not remove {}: {}", input, e);
        }

        Ok(AdapterOutput::new(vec![output_path], report.diagnostic))
    }
}
