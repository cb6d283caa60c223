//! Template Deployer - copies the simulation template tree into a workspace
//!
//! Files with the same relative path are overwritten. A target inside the
//! template tree (or containing it) is refused. Whether a failure here fails
//! the sample is decided by the pipeline's deploy policy.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{Adapter, AdapterError, AdapterOutput, Failure, FailureCause, Invocation};
use crate::engine::workspace::{paths_overlap, Workspace};
use crate::workflow::StageKind;

#[derive(Debug)]
pub struct TemplateDeployer {
    template_dir: PathBuf,
}

fn deployment(cause: FailureCause, diagnostic: impl Into<String>) -> AdapterError {
    AdapterError::Deployment(Failure::new(cause, diagnostic))
}

impl TemplateDeployer {
    pub fn new(template_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_dir: template_dir.into(),
        }
    }

    pub fn template_dir(&self) -> &Path {
        &self.template_dir
    }

    /// Copy every file of the template tree below `target`
    pub fn deploy_into(&self, target: &Path) -> Result<Vec<PathBuf>, AdapterError> {
        if !self.template_dir.is_dir() {
            return Err(deployment(
                FailureCause::MissingInput(self.template_dir.display().to_string()),
                "template directory not found",
            ));
        }
        if paths_overlap(target, &self.template_dir) {
            return Err(deployment(
                FailureCause::InvalidInput,
                format!(
                    "target {} overlaps the template directory {}",
                    target.display(),
                    self.template_dir.display()
                ),
            ));
        }

        let mut copied = Vec::new();
        for entry in WalkDir::new(&self.template_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| deployment(FailureCause::Io, e.to_string()))?;
            let relative = entry
                .path()
                .strip_prefix(&self.template_dir)
                .map_err(|e| deployment(FailureCause::Io, e.to_string()))?;
            if relative.as_os_str().is_empty() {
                continue;
            }

            let destination = target.join(relative);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&destination).map_err(|e| {
                    AdapterError::Deployment(Failure::io(
                        &format!("creating {}", destination.display()),
                        &e,
                    ))
                })?;
                continue;
            }

            let expected = entry
                .metadata()
                .map_err(|e| deployment(FailureCause::Io, e.to_string()))?
                .len();
            let written = std::fs::copy(entry.path(), &destination).map_err(|e| {
                AdapterError::Deployment(Failure::io(
                    &format!("copying {}", relative.display()),
                    &e,
                ))
            })?;
            if written != expected {
                return Err(deployment(
                    FailureCause::Io,
                    format!(
                        "{} copied {} of {} bytes",
                        relative.display(),
                        written,
                        expected
                    ),
                ));
            }
            copied.push(destination);
        }

        Ok(copied)
    }
}

#[async_trait]
impl Adapter for TemplateDeployer {
    fn stage(&self) -> StageKind {
        StageKind::Deploy
    }

    fn reserved_paths(&self) -> Vec<PathBuf> {
        vec![self.template_dir.clone()]
    }

    async fn invoke(
        &self,
        workspace: &Workspace,
        _invocation: &Invocation<'_>,
    ) -> Result<AdapterOutput, AdapterError> {
        let copied = self.deploy_into(workspace.root())?;
        let diagnostic = format!(
            "{} template files copied from {}",
            copied.len(),
            self.template_dir.display()
        );
        Ok(AdapterOutput::new(copied, diagnostic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::run_log::SampleLog;
    use crate::workflow::Sample;

    fn template() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("em.mdp"), "integrator = steep\n").unwrap();
        std::fs::write(dir.path().join("run.sh"), "#!/bin/sh\n").unwrap();
        std::fs::create_dir(dir.path().join("amber14sb.ff")).unwrap();
        std::fs::write(dir.path().join("amber14sb.ff/tip3p.itp"), "[ moleculetype ]\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_copies_tree_and_overwrites() {
        let source = template();
        let target = tempfile::tempdir().unwrap();
        let ws = Workspace::new(target.path());
        std::fs::write(ws.path("em.mdp"), "old").unwrap();
        std::fs::write(ws.path("MOA_GMX.itp"), "keep").unwrap();

        let sample = Sample::new("1", 3715, 2179);
        let log = SampleLog::discard();
        let inv = Invocation::new(&sample, None, &log);
        let output = TemplateDeployer::new(source.path())
            .invoke(&ws, &inv)
            .await
            .unwrap();

        assert_eq!(output.paths.len(), 3);
        assert_eq!(
            std::fs::read_to_string(ws.path("em.mdp")).unwrap(),
            "integrator = steep\n"
        );
        assert!(ws.is_ready("amber14sb.ff/tip3p.itp"));
        assert_eq!(std::fs::read_to_string(ws.path("MOA_GMX.itp")).unwrap(), "keep");
    }

    #[tokio::test]
    async fn test_missing_template_dir() {
        let target = tempfile::tempdir().unwrap();
        let ws = Workspace::new(target.path());
        let sample = Sample::new("1", 3715, 2179);
        let log = SampleLog::discard();
        let inv = Invocation::new(&sample, None, &log);

        let err = TemplateDeployer::new(target.path().join("File"))
            .invoke(&ws, &inv)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Deployment(_)));
        assert!(matches!(err.cause(), FailureCause::MissingInput(_)));
    }

    #[test]
    fn test_refuses_target_overlapping_template() {
        let source = template();
        let deployer = TemplateDeployer::new(source.path());

        for target in [
            source.path().to_path_buf(),
            source.path().join("amber14sb.ff"),
            source.path().join("amber14sb.ff/.."),
        ] {
            let err = deployer.deploy_into(&target).unwrap_err();
            assert!(matches!(err.cause(), FailureCause::InvalidInput), "{}", target.display());
        }
        let err = TemplateDeployer::new(source.path().join("amber14sb.ff"))
            .deploy_into(source.path())
            .unwrap_err();
        assert!(matches!(err.cause(), FailureCause::InvalidInput));

        assert_eq!(
            std::fs::read_to_string(source.path().join("em.mdp")).unwrap(),
            "integrator = steep\n"
        );
        assert_eq!(
            std::fs::read_to_string(source.path().join("amber14sb.ff/tip3p.itp")).unwrap(),
            "[ moleculetype ]\n"
        );
        assert!(!source.path().join("amber14sb.ff/em.mdp").exists());
    }
}
