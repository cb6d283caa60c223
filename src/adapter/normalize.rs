//! Residue Normalizer - rewrites the residue name of every mol2 atom record
//!
//! Inside the `@<TRIPOS>ATOM` section, any record with at least nine
//! whitespace-separated fields has its second-to-last field (the residue
//! name) replaced by the label, and its fields rejoined with two spaces.
//! Every other line is kept byte-for-byte.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use super::{Adapter, AdapterError, AdapterOutput, Failure, FailureCause, Invocation};
use crate::engine::workspace::Workspace;
use crate::workflow::{Artifacts, StageKind};

const ATOM_SECTION: &str = "@<TRIPOS>ATOM";
const SECTION_PREFIX: &str = "@<TRIPOS>";
const MIN_ATOM_FIELDS: usize = 9;

/// Replace the residue name of every atom record with `label`
///
/// Fails when the text has no atom section or no atom record carries a
/// residue field.
pub fn rename_residues(text: &str, label: &str) -> Result<String, Failure> {
    let mut output = String::with_capacity(text.len());
    let mut in_atoms = false;
    let mut seen_section = false;
    let mut renamed = 0usize;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with(SECTION_PREFIX) {
            in_atoms = trimmed == ATOM_SECTION;
            seen_section |= in_atoms;
            output.push_str(line);
            continue;
        }

        if !in_atoms {
            output.push_str(line);
            continue;
        }

        let mut fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < MIN_ATOM_FIELDS {
            output.push_str(line);
            continue;
        }
        let residue = fields.len() - 2;
        fields[residue] = label;
        output.push_str(&fields.join("  "));
        output.push('\n');
        renamed += 1;
    }

    if !seen_section {
        return Err(Failure::new(
            FailureCause::MissingLabel,
            format!("no {} section", ATOM_SECTION),
        ));
    }
    if renamed == 0 {
        return Err(Failure::new(
            FailureCause::MissingLabel,
            format!("no atom record has {} or more fields", MIN_ATOM_FIELDS),
        ));
    }
    Ok(output)
}

/// Rewrite a mol2 file in place, going through a sibling temp file
pub fn rename_file(path: &Path, label: &str) -> Result<(), Failure> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Failure::io(&format!("reading {}", path.display()), &e))?;
    let renamed = rename_residues(&text, label)?;

    let staged = path.with_extension("mol2.tmp");
    std::fs::write(&staged, renamed)
        .and_then(|_| std::fs::rename(&staged, path))
        .map_err(|e| {
            let _ = std::fs::remove_file(&staged);
            Failure::io(&format!("writing {}", path.display()), &e)
        })
}

#[derive(Debug, Default)]
pub struct RenameSummary {
    pub renamed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Rename residues in every `.mol2` file under `root`, each labeled with
/// its own file stem
pub fn rename_tree(root: &Path) -> RenameSummary {
    let mut summary = RenameSummary::default();

    let files = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("mol2"))
                .unwrap_or(false)
        });

    for entry in files {
        let path = entry.into_path();
        let label = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        match rename_file(&path, &label) {
            Ok(()) => {
                info!("Renamed residues in {} to {}", path.display(), label);
                summary.renamed.push(path);
            }
            Err(failure) => {
                warn!("Could not rename {}: {}", path.display(), failure);
                summary.failed.push((path, failure.to_string()));
            }
        }
    }

    summary
}

/// Pipeline adapter labeling molecule A as `MOA` and molecule B as `MOB`
#[derive(Debug, Default)]
pub struct ResidueNormalizer;

impl ResidueNormalizer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Adapter for ResidueNormalizer {
    fn stage(&self) -> StageKind {
        StageKind::Normalize
    }

    async fn invoke(
        &self,
        workspace: &Workspace,
        invocation: &Invocation<'_>,
    ) -> Result<AdapterOutput, AdapterError> {
        let molecule = invocation.require_molecule(StageKind::Normalize)?;
        let name = Artifacts::converted(molecule);
        if !workspace.is_ready(&name) {
            return Err(AdapterError::Normalization(Failure::new(
                FailureCause::MissingInput(name),
                "",
            )));
        }

        let path = workspace.path(&name);
        rename_file(&path, molecule.token()).map_err(AdapterError::Normalization)?;

        Ok(AdapterOutput::new(
            vec![path],
            format!("residue name set to {}", molecule.token()),
        ))
    }
}
