//! Stage and artifact definitions
//!
//! The pipeline is a fixed, ordered list of stages. Each stage declares the
//! artifacts it needs before it runs and the artifacts it must leave behind.

use std::fmt;

use serde::Serialize;

use super::sample::Molecule;

/// Name of the per-sample log written inside each workspace
pub const SAMPLE_LOG: &str = "pipeline.log";

/// Written after a successful Deploy; lists the deployed files
pub const DEPLOY_MARKER: &str = ".pairprep_deployed";

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum StageKind {
    Fetch,
    Convert,
    Optimize,
    Normalize,
    GenerateTopology,
    ExtractParameters,
    Deploy,
}

impl StageKind {
    pub const ALL: [StageKind; 7] = [
        StageKind::Fetch,
        StageKind::Convert,
        StageKind::Optimize,
        StageKind::Normalize,
        StageKind::GenerateTopology,
        StageKind::ExtractParameters,
        StageKind::Deploy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Fetch => "Fetch",
            StageKind::Convert => "Convert",
            StageKind::Optimize => "Optimize",
            StageKind::Normalize => "Normalize",
            StageKind::GenerateTopology => "GenerateTopology",
            StageKind::ExtractParameters => "ExtractParameters",
            StageKind::Deploy => "Deploy",
        }
    }

    /// Whether the stage runs once per molecule or once per sample
    pub fn per_molecule(&self) -> bool {
        !matches!(self, StageKind::Deploy)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// File names of every artifact produced for one molecule
pub struct Artifacts;

impl Artifacts {
    pub fn structure(molecule: Molecule) -> String {
        format!("{}.sdf", molecule.token())
    }

    pub fn converted(molecule: Molecule) -> String {
        format!("{}.mol2", molecule.token())
    }

    pub fn coordinates(molecule: Molecule) -> String {
        format!("{}_GMX.gro", molecule.token())
    }

    pub fn topology(molecule: Molecule) -> String {
        format!("{}_GMX.itp", molecule.token())
    }

    pub fn parameters(molecule: Molecule) -> String {
        format!("{}_GMX_prm.itp", molecule.token())
    }

    /// Scratch directory created by the topology tool
    pub fn scratch_dir(molecule: Molecule) -> String {
        format!("{}.acpype", molecule.token())
    }

    /// Artifacts whose presence marks a sample as complete
    pub fn final_set() -> Vec<String> {
        Molecule::BOTH
            .iter()
            .flat_map(|&m| [Self::coordinates(m), Self::topology(m), Self::parameters(m)])
            .collect()
    }
}

/// A stage with its declared inputs and outputs for one molecule
///
/// Deploy outputs depend on the template tree and are checked by the
/// deployer itself, so its declared lists are empty.
#[derive(Debug, Clone)]
pub struct Stage {
    pub kind: StageKind,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl Stage {
    pub fn for_molecule(kind: StageKind, molecule: Molecule) -> Self {
        let (inputs, outputs) = match kind {
            StageKind::Fetch => (vec![], vec![Artifacts::structure(molecule)]),
            StageKind::Convert => (
                vec![Artifacts::structure(molecule)],
                vec![Artifacts::converted(molecule)],
            ),
            StageKind::Optimize | StageKind::Normalize => (
                vec![Artifacts::converted(molecule)],
                vec![Artifacts::converted(molecule)],
            ),
            StageKind::GenerateTopology => (
                vec![Artifacts::converted(molecule)],
                vec![Artifacts::coordinates(molecule), Artifacts::topology(molecule)],
            ),
            StageKind::ExtractParameters => (
                vec![Artifacts::topology(molecule)],
                vec![Artifacts::topology(molecule), Artifacts::parameters(molecule)],
            ),
            StageKind::Deploy => (vec![], vec![]),
        };

        Self {
            kind,
            inputs,
            outputs,
        }
    }
}
