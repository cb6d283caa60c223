//! Per-sample workspace directories

use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::workflow::{Artifacts, Sample, DEPLOY_MARKER};

/// The directory holding every artifact of one sample
///
/// The workspace is only created when the sample is processed, so looking
/// it up never touches the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Workspace for `sample` under the run's working directory
    pub fn for_sample(workdir: &Path, sample: &Sample) -> Self {
        Self::new(workdir.join(&sample.key))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of an artifact inside this workspace
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Create the workspace directory if it does not exist yet
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    /// Whether the artifact exists as a non-empty regular file
    pub fn is_ready(&self, name: &str) -> bool {
        std::fs::metadata(self.path(name))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Names from `names` that are missing or empty
    pub fn missing<'a>(&self, names: &'a [String]) -> Vec<&'a str> {
        names
            .iter()
            .filter(|n| !self.is_ready(n))
            .map(|n| n.as_str())
            .collect()
    }

    /// Whether every per-molecule final artifact already exists
    pub fn has_final_artifacts(&self) -> bool {
        self.missing(&Artifacts::final_set()).is_empty()
    }

    /// Whether the template tree was deployed after the last full run
    pub fn is_deployed(&self) -> bool {
        self.path(DEPLOY_MARKER).is_file()
    }

    /// Final artifacts present and the template deployed
    pub fn is_complete(&self) -> bool {
        self.has_final_artifacts() && self.is_deployed()
    }

    /// Record a successful deployment, one workspace-relative path per line
    pub fn mark_deployed(&self, deployed: &[PathBuf]) -> io::Result<()> {
        let mut manifest = String::new();
        for path in deployed {
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            manifest.push_str(&relative.to_string_lossy());
            manifest.push('\n');
        }
        std::fs::write(self.path(DEPLOY_MARKER), manifest)
    }

    pub fn clear_deployed(&self) -> io::Result<()> {
        match std::fs::remove_file(self.path(DEPLOY_MARKER)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Whether this workspace and `dir` contain one another
    pub fn overlaps(&self, dir: &Path) -> bool {
        paths_overlap(&self.root, dir)
    }
}

/// Absolute form of `path` with `.`/`..` removed and symlinks in its
/// existing prefix resolved; the path itself need not exist
pub fn resolve_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut lexical = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                lexical.pop();
            }
            other => lexical.push(other.as_os_str()),
        }
    }

    let mut existing = lexical.as_path();
    let mut tail: Vec<OsString> = Vec::new();
    loop {
        if let Ok(mut resolved) = std::fs::canonicalize(existing) {
            resolved.extend(tail.iter().rev());
            return resolved;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return lexical,
        }
    }
}

/// Whether either path is equal to or below the other
pub fn paths_overlap(a: &Path, b: &Path) -> bool {
    let a = resolve_path(a);
    let b = resolve_path(b);
    a.starts_with(&b) || b.starts_with(&a)
}
