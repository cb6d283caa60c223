//! Run and sample log files
//!
//! Both logs are plain text, one timestamped record per line, flushed after
//! every record so a crash never loses what was already written. The run
//! log also forwards each record to `tracing` for the console.

use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info, warn};

use super::workspace::Workspace;
use crate::workflow::{Molecule, StageKind, SAMPLE_LOG};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

fn format_record(level: Level, message: &str) -> String {
    format!(
        "{} - {} - {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        level.as_str(),
        message
    )
}

fn append(file: &Mutex<File>, record: &str) -> io::Result<()> {
    let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    file.write_all(record.as_bytes())?;
    file.flush()
}

/// The batch-wide log, created once per run under the log directory
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    file: Mutex<File>,
    run_id: String,
    started_at: DateTime<Local>,
}

impl RunLog {
    /// Create `pairprep_<timestamp>.log` inside `log_dir`
    pub fn create(log_dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let started_at = Local::now();
        let path = log_dir.join(format!("pairprep_{}.log", started_at.format("%Y%m%d_%H%M%S")));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// A file next to the run log sharing its timestamp, e.g. `errors_<timestamp>.txt`
    pub fn sibling(&self, prefix: &str, extension: &str) -> PathBuf {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        dir.join(format!(
            "{}_{}.{}",
            prefix,
            self.started_at.format("%Y%m%d_%H%M%S"),
            extension
        ))
    }

    pub fn info(&self, message: &str) {
        info!(run_id = %self.run_id, "{}", message);
        self.record(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        warn!(run_id = %self.run_id, "{}", message);
        self.record(Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        error!(run_id = %self.run_id, "{}", message);
        self.record(Level::Error, message);
    }

    fn record(&self, level: Level, message: &str) {
        if let Err(e) = append(&self.file, &format_record(level, message)) {
            warn!("Could not write run log {}: {}", self.path.display(), e);
        }
    }

    /// Flush and sync the log to disk
    pub fn close(self) -> io::Result<()> {
        let file = self.file.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        file.sync_all()
    }
}

/// The log inside one sample workspace
#[derive(Debug)]
pub struct SampleLog {
    path: Option<PathBuf>,
    file: Option<Mutex<File>>,
}

impl SampleLog {
    /// Open (appending) the sample log of `workspace`
    pub fn open(workspace: &Workspace) -> io::Result<Self> {
        let path = workspace.path(SAMPLE_LOG);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path: Some(path),
            file: Some(Mutex::new(file)),
        })
    }

    /// A log that drops every record
    pub fn discard() -> Self {
        Self {
            path: None,
            file: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn note(&self, message: &str) {
        self.record(Level::Info, message);
    }

    pub fn warning(&self, message: &str) {
        self.record(Level::Warn, message);
    }

    pub fn stage_started(&self, stage: StageKind, molecule: Option<Molecule>) {
        self.record(Level::Info, &format!("{} started", stage_label(stage, molecule)));
    }

    pub fn stage_finished(
        &self,
        stage: StageKind,
        molecule: Option<Molecule>,
        elapsed: Duration,
        diagnostic: &str,
    ) {
        let mut message = format!(
            "{} finished in {:.2}s",
            stage_label(stage, molecule),
            elapsed.as_secs_f64()
        );
        if !diagnostic.is_empty() {
            message.push('\n');
            message.push_str(diagnostic);
        }
        self.record(Level::Info, &message);
    }

    pub fn stage_failed(
        &self,
        stage: StageKind,
        molecule: Option<Molecule>,
        elapsed: Duration,
        reason: &str,
    ) {
        self.record(
            Level::Error,
            &format!(
                "{} failed after {:.2}s: {}",
                stage_label(stage, molecule),
                elapsed.as_secs_f64(),
                reason
            ),
        );
    }

    fn record(&self, level: Level, message: &str) {
        let Some(file) = &self.file else {
            return;
        };
        if let Err(e) = append(file, &format_record(level, message)) {
            if let Some(path) = &self.path {
                warn!("Could not write sample log {}: {}", path.display(), e);
            }
        }
    }
}

pub(crate) fn stage_label(stage: StageKind, molecule: Option<Molecule>) -> String {
    match molecule {
        Some(m) => format!("{} [{}]", stage, m.token()),
        None => stage.to_string(),
    }
}
