//! External process invocation
//!
//! Every external tool runs through `run_command`: arguments are rendered
//! from `${{ }}` templates, the process starts in an explicit working
//! directory, and it is killed when its timeout elapses. Output is captured
//! and trimmed to the diagnostic budget.
//!
//! On unix each command leads its own process group. Wrappers such as
//! `conda run` start the real tool as a grandchild, so a timeout or an
//! aborted run kills the whole group rather than only the direct child.

use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{bounded, Failure, FailureCause};
use crate::workflow::{evaluate_args, CommandTemplate, TemplateVars};

/// Captured result of a process that exited successfully
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub command_line: String,
    pub diagnostic: String,
}

/// Run one command template to completion
///
/// Success means exit status 0; declared outputs are checked by the caller.
pub async fn run_command(
    template: &CommandTemplate,
    vars: &TemplateVars,
    working_dir: &Path,
    diagnostic_limit: usize,
) -> Result<ProcessReport, Failure> {
    let args = evaluate_args(&template.args, vars)
        .map_err(|e| Failure::new(FailureCause::InvalidInput, e.to_string()))?;
    let command_line = render_command_line(&template.program, &args);
    let timeout = Duration::from_millis(template.timeout);

    debug!("Executing in {}: {}", working_dir.display(), command_line);

    let mut cmd = Command::new(&template.program);
    cmd.args(&args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn().map_err(|e| {
        Failure::new(
            FailureCause::Spawn,
            format!("{}: {}", command_line, e),
        )
    })?;
    let group = child.id().map(ProcessGroup::track);

    // Dropping the wait future on timeout kills the child; dropping the
    // unfinished group guard kills everything it started
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(Failure::new(
                FailureCause::Io,
                format!("{}: {}", command_line, e),
            ))
        }
        Err(_) => {
            return Err(Failure::new(
                FailureCause::Timeout(timeout),
                format!("$ {}", command_line),
            ))
        }
    };

    if let Some(group) = group {
        group.finish();
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let diagnostic = bounded(
        &format_streams(&command_line, &stdout, &stderr),
        diagnostic_limit,
    );

    if output.status.success() {
        Ok(ProcessReport {
            command_line,
            diagnostic,
        })
    } else {
        Err(Failure::new(
            FailureCause::ExitStatus(output.status.code()),
            diagnostic,
        ))
    }
}

/// Process groups of commands that are still running
static RUNNING_GROUPS: LazyLock<Mutex<HashSet<u32>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

/// Kills the process group led by `pid` unless the leader exited normally
struct ProcessGroup {
    pid: u32,
    finished: bool,
}

impl ProcessGroup {
    fn track(pid: u32) -> Self {
        if let Ok(mut running) = RUNNING_GROUPS.lock() {
            running.insert(pid);
        }
        Self {
            pid,
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Ok(mut running) = RUNNING_GROUPS.lock() {
            running.remove(&self.pid);
        }
        if !self.finished {
            kill_group(self.pid);
        }
    }
}

/// Kill every process group still running, for an immediate shutdown
pub fn kill_running_groups() {
    let groups: Vec<u32> = match RUNNING_GROUPS.lock() {
        Ok(running) => running.iter().copied().collect(),
        Err(_) => return,
    };
    for pid in groups {
        kill_group(pid);
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    let status = std::process::Command::new("kill")
        .args(["-KILL", "--", &format!("-{}", pid)])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => debug!("Killed process group {}", pid),
        Ok(_) => debug!("Process group {} already gone", pid),
        Err(e) => warn!("Could not kill process group {}: {}", pid, e),
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

/// Require `path` to exist as a non-empty file after a process ran
pub fn check_output(path: &Path) -> Result<(), Failure> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        Ok(_) => Err(Failure::new(FailureCause::EmptyOutput(name), "")),
        Err(_) => Err(Failure::new(FailureCause::MissingOutput(name), "")),
    }
}

/// Attach the process output to a failed output check
pub(crate) fn with_report(mut failure: Failure, report: &ProcessReport) -> Failure {
    if failure.diagnostic.is_empty() {
        failure.diagnostic = report.diagnostic.clone();
    }
    failure
}

fn render_command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(|a| a.as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_streams(command_line: &str, stdout: &str, stderr: &str) -> String {
    let mut text = format!("$ {}", command_line);
    if !stdout.trim().is_empty() {
        text.push_str("\n[stdout]\n");
        text.push_str(stdout.trim());
    }
    if !stderr.trim().is_empty() {
        text.push_str("\n[stderr]\n");
        text.push_str(stderr.trim());
    }
    text
}
