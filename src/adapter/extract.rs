//! Parameter-Block Extractor - cuts a `[ section ]` out of a GROMACS topology
//!
//! The scan is a three-state machine: `Seeking` until the requested header,
//! `Capturing` until the next header or end of input, then `Done`. Only the
//! first occurrence of the section is taken. The topology is split into the
//! text before, the section itself and the text after, so the cut can be
//! undone byte-for-byte with `reinsert_section`.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use super::{Adapter, AdapterError, AdapterOutput, Failure, FailureCause, Invocation};
use crate::engine::workspace::Workspace;
use crate::workflow::{Artifacts, StageKind};

static HEADER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[\s*([^\]]*?)\s*\]").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Seeking,
    Capturing,
    Done,
}

/// A topology split around one section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSplit<'a> {
    pub before: &'a str,
    pub section: &'a str,
    pub after: &'a str,
}

impl SectionSplit<'_> {
    /// The topology with the section removed
    pub fn remainder(&self) -> String {
        format!("{}{}", self.before, self.after)
    }

    /// Byte offset in the remainder where the section was cut out
    pub fn offset(&self) -> usize {
        self.before.len()
    }
}

fn header_name(line: &str) -> Option<&str> {
    HEADER_REGEX
        .captures(line)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str())
}

/// Locate the first `[ name ]` section of `text`
pub fn split_section<'a>(text: &'a str, name: &str) -> Option<SectionSplit<'a>> {
    let mut state = ScanState::Seeking;
    let mut start = 0;
    let mut end = text.len();
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let header = header_name(line);
        match state {
            ScanState::Seeking => {
                if header.is_some_and(|h| h.eq_ignore_ascii_case(name)) {
                    start = offset;
                    state = ScanState::Capturing;
                }
            }
            ScanState::Capturing => {
                if header.is_some() {
                    end = offset;
                    state = ScanState::Done;
                }
            }
            ScanState::Done => break,
        }
        offset += line.len();
    }

    if state == ScanState::Seeking {
        return None;
    }

    Some(SectionSplit {
        before: &text[..start],
        section: &text[start..end],
        after: &text[end..],
    })
}

/// Put an extracted section back at `offset` of the stripped topology
pub fn reinsert_section(remainder: &str, section: &str, offset: usize) -> String {
    let offset = offset.min(remainder.len());
    let mut text = String::with_capacity(remainder.len() + section.len());
    text.push_str(&remainder[..offset]);
    text.push_str(section);
    text.push_str(&remainder[offset..]);
    text
}

#[derive(Debug)]
pub struct ParameterExtractor {
    section: String,
}

impl ParameterExtractor {
    pub fn new(section: impl Into<String>) -> Self {
        Self {
            section: section.into(),
        }
    }

    pub fn section(&self) -> &str {
        &self.section
    }
}

fn extraction_io(context: String, error: std::io::Error) -> AdapterError {
    AdapterError::Extraction(Failure::io(&context, &error))
}

#[async_trait]
impl Adapter for ParameterExtractor {
    fn stage(&self) -> StageKind {
        StageKind::ExtractParameters
    }

    async fn invoke(
        &self,
        workspace: &Workspace,
        invocation: &Invocation<'_>,
    ) -> Result<AdapterOutput, AdapterError> {
        let molecule = invocation.require_molecule(StageKind::ExtractParameters)?;
        let topology = Artifacts::topology(molecule);
        let parameters = Artifacts::parameters(molecule);
        let topology_path = workspace.path(&topology);
        let parameters_path = workspace.path(&parameters);

        let text = std::fs::read_to_string(&topology_path)
            .map_err(|e| extraction_io(format!("reading {}", topology), e))?;

        let Some(split) = split_section(&text, &self.section) else {
            // Already cut by an earlier run
            if workspace.is_ready(&parameters) {
                invocation.log.note(&format!(
                    "[ {} ] already extracted into {}",
                    self.section, parameters
                ));
                return Ok(AdapterOutput::new(
                    vec![topology_path, parameters_path],
                    "already extracted",
                ));
            }
            return Err(AdapterError::Extraction(Failure::new(
                FailureCause::MissingSection(self.section.clone()),
                topology,
            )));
        };

        std::fs::write(&parameters_path, split.section)
            .map_err(|e| extraction_io(format!("writing {}", parameters), e))?;

        let staged = workspace.path(&format!("{}.tmp", topology));
        std::fs::write(&staged, split.remainder())
            .and_then(|_| std::fs::rename(&staged, &topology_path))
            .map_err(|e| {
                let _ = std::fs::remove_file(&staged);
                extraction_io(format!("rewriting {}", topology), e)
            })?;

        Ok(AdapterOutput::new(
            vec![topology_path, parameters_path],
            format!(
                "[ {} ] ({} bytes) moved to {} at offset {}",
                self.section,
                split.section.len(),
                parameters,
                split.offset()
            ),
        ))
    }
}
