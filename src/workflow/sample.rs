//! Sample registry
//!
//! Load the ordered list of samples from a CSV table with a header row:
//!
//! ```text
//! sample,CID_A,CID_B
//! 1,3715,2179
//! 2,2244,3672
//! ```
//!
//! Column names are matched case-insensitively. Every row must carry a
//! non-empty sample key and two positive integer compound identifiers.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::Serialize;

const KEY_COLUMN: &str = "sample";
const CID_A_COLUMN: &str = "CID_A";
const CID_B_COLUMN: &str = "CID_B";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("IO error reading {file}: {error}")]
    Io {
        file: String,
        error: std::io::Error,
    },

    #[error("CSV error at row {row}: {error}")]
    Csv { row: usize, error: csv::Error },

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Row {row}: missing value for '{field}'")]
    MissingField { row: usize, field: String },

    #[error("Row {row}: '{field}' must be a positive integer, got '{value}'")]
    InvalidCompoundId {
        row: usize,
        field: String,
        value: String,
    },

    #[error("Row {row}: sample key '{key}' cannot be used as a directory name")]
    InvalidKey { row: usize, key: String },

    #[error("Row {row}: duplicate sample key '{key}' (first seen at row {first_row})")]
    DuplicateKey {
        row: usize,
        key: String,
        first_row: usize,
    },
}

/// One of the two molecules in a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Molecule {
    A,
    B,
}

impl Molecule {
    pub const BOTH: [Molecule; 2] = [Molecule::A, Molecule::B];

    /// Fixed token used for file names and the residue label
    pub fn token(&self) -> &'static str {
        match self {
            Molecule::A => "MOA",
            Molecule::B => "MOB",
        }
    }
}

impl fmt::Display for Molecule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// One unit of work: a key and a pair of compound identifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub key: String,
    pub cid_a: u64,
    pub cid_b: u64,
}

impl Sample {
    pub fn new(key: impl Into<String>, cid_a: u64, cid_b: u64) -> Self {
        Self {
            key: key.into(),
            cid_a,
            cid_b,
        }
    }

    pub fn compound_id(&self, molecule: Molecule) -> u64 {
        match molecule {
            Molecule::A => self.cid_a,
            Molecule::B => self.cid_b,
        }
    }
}

pub struct SampleRegistry;

impl SampleRegistry {
    pub fn load_file(path: &Path) -> Result<Vec<Sample>, RegistryError> {
        let file = std::fs::File::open(path).map_err(|error| RegistryError::Io {
            file: path.display().to_string(),
            error,
        })?;
        Self::load(file)
    }

    /// Load samples from any CSV source, preserving row order
    pub fn load<R: Read>(source: R) -> Result<Vec<Sample>, RegistryError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);

        let headers = reader
            .headers()
            .map_err(|error| RegistryError::Csv { row: 1, error })?
            .clone();

        let key_idx = find_column(&headers, KEY_COLUMN)?;
        let a_idx = find_column(&headers, CID_A_COLUMN)?;
        let b_idx = find_column(&headers, CID_B_COLUMN)?;

        let mut samples = Vec::new();
        let mut first_rows: HashMap<String, usize> = HashMap::new();

        for (idx, record) in reader.records().enumerate() {
            // Row numbers are 1-based and count the header line
            let row = idx + 2;
            let record = record.map_err(|error| RegistryError::Csv { row, error })?;

            let key = required_field(&record, key_idx, KEY_COLUMN, row)?;
            if !is_valid_key(key) {
                return Err(RegistryError::InvalidKey {
                    row,
                    key: key.to_string(),
                });
            }

            let cid_a = parse_compound_id(&record, a_idx, CID_A_COLUMN, row)?;
            let cid_b = parse_compound_id(&record, b_idx, CID_B_COLUMN, row)?;

            if let Some(&first_row) = first_rows.get(key) {
                return Err(RegistryError::DuplicateKey {
                    row,
                    key: key.to_string(),
                    first_row,
                });
            }
            first_rows.insert(key.to_string(), row);

            samples.push(Sample::new(key, cid_a, cid_b));
        }

        Ok(samples)
    }
}

fn find_column(headers: &csv::StringRecord, name: &str) -> Result<usize, RegistryError> {
    headers
        .iter()
        .position(|h| h.trim_start_matches('\u{feff}').eq_ignore_ascii_case(name))
        .ok_or_else(|| RegistryError::MissingColumn(name.to_string()))
}

fn required_field<'r>(
    record: &'r csv::StringRecord,
    idx: usize,
    field: &str,
    row: usize,
) -> Result<&'r str, RegistryError> {
    match record.get(idx) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(RegistryError::MissingField {
            row,
            field: field.to_string(),
        }),
    }
}

fn parse_compound_id(
    record: &csv::StringRecord,
    idx: usize,
    field: &str,
    row: usize,
) -> Result<u64, RegistryError> {
    let value = required_field(record, idx, field, row)?;
    match value.parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(RegistryError::InvalidCompoundId {
            row,
            field: field.to_string(),
            value: value.to_string(),
        }),
    }
}

fn is_valid_key(key: &str) -> bool {
    key != "."
        && key != ".."
        && !key.contains(['/', '\\'])
        && !key.chars().any(|c| c.is_control())
}
