//! Sample manifest loading.
//!
//! The manifest is a tab-separated table with a header row naming at least the columns
//! `sample`, `fq1` and `fq2`:
//!
//! ```text
//! sample	fq1	fq2
//! ctrl_1	reads/ctrl_1_R1.fastq.gz	reads/ctrl_1_R2.fastq.gz
//! ```
//!
//! Columns may appear in any order and extra columns are ignored. Blank lines and lines
//! starting with `#` are skipped. Read paths are kept as written, so relative paths resolve
//! against the working directory, like the `samples_tsv` and `outdir` config entries.

use crate::constants::{MANIFEST_FQ1_COLUMN, MANIFEST_FQ2_COLUMN, MANIFEST_SAMPLE_COLUMN};
use crate::{QcError, QcResult};
use seqqc_types::SampleId;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// One paired-end sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub id: SampleId,
    pub fq1: PathBuf,
    pub fq2: PathBuf,
}

/// Loads the manifest at `path` and checks that every referenced read file exists.
///
/// # Errors
///
/// - `QcError::Io` if the manifest cannot be read
/// - `QcError::MalformedManifest` for header, row, identifier or duplicate problems
/// - `QcError::MissingInputFile` for the first read path that is not an existing file
pub fn load_manifest(path: &Path) -> QcResult<Vec<Sample>> {
    let text = std::fs::read_to_string(path).map_err(|e| QcError::io(path, e))?;
    let samples = parse_manifest(&text, path)?;
    validate_inputs(&samples)?;
    Ok(samples)
}

/// Parses manifest text without touching the filesystem.
///
/// `source` is only used in error messages.
pub fn parse_manifest(text: &str, source: &Path) -> QcResult<Vec<Sample>> {
    let malformed = |line: Option<usize>, reason: String| QcError::MalformedManifest {
        path: source.to_path_buf(),
        line,
        reason,
    };

    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim_end_matches('\r')))
        .filter(|(_, line)| !line.trim().is_empty() && !line.starts_with('#'));

    let (header_line, header) = lines
        .next()
        .ok_or_else(|| malformed(None, "manifest is empty".into()))?;
    let columns: Vec<&str> = header.split('\t').map(str::trim).collect();

    let column_index = |name: &str| columns.iter().position(|c| *c == name);
    let (Some(sample_col), Some(fq1_col), Some(fq2_col)) = (
        column_index(MANIFEST_SAMPLE_COLUMN),
        column_index(MANIFEST_FQ1_COLUMN),
        column_index(MANIFEST_FQ2_COLUMN),
    ) else {
        return Err(malformed(
            Some(header_line),
            format!(
                "header must contain tab-separated columns {MANIFEST_SAMPLE_COLUMN}, {MANIFEST_FQ1_COLUMN}, {MANIFEST_FQ2_COLUMN}; got: {}",
                columns.join(", ")
            ),
        ));
    };

    let mut samples = Vec::new();
    let mut seen = HashSet::new();

    for (line_no, line) in lines {
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if fields.len() != columns.len() {
            return Err(malformed(
                Some(line_no),
                format!(
                    "expected {} tab-separated fields, found {}",
                    columns.len(),
                    fields.len()
                ),
            ));
        }

        let (name, fq1, fq2) = (fields[sample_col], fields[fq1_col], fields[fq2_col]);
        if name.is_empty() || fq1.is_empty() || fq2.is_empty() {
            return Err(malformed(
                Some(line_no),
                "sample, fq1 and fq2 must all be non-empty".into(),
            ));
        }

        let id = SampleId::parse(name).map_err(|e| malformed(Some(line_no), e.to_string()))?;
        if !seen.insert(id.clone()) {
            return Err(malformed(
                Some(line_no),
                format!("duplicate sample identifier '{id}'"),
            ));
        }

        samples.push(Sample {
            id,
            fq1: PathBuf::from(fq1),
            fq2: PathBuf::from(fq2),
        });
    }

    Ok(samples)
}

/// Checks that both read files of every sample exist and are regular files.
pub fn validate_inputs(samples: &[Sample]) -> QcResult<()> {
    for sample in samples {
        for path in [&sample.fq1, &sample.fq2] {
            if !path.is_file() {
                return Err(QcError::MissingInputFile {
                    sample: sample.id.to_string(),
                    path: path.clone(),
                });
            }
        }
    }
    Ok(())
}
