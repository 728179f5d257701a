//! Raw metadata rows from input files: per-file accessions, per-sequence
//! FASTA headers, or a user supplied 5-column table.

use std::io::BufRead;

use camino::{Utf8Path, Utf8PathBuf};
use noodles::fasta;
use regex::Regex;
use tracing::debug;

use crate::domain::InputTarget;
use crate::error::KiraError;
use crate::fs_util;
use crate::table::RawRecord;

const ASSEMBLY_ACCESSION: &str = r"GC[AF]_\d+\.\d+";

/// Extracts GenBank/RefSeq assembly accessions from file names.
#[derive(Debug, Clone)]
pub struct AccessionParser {
    assembly: Regex,
}

impl AccessionParser {
    pub fn new() -> Result<Self, KiraError> {
        Ok(Self {
            assembly: Regex::new(ASSEMBLY_ACCESSION)?,
        })
    }

    pub fn assembly_accession(&self, name: &str) -> Option<String> {
        self.assembly.find(name).map(|m| m.as_str().to_string())
    }

    /// One row per file: target is the file name, specialization the
    /// assembly accession found in it, if any.
    pub fn parse_files(&self, files: &[Utf8PathBuf]) -> Vec<RawRecord> {
        files
            .iter()
            .map(|file| {
                let name = fs_util::basename(file.as_str());
                RawRecord {
                    file: Some(file.to_string()),
                    specialization: self.assembly_accession(&name),
                    target: Some(name),
                    ..RawRecord::default()
                }
            })
            .collect()
    }
}

/// One row per FASTA header across `files`. Target and sequence are the
/// first word of the header.
pub fn parse_sequences(files: &[Utf8PathBuf]) -> Result<Vec<RawRecord>, KiraError> {
    let mut rows = Vec::new();
    for file in files {
        let before = rows.len();
        read_headers(fs_util::open_text(file)?, file, &mut rows)?;
        debug!(file = %file, sequences = rows.len() - before, "parsed sequence headers");
    }
    Ok(rows)
}

fn read_headers<R: BufRead>(
    reader: R,
    file: &Utf8Path,
    rows: &mut Vec<RawRecord>,
) -> Result<(), KiraError> {
    let parse_error = |err: std::io::Error| KiraError::InputFileParse {
        path: file.to_path_buf(),
        message: err.to_string(),
    };
    let mut reader = fasta::io::Reader::new(reader);
    let mut definition = String::new();
    let mut sequence = Vec::new();
    loop {
        definition.clear();
        if reader.read_definition(&mut definition).map_err(parse_error)? == 0 {
            break;
        }
        sequence.clear();
        reader.read_sequence(&mut sequence).map_err(parse_error)?;

        // a header without a name still yields a row, pruned later
        let accession = definition
            .strip_prefix('>')
            .and_then(|header| header.split_whitespace().next())
            .map(str::to_string);
        rows.push(RawRecord {
            file: Some(file.to_string()),
            target: accession.clone(),
            sequence: accession,
            ..RawRecord::default()
        });
    }
    Ok(())
}

/// Reads a tab-separated `file, target, node, specialization,
/// specialization_name` table without header. Empty cells are missing
/// values. When no row has a target and targets are files, the file name
/// is used.
pub fn parse_input_file(
    path: &Utf8Path,
    input_target: InputTarget,
) -> Result<Vec<RawRecord>, KiraError> {
    let reader = fs_util::open_text(path)?;
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|err| KiraError::InputFileParse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t').map(cell);
        rows.push(RawRecord {
            file: fields.next().flatten(),
            target: fields.next().flatten(),
            node: fields.next().flatten(),
            specialization: fields.next().flatten(),
            specialization_name: fields.next().flatten(),
            sequence: None,
        });
    }

    if input_target == InputTarget::File && rows.iter().all(|row| row.target.is_none()) {
        for row in rows.iter_mut() {
            row.target = row.file.as_deref().map(fs_util::basename);
        }
    }
    debug!(path = %path, rows = rows.len(), "parsed input file");
    Ok(rows)
}

fn cell(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
