//! Per-file and per-sequence metadata from NCBI tables.
//!
//! `assembly_summary.txt` maps assembly accessions to taxids and organism
//! names; `*.accession2taxid[.gz]` maps sequence accessions to taxids.

use std::collections::{HashMap, HashSet};
use std::io::BufRead;

use camino::Utf8PathBuf;
use tracing::debug;

use crate::error::KiraError;
use crate::fs_util;

pub const ASSEMBLY_SUMMARY_URLS: [&str; 2] = [
    "https://ftp.ncbi.nlm.nih.gov/genomes/refseq/assembly_summary_refseq.txt",
    "https://ftp.ncbi.nlm.nih.gov/genomes/genbank/assembly_summary_genbank.txt",
];

pub const ACCESSION2TAXID_URLS: [&str; 1] =
    ["https://ftp.ncbi.nlm.nih.gov/pub/taxonomy/accession2taxid/nucl_gb.accession2taxid.gz"];

const COL_ACCESSION: usize = 0;
const COL_TAXID: usize = 5;
const COL_ORGANISM: usize = 7;
const COL_INFRASPECIFIC: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetInfo {
    pub node: Option<String>,
    pub specialization: Option<String>,
    pub specialization_name: Option<String>,
}

/// Reads assembly summaries keyed by assembly accession. Earlier files win
/// for accessions listed more than once.
pub fn load_assembly_summary(
    files: &[Utf8PathBuf],
) -> Result<HashMap<String, TargetInfo>, KiraError> {
    let mut info = HashMap::new();
    for file in files {
        let before = info.len();
        parse_assembly_summary(fs_util::open_text(file)?, &mut info).map_err(|err| {
            KiraError::InputFileParse {
                path: file.clone(),
                message: err.to_string(),
            }
        })?;
        debug!(file = %file, entries = info.len() - before, "parsed assembly summary");
    }
    Ok(info)
}

pub fn parse_assembly_summary(
    reader: impl BufRead,
    info: &mut HashMap<String, TargetInfo>,
) -> std::io::Result<()> {
    for line in reader.lines() {
        let line = line?;
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() <= COL_INFRASPECIFIC {
            continue;
        }
        let accession = fields[COL_ACCESSION].trim();
        if accession.is_empty() || info.contains_key(accession) {
            continue;
        }
        info.insert(
            accession.to_string(),
            TargetInfo {
                node: non_empty(fields[COL_TAXID]),
                specialization: Some(accession.to_string()),
                specialization_name: Some(assembly_name(
                    fields[COL_ORGANISM],
                    fields[COL_INFRASPECIFIC],
                    accession,
                )),
            },
        );
    }
    Ok(())
}

/// Reads accession2taxid tables, keeping only `wanted` accessions.
pub fn load_accession2taxid(
    files: &[Utf8PathBuf],
    wanted: &HashSet<String>,
) -> Result<HashMap<String, TargetInfo>, KiraError> {
    let mut info = HashMap::new();
    for file in files {
        parse_accession2taxid(fs_util::open_text(file)?, wanted, &mut info).map_err(|err| {
            KiraError::InputFileParse {
                path: file.clone(),
                message: err.to_string(),
            }
        })?;
        if info.len() == wanted.len() {
            break;
        }
    }
    debug!(found = info.len(), wanted = wanted.len(), "parsed accession2taxid");
    Ok(info)
}

pub fn parse_accession2taxid(
    reader: impl BufRead,
    wanted: &HashSet<String>,
    info: &mut HashMap<String, TargetInfo>,
) -> std::io::Result<()> {
    for line in reader.lines() {
        let line = line?;
        let mut fields = line.split('\t');
        let (Some(_), Some(versioned), Some(taxid)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if !wanted.contains(versioned) || info.contains_key(versioned) {
            continue;
        }
        info.insert(
            versioned.to_string(),
            TargetInfo {
                node: non_empty(taxid),
                ..TargetInfo::default()
            },
        );
    }
    Ok(())
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty() && value != "na").then(|| value.to_string())
}

fn assembly_name(organism: &str, infraspecific: &str, accession: &str) -> String {
    let organism = organism.trim();
    let strain = infraspecific
        .trim()
        .split_once('=')
        .map(|(_, value)| value.trim())
        .unwrap_or_else(|| infraspecific.trim());
    let name = if strain.is_empty() || strain == "na" || organism.contains(strain) {
        organism.to_string()
    } else {
        format!("{organism} {strain}")
    };
    if name.is_empty() {
        accession.to_string()
    } else {
        name
    }
}
