use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};

use camino::Utf8Path;
use serde::Serialize;
use tracing::{debug, info};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{BinColumn, InputTarget};
use crate::error::KiraError;
use crate::store::remove_file_if_exists;
use crate::table::{MetadataTable, TargetRecord};
use crate::taxonomy::{ROOT_NODE, TaxonomyTree};

/// Writes the taxonomy file: the filtered tree rewritten in full, then one
/// row per distinct bin that is not already a node of the tree. Returns the
/// number of appended bin rows.
pub fn write_tax(
    path: &Utf8Path,
    tree: &TaxonomyTree,
    table: &MetadataTable,
    bin: BinColumn,
    rank_label: &str,
) -> Result<usize, KiraError> {
    remove_file_if_exists(path)?;
    tree.write(path)?;
    if bin == BinColumn::Node {
        return Ok(0);
    }

    let file = OpenOptions::new()
        .append(true)
        .open(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("open {path}: {err}")))?;
    let mut out = BufWriter::new(file);
    let mut seen = HashSet::new();
    for row in table.rows() {
        let id = bin_value(row, bin);
        if tree.contains(id) || !seen.insert(id) {
            continue;
        }
        let name = match bin {
            BinColumn::Specialization => row.specialization_name.as_deref().unwrap_or(id),
            _ => id,
        };
        let parent = row.node.as_deref().unwrap_or(ROOT_NODE);
        writeln!(out, "{id}\t{parent}\t{rank_label}\t{name}").map_err(write_error)?;
    }
    out.flush().map_err(write_error)?;
    debug!(path = %path, nodes = tree.len(), bins = seen.len(), "wrote taxonomy");
    Ok(seen.len())
}

/// `file, bin` per row, plus the target when rows are sequences.
pub fn write_target_info(
    path: &Utf8Path,
    table: &MetadataTable,
    bin: BinColumn,
    input_target: InputTarget,
) -> Result<(), KiraError> {
    let mut out = create(path)?;
    for row in table.rows() {
        let id = bin_value(row, bin);
        match input_target {
            InputTarget::Sequence => writeln!(out, "{}\t{id}\t{}", row.file, row.target),
            InputTarget::File => writeln!(out, "{}\t{id}", row.file),
        }
        .map_err(write_error)?;
    }
    out.flush().map_err(write_error)
}

/// Validated table in the 5-column input-file layout, so a later run can
/// reuse it as its input file.
pub fn write_info(path: &Utf8Path, table: &MetadataTable) -> Result<(), KiraError> {
    let mut out = create(path)?;
    for row in table.rows() {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            row.file,
            row.target,
            row.node.as_deref().unwrap_or_default(),
            row.specialization.as_deref().unwrap_or_default(),
            row.specialization_name.as_deref().unwrap_or_default(),
        )
        .map_err(write_error)?;
    }
    out.flush().map_err(write_error)
}

/// Bin of a row; rows without a value in the bin column keep their target.
fn bin_value(row: &TargetRecord, bin: BinColumn) -> &str {
    row.bin(bin).unwrap_or(row.target.as_str())
}

fn create(path: &Utf8Path) -> Result<BufWriter<fs::File>, KiraError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    let file = fs::File::create(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("create {path}: {err}")))?;
    Ok(BufWriter::new(file))
}

fn write_error(err: io::Error) -> KiraError {
    KiraError::Filesystem(err.to_string())
}

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

/// Outcome of one workflow, as reported by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub call: String,
    pub success: bool,
    pub db_prefix: String,
    pub files: Vec<String>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &BuildSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress as log lines on stderr.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed = ?elapsed, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}
