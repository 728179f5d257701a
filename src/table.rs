//! Target metadata table and its validation stages.
//!
//! Every stage consumes the table and returns the narrowed (or repaired)
//! table together with the number of rows it touched, so callers can report
//! diagnostics and tests can check each stage in isolation.

use std::collections::{HashMap, HashSet};

use crate::domain::{BinColumn, Level};
use crate::info::TargetInfo;
use crate::taxonomy::Taxonomy;

/// One parsed input row before validation; any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    pub file: Option<String>,
    pub target: Option<String>,
    pub node: Option<String>,
    pub specialization: Option<String>,
    pub specialization_name: Option<String>,
    pub sequence: Option<String>,
}

impl RawRecord {
    fn is_empty(&self) -> bool {
        self.file.is_none()
            && self.target.is_none()
            && self.node.is_none()
            && self.specialization.is_none()
            && self.specialization_name.is_none()
            && self.sequence.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRecord {
    pub target: String,
    pub node: Option<String>,
    pub specialization: Option<String>,
    pub specialization_name: Option<String>,
    pub file: String,
    pub sequence: Option<String>,
}

impl TargetRecord {
    /// Value of the bin column for this row, if set.
    pub fn bin(&self, column: BinColumn) -> Option<&str> {
        match column {
            BinColumn::Target => Some(self.target.as_str()),
            BinColumn::Node => self.node.as_deref(),
            BinColumn::Specialization => self.specialization.as_deref(),
        }
    }
}

/// Row counts removed while loading raw records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub invalid_entries: usize,
    pub invalid_targets: usize,
    pub duplicated_targets: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpecializationReport {
    /// No row carried a specialization, so nothing was repaired.
    pub absent: bool,
    pub replaced: usize,
    pub dropped: usize,
}

/// Which field of a row is used to look up enrichment info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKey {
    Target,
    Specialization,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataTable {
    rows: Vec<TargetRecord>,
}

impl MetadataTable {
    pub fn new(rows: Vec<TargetRecord>) -> Self {
        Self { rows }
    }

    /// Prunes empty rows, rows without target and duplicated targets (the
    /// first occurrence wins).
    pub fn from_raw(raw: Vec<RawRecord>) -> (Self, LoadReport) {
        let mut report = LoadReport::default();

        let total = raw.len();
        let raw: Vec<RawRecord> = raw.into_iter().filter(|row| !row.is_empty()).collect();
        report.invalid_entries = total - raw.len();

        let total = raw.len();
        let raw: Vec<(String, RawRecord)> = raw
            .into_iter()
            .filter_map(|row| row.target.clone().map(|target| (target, row)))
            .collect();
        report.invalid_targets = total - raw.len();

        let total = raw.len();
        let mut seen = HashSet::new();
        let rows: Vec<TargetRecord> = raw
            .into_iter()
            .filter(|(target, _)| seen.insert(target.clone()))
            .map(|(target, row)| TargetRecord {
                target,
                node: row.node,
                specialization: row.specialization,
                specialization_name: row.specialization_name,
                file: row.file.unwrap_or_default(),
                sequence: row.sequence,
            })
            .collect();
        report.duplicated_targets = total - rows.len();

        (Self { rows }, report)
    }

    pub fn rows(&self) -> &[TargetRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keys used to query enrichment sources, in row order.
    pub fn info_keys(&self, key: InfoKey) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| match key {
                InfoKey::Target => Some(row.target.clone()),
                InfoKey::Specialization => row.specialization.clone(),
            })
            .collect()
    }

    /// Merges external info into matching rows. Fields present in the info
    /// replace the row's values; rows without a match are left untouched.
    /// Returns how many rows matched.
    pub fn enrich(self, info: &HashMap<String, TargetInfo>, key: InfoKey) -> (Self, usize) {
        let mut matched = 0;
        let rows = self
            .rows
            .into_iter()
            .map(|mut row| {
                let lookup = match key {
                    InfoKey::Target => Some(row.target.as_str()),
                    InfoKey::Specialization => row.specialization.as_deref(),
                };
                if let Some(entry) = lookup.and_then(|value| info.get(value)) {
                    matched += 1;
                    if entry.node.is_some() {
                        row.node = entry.node.clone();
                    }
                    if entry.specialization.is_some() {
                        row.specialization = entry.specialization.clone();
                    }
                    if entry.specialization_name.is_some() {
                        row.specialization_name = entry.specialization_name.clone();
                    }
                }
                row
            })
            .collect();
        (Self { rows }, matched)
    }

    /// Replaces nodes with the values returned by `assign` when it yields one.
    pub fn assign_nodes<F>(self, assign: F) -> (Self, usize)
    where
        F: Fn(&TargetRecord) -> Option<String>,
    {
        let mut assigned = 0;
        let rows = self
            .rows
            .into_iter()
            .map(|mut row| {
                if let Some(node) = assign(&row) {
                    assigned += 1;
                    row.node = Some(node);
                }
                row
            })
            .collect();
        (Self { rows }, assigned)
    }

    /// Resolves every node to its latest id, projects it to the requested
    /// rank and drops rows left without a valid node.
    pub fn validate_taxonomy(self, tax: &dyn Taxonomy, level: Option<&Level>) -> (Self, usize) {
        let rank = level.and_then(Level::rank);
        let total = self.rows.len();
        let rows: Vec<TargetRecord> = self
            .rows
            .into_iter()
            .filter_map(|mut row| {
                let latest = row.node.as_deref().and_then(|node| tax.latest(node));
                let node = match (latest, rank) {
                    (Some(node), Some(rank)) => tax.parent_rank(&node, rank),
                    (latest, _) => latest,
                };
                node.map(|node| {
                    row.node = Some(node);
                    row
                })
            })
            .collect();
        let dropped = total - rows.len();
        (Self { rows }, dropped)
    }

    /// Makes every specialization belong to exactly one node.
    ///
    /// Rows without specialization, or whose specialization appears under
    /// more than one node, become their own specialization (the target).
    /// When no row carries a specialization at all the repair is skipped,
    /// so every row is dropped and the caller sees an empty table.
    pub fn validate_specialization(self) -> (Self, SpecializationReport) {
        let mut report = SpecializationReport::default();
        let mut rows = self.rows;

        if rows.iter().all(|row| row.specialization.is_none()) {
            report.absent = true;
        } else {
            let mut parents: HashMap<&str, HashSet<Option<&str>>> = HashMap::new();
            for row in &rows {
                if let Some(spec) = row.specialization.as_deref() {
                    parents.entry(spec).or_default().insert(row.node.as_deref());
                }
            }
            let conflicting: HashSet<String> = parents
                .into_iter()
                .filter(|(_, nodes)| nodes.len() > 1)
                .map(|(spec, _)| spec.to_string())
                .collect();

            for row in rows.iter_mut() {
                let replace = match row.specialization.as_deref() {
                    None => true,
                    Some(spec) => conflicting.contains(spec),
                };
                if replace {
                    row.specialization = Some(row.target.clone());
                    row.specialization_name = Some(row.target.clone());
                    report.replaced += 1;
                }
            }
        }

        let total = rows.len();
        rows.retain(|row| row.specialization.is_some());
        report.dropped = total - rows.len();

        for row in rows.iter_mut() {
            if row.specialization_name.is_none() {
                row.specialization_name = row.specialization.clone();
            }
        }

        (Self { rows }, report)
    }

    /// Distinct nodes in row order.
    pub fn nodes(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter_map(|row| row.node.as_deref())
            .filter(|node| seen.insert(*node))
            .map(str::to_string)
            .collect()
    }
}
