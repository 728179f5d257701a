use std::collections::HashMap;
use std::io::BufRead;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::domain::TaxonomySource;
use crate::error::KiraError;
use crate::fs_util;
use crate::taxonomy::{ROOT_NODE, Taxonomy, TaxonomyTree};

pub const TAXONOMY_URLS: [&str; 2] = [
    "https://data.gtdb.ecogenomic.org/releases/latest/ar53_taxonomy.tsv.gz",
    "https://data.gtdb.ecogenomic.org/releases/latest/bac120_taxonomy.tsv.gz",
];

/// GTDB taxonomy built from `*_taxonomy.tsv` lineage tables.
///
/// Node ids are the prefixed labels (`g__Escherichia`). The tables also
/// assign every genome accession to its species node.
#[derive(Debug, Clone, Default)]
pub struct GtdbTaxonomy {
    tree: TaxonomyTree,
    assignments: HashMap<String, String>,
}

impl GtdbTaxonomy {
    pub fn from_files(files: &[Utf8PathBuf]) -> Result<Self, KiraError> {
        let mut taxonomy = Self {
            tree: TaxonomyTree::with_root(),
            assignments: HashMap::new(),
        };
        for file in files {
            taxonomy.add_table(fs_util::open_text(file)?, file)?;
        }
        debug!(
            nodes = taxonomy.tree.len(),
            assignments = taxonomy.assignments.len(),
            "parsed gtdb taxonomy"
        );
        Ok(taxonomy)
    }

    pub fn from_reader(reader: impl BufRead, path: &Utf8Path) -> Result<Self, KiraError> {
        let mut taxonomy = Self {
            tree: TaxonomyTree::with_root(),
            assignments: HashMap::new(),
        };
        taxonomy.add_table(reader, path)?;
        Ok(taxonomy)
    }

    fn add_table(&mut self, reader: impl BufRead, path: &Utf8Path) -> Result<(), KiraError> {
        for (i, line) in reader.lines().enumerate() {
            let line = line.map_err(|err| KiraError::TaxonomyParse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (accession, lineage) =
                line.split_once('\t')
                    .ok_or_else(|| KiraError::TaxonomyParse {
                        path: path.to_path_buf(),
                        message: format!("line {} has no lineage column", i + 1),
                    })?;

            let mut parent = ROOT_NODE.to_string();
            for label in lineage.split(';').map(str::trim) {
                let Some((prefix, name)) = label.split_once("__") else {
                    continue;
                };
                if name.is_empty() {
                    continue;
                }
                if !self.tree.contains(label) {
                    self.tree.insert(label, &parent, rank_for_prefix(prefix), name);
                }
                parent = label.to_string();
            }
            if parent != ROOT_NODE {
                self.assignments
                    .insert(normalize_accession(accession).to_string(), parent);
            }
        }
        Ok(())
    }
}

impl Taxonomy for GtdbTaxonomy {
    fn source(&self) -> TaxonomySource {
        TaxonomySource::Gtdb
    }

    fn tree(&self) -> &TaxonomyTree {
        &self.tree
    }

    fn latest(&self, node: &str) -> Option<String> {
        self.tree.contains(node).then(|| node.to_string())
    }

    fn assignment(&self, accession: &str) -> Option<String> {
        self.assignments
            .get(normalize_accession(accession))
            .cloned()
    }
}

fn rank_for_prefix(prefix: &str) -> &'static str {
    match prefix {
        "d" => "domain",
        "p" => "phylum",
        "c" => "class",
        "o" => "order",
        "f" => "family",
        "g" => "genus",
        "s" => "species",
        _ => "no rank",
    }
}

/// Strips the `RS_`/`GB_` source prefix GTDB puts on accessions.
fn normalize_accession(accession: &str) -> &str {
    accession
        .strip_prefix("RS_")
        .or_else(|| accession.strip_prefix("GB_"))
        .unwrap_or(accession)
}
