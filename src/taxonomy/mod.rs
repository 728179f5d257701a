//! Taxonomy trees and the operations the metadata pipeline needs from them.
//!
//! Providers (NCBI taxdump, GTDB tables) parse their own formats into a
//! shared [`TaxonomyTree`] and expose it through the [`Taxonomy`] trait:
//! latest-node resolution, projection to an ancestor rank, rank lookup and
//! subtree filtering before serialization.

pub mod gtdb;
pub mod ncbi;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;

use crate::domain::{Level, TaxonomySource};
use crate::error::KiraError;
use crate::remote::{self, Downloader};

pub use gtdb::GtdbTaxonomy;
pub use ncbi::NcbiTaxonomy;

pub const ROOT_NODE: &str = "1";
pub const ROOT_PARENT: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxNode {
    pub parent: String,
    pub rank: String,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct TaxonomyTree {
    nodes: HashMap<String, TaxNode>,
}

impl TaxonomyTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tree holding only the root node.
    pub fn with_root() -> Self {
        let mut tree = Self::new();
        tree.insert(ROOT_NODE, ROOT_PARENT, "root", "root");
        tree
    }

    pub fn insert(&mut self, node: &str, parent: &str, rank: &str, name: &str) {
        self.nodes.insert(
            node.to_string(),
            TaxNode {
                parent: parent.to_string(),
                rank: rank.to_string(),
                name: name.to_string(),
            },
        );
    }

    pub fn set_name(&mut self, node: &str, name: &str) {
        if let Some(entry) = self.nodes.get_mut(node) {
            entry.name = name.to_string();
        }
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn get(&self, node: &str) -> Option<&TaxNode> {
        self.nodes.get(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Path from `node` up to the root, `node` included. Empty for unknown
    /// nodes. Stops on self-parented nodes and on cycles.
    pub fn lineage(&self, node: &str) -> Vec<&str> {
        let mut lineage = Vec::new();
        let mut visited = HashSet::new();
        let mut current = match self.nodes.get_key_value(node) {
            Some((key, _)) => key.as_str(),
            None => return lineage,
        };
        while visited.insert(current) {
            lineage.push(current);
            let Some(entry) = self.nodes.get(current) else {
                break;
            };
            match self.nodes.get_key_value(entry.parent.as_str()) {
                Some((parent, _)) => current = parent.as_str(),
                None => break,
            }
        }
        lineage
    }

    /// First node at `rank` walking from `node` towards the root.
    pub fn parent_rank(&self, node: &str, rank: &str) -> Option<String> {
        self.lineage(node)
            .into_iter()
            .find(|id| self.nodes.get(*id).map(|n| n.rank == rank).unwrap_or(false))
            .map(str::to_string)
    }

    pub fn has_rank(&self, rank: &str) -> bool {
        self.nodes.values().any(|node| node.rank == rank)
    }

    /// Smallest subtree covering `keep`: the requested nodes and all their
    /// ancestors. Unknown nodes are ignored.
    pub fn filtered(&self, keep: &[String]) -> TaxonomyTree {
        let mut nodes = HashMap::new();
        for node in keep {
            for id in self.lineage(node) {
                if nodes.contains_key(id) {
                    break;
                }
                if let Some(entry) = self.nodes.get(id) {
                    nodes.insert(id.to_string(), entry.clone());
                }
            }
        }
        TaxonomyTree { nodes }
    }

    /// Writes `node\tparent\trank\tname` rows, ancestors before descendants.
    pub fn write(&self, path: &Utf8Path) -> Result<(), KiraError> {
        let file = fs::File::create(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("create {path}: {err}")))?;
        let mut out = BufWriter::new(file);
        for (id, node) in self.sorted() {
            writeln!(out, "{id}\t{}\t{}\t{}", node.parent, node.rank, node.name)
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        out.flush()
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    fn sorted(&self) -> Vec<(&str, &TaxNode)> {
        let mut entries: Vec<(usize, &str, &TaxNode)> = self
            .nodes
            .iter()
            .map(|(id, node)| (self.lineage(id).len(), id.as_str(), node))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        entries.into_iter().map(|(_, id, node)| (id, node)).collect()
    }
}

/// Capability the metadata pipeline depends on, independent of provider.
pub trait Taxonomy {
    fn source(&self) -> TaxonomySource;

    fn tree(&self) -> &TaxonomyTree;

    /// Current id for `node`, following merges; `None` when the node is
    /// unknown or was removed.
    fn latest(&self, node: &str) -> Option<String>;

    fn parent_rank(&self, node: &str, rank: &str) -> Option<String> {
        self.tree().parent_rank(node, rank)
    }

    fn has_rank(&self, rank: &str) -> bool {
        self.tree().has_rank(rank)
    }

    /// Node the provider itself assigns to an assembly accession, if any.
    fn assignment(&self, _accession: &str) -> Option<String> {
        None
    }

    fn filtered(&self, nodes: &[String]) -> TaxonomyTree {
        self.tree().filtered(nodes)
    }
}

/// Downgrades rank levels the taxonomy does not know to `leaves`.
pub fn resolve_level(level: Option<Level>, tax: &dyn Taxonomy) -> Option<Level> {
    match level {
        Some(Level::Rank(rank)) if !tax.has_rank(&rank) => {
            warn!(level = %rank, "level not found in taxonomic ranks, changing to leaves");
            Some(Level::Leaves)
        }
        other => other,
    }
}

/// Parses the taxonomy of `source` from `files`, downloading the provider's
/// default files into `work_dir` when none are given.
pub fn load_taxonomy(
    source: TaxonomySource,
    files: &[Utf8PathBuf],
    work_dir: &Utf8Path,
    downloader: &dyn Downloader,
) -> Result<Box<dyn Taxonomy>, KiraError> {
    let urls: &[&str] = match source {
        TaxonomySource::Ncbi => &[ncbi::TAXDUMP_URL],
        TaxonomySource::Gtdb => &gtdb::TAXONOMY_URLS,
        TaxonomySource::Skip => return Err(KiraError::InvalidTaxonomy(source.to_string())),
    };

    let files = if files.is_empty() {
        remote::download_all(downloader, urls, work_dir)?
    } else {
        files.to_vec()
    };

    match source {
        TaxonomySource::Ncbi => Ok(Box::new(NcbiTaxonomy::from_files(&files, work_dir)?)),
        TaxonomySource::Gtdb => Ok(Box::new(GtdbTaxonomy::from_files(&files)?)),
        TaxonomySource::Skip => Err(KiraError::InvalidTaxonomy(source.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> TaxonomyTree {
        let mut tree = TaxonomyTree::with_root();
        tree.insert("2", "1", "superkingdom", "Bacteria");
        tree.insert("561", "2", "genus", "Escherichia");
        tree.insert("562", "561", "species", "Escherichia coli");
        tree.insert("83333", "562", "strain", "Escherichia coli K-12");
        tree.insert("620", "2", "genus", "Shigella");
        tree
    }

    #[test]
    fn lineage_walks_to_root() {
        let tree = tree();
        assert_eq!(tree.lineage("83333"), vec!["83333", "562", "561", "2", "1"]);
        assert!(tree.lineage("999").is_empty());
    }

    #[test]
    fn parent_rank_returns_ancestor_or_none() {
        let tree = tree();
        assert_eq!(tree.parent_rank("83333", "genus").as_deref(), Some("561"));
        assert_eq!(tree.parent_rank("562", "species").as_deref(), Some("562"));
        assert_eq!(tree.parent_rank("620", "species"), None);
        assert_eq!(tree.parent_rank("999", "genus"), None);
    }

    #[test]
    fn filtered_keeps_lineages_only() {
        let tree = tree();
        let filtered = tree.filtered(&["562".to_string(), "999".to_string()]);
        let mut ids: Vec<_> = filtered.node_ids().collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "2", "561", "562"]);
        assert!(!filtered.has_rank("strain"));
    }

    #[test]
    fn write_puts_ancestors_first() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("x.tax")).unwrap();
        tree().filtered(&["562".to_string()]).write(&path).unwrap();
        let text = fs::read_to_string(path.as_std_path()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "1\t0\troot\troot");
        assert_eq!(lines[3], "562\t561\tspecies\tEscherichia coli");
        assert_eq!(lines.len(), 4);
    }
}
