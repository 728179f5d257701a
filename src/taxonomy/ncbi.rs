use std::collections::{HashMap, HashSet};
use std::io::BufRead;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::domain::TaxonomySource;
use crate::error::KiraError;
use crate::fs_util;
use crate::taxonomy::{ROOT_PARENT, Taxonomy, TaxonomyTree};

pub const TAXDUMP_URL: &str = "https://ftp.ncbi.nlm.nih.gov/pub/taxonomy/taxdmp.zip";

/// NCBI taxonomy from a taxdump (`nodes.dmp`, `names.dmp`, `merged.dmp`,
/// `delnodes.dmp`).
#[derive(Debug, Clone, Default)]
pub struct NcbiTaxonomy {
    tree: TaxonomyTree,
    merged: HashMap<String, String>,
    deleted: HashSet<String>,
}

#[derive(Debug, Default)]
struct DumpFiles {
    nodes: Option<Utf8PathBuf>,
    names: Option<Utf8PathBuf>,
    merged: Option<Utf8PathBuf>,
    delnodes: Option<Utf8PathBuf>,
}

impl DumpFiles {
    fn offer(&mut self, path: Utf8PathBuf) {
        match path.file_name() {
            Some("nodes.dmp") => self.nodes = Some(path),
            Some("names.dmp") => self.names = Some(path),
            Some("merged.dmp") => self.merged = Some(path),
            Some("delnodes.dmp") => self.delnodes = Some(path),
            _ => {}
        }
    }

    fn offer_dir(&mut self, dir: &Utf8Path) {
        for name in ["nodes.dmp", "names.dmp", "merged.dmp", "delnodes.dmp"] {
            let path = dir.join(name);
            if path.as_std_path().is_file() {
                self.offer(path);
            }
        }
    }
}

impl NcbiTaxonomy {
    pub fn from_parts(
        tree: TaxonomyTree,
        merged: HashMap<String, String>,
        deleted: HashSet<String>,
    ) -> Self {
        Self {
            tree,
            merged,
            deleted,
        }
    }

    /// Accepts the `.dmp` files themselves, folders holding them,
    /// `taxdmp.zip` or `taxdump.tar.gz`. Archives are unpacked into
    /// `work_dir`.
    pub fn from_files(files: &[Utf8PathBuf], work_dir: &Utf8Path) -> Result<Self, KiraError> {
        let mut dump = DumpFiles::default();
        for file in files {
            let name = file.as_str().to_lowercase();
            if file.as_std_path().is_dir() {
                dump.offer_dir(file);
            } else if name.ends_with(".zip") {
                let out = work_dir.join("taxdump");
                fs_util::validate_zip(file.as_std_path())?;
                fs_util::extract_zip(file.as_std_path(), out.as_std_path())?;
                dump.offer_dir(&out);
            } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
                let out = work_dir.join("taxdump");
                fs_util::extract_tar_gz(file.as_std_path(), out.as_std_path())?;
                dump.offer_dir(&out);
            } else {
                dump.offer(file.clone());
            }
        }

        let nodes_path = dump.nodes.ok_or_else(|| KiraError::TaxonomyParse {
            path: files.first().cloned().unwrap_or_default(),
            message: "nodes.dmp not found".to_string(),
        })?;
        let mut tree = parse_nodes(fs_util::open_text(&nodes_path)?, &nodes_path)?;
        if let Some(names_path) = dump.names {
            for (node, name) in parse_names(fs_util::open_text(&names_path)?, &names_path)? {
                tree.set_name(&node, &name);
            }
        }
        let merged = match dump.merged {
            Some(path) => parse_merged(fs_util::open_text(&path)?, &path)?,
            None => HashMap::new(),
        };
        let deleted = match dump.delnodes {
            Some(path) => parse_delnodes(fs_util::open_text(&path)?, &path)?,
            None => HashSet::new(),
        };
        debug!(
            nodes = tree.len(),
            merged = merged.len(),
            deleted = deleted.len(),
            "parsed ncbi taxonomy"
        );
        Ok(Self::from_parts(tree, merged, deleted))
    }
}

impl Taxonomy for NcbiTaxonomy {
    fn source(&self) -> TaxonomySource {
        TaxonomySource::Ncbi
    }

    fn tree(&self) -> &TaxonomyTree {
        &self.tree
    }

    fn latest(&self, node: &str) -> Option<String> {
        if self.tree.contains(node) {
            return Some(node.to_string());
        }
        if self.deleted.contains(node) {
            return None;
        }
        self.merged
            .get(node)
            .filter(|merged| self.tree.contains(merged))
            .cloned()
    }
}

fn dump_fields(line: &str) -> Vec<&str> {
    line.split("\t|").map(str::trim).collect()
}

fn read_error(path: &Utf8Path, err: std::io::Error) -> KiraError {
    KiraError::TaxonomyParse {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

pub fn parse_nodes(reader: impl BufRead, path: &Utf8Path) -> Result<TaxonomyTree, KiraError> {
    let mut tree = TaxonomyTree::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|err| read_error(path, err))?;
        if line.trim().is_empty() {
            continue;
        }
        let fields = dump_fields(&line);
        if fields.len() < 3 {
            return Err(KiraError::TaxonomyParse {
                path: path.to_path_buf(),
                message: format!("line {} has fewer than 3 fields", i + 1),
            });
        }
        let (node, parent, rank) = (fields[0], fields[1], fields[2]);
        let parent = if parent == node { ROOT_PARENT } else { parent };
        tree.insert(node, parent, rank, node);
    }
    Ok(tree)
}

/// Scientific names only.
pub fn parse_names(
    reader: impl BufRead,
    path: &Utf8Path,
) -> Result<Vec<(String, String)>, KiraError> {
    let mut names = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|err| read_error(path, err))?;
        let fields = dump_fields(&line);
        if fields.len() >= 4 && fields[3] == "scientific name" {
            names.push((fields[0].to_string(), fields[1].to_string()));
        }
    }
    Ok(names)
}

pub fn parse_merged(
    reader: impl BufRead,
    path: &Utf8Path,
) -> Result<HashMap<String, String>, KiraError> {
    let mut merged = HashMap::new();
    for line in reader.lines() {
        let line = line.map_err(|err| read_error(path, err))?;
        let fields = dump_fields(&line);
        if fields.len() >= 2 && !fields[0].is_empty() {
            merged.insert(fields[0].to_string(), fields[1].to_string());
        }
    }
    Ok(merged)
}

pub fn parse_delnodes(reader: impl BufRead, path: &Utf8Path) -> Result<HashSet<String>, KiraError> {
    let mut deleted = HashSet::new();
    for line in reader.lines() {
        let line = line.map_err(|err| read_error(path, err))?;
        let fields = dump_fields(&line);
        if let Some(node) = fields.first().filter(|node| !node.is_empty()) {
            deleted.insert(node.to_string());
        }
    }
    Ok(deleted)
}
