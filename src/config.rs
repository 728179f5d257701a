use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::{InputTarget, Level, TaxonomySource};
use crate::error::KiraError;
use crate::store::Workspace;

pub const DEFAULT_INPUT_EXTENSION: &str = "fna.gz";
pub const DEFAULT_GENOME_UPDATER: &str = "genome_updater.sh";
pub const DEFAULT_INDEX_BUILDER: &str = "ganon-build";

/// Parameters forwarded to the index builder.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IndexParams {
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub max_fp: Option<f64>,
    /// Filter size in megabytes; takes precedence over `max_fp`.
    #[serde(default)]
    pub filter_size: Option<f64>,
    #[serde(default = "default_kmer_size")]
    pub kmer_size: u32,
    #[serde(default = "default_window_size")]
    pub window_size: u32,
    #[serde(default = "default_hash_functions")]
    pub hash_functions: u32,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            max_fp: Some(0.05),
            filter_size: None,
            kmer_size: default_kmer_size(),
            window_size: default_window_size(),
            hash_functions: default_hash_functions(),
        }
    }
}

/// Executables of the external collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ToolPaths {
    #[serde(default = "default_genome_updater")]
    pub genome_updater: String,
    #[serde(default = "default_index_builder")]
    pub index_builder: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            genome_updater: default_genome_updater(),
            index_builder: default_index_builder(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BuildCustomConfig {
    pub db_prefix: Utf8PathBuf,
    #[serde(default)]
    pub input: Vec<Utf8PathBuf>,
    /// Suffix input files must end with; empty accepts every file.
    #[serde(default = "default_input_extension")]
    pub input_extension: String,
    #[serde(default)]
    pub input_file: Option<Utf8PathBuf>,
    #[serde(default)]
    pub input_target: Option<InputTarget>,
    #[serde(default)]
    pub level: Option<Level>,
    #[serde(default = "default_taxonomy")]
    pub taxonomy: TaxonomySource,
    #[serde(default)]
    pub taxonomy_files: Vec<Utf8PathBuf>,
    #[serde(default)]
    pub ncbi_file_info: Vec<Utf8PathBuf>,
    #[serde(default)]
    pub ncbi_sequence_info: Vec<Utf8PathBuf>,
    #[serde(default)]
    pub write_info_file: bool,
    #[serde(default)]
    pub keep_files: bool,
    #[serde(default)]
    pub restart: bool,
    #[serde(default)]
    pub quiet: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub index: IndexParams,
    #[serde(default)]
    pub tools: ToolPaths,
}

impl BuildCustomConfig {
    pub fn new(db_prefix: impl Into<Utf8PathBuf>) -> Self {
        Self {
            db_prefix: db_prefix.into(),
            input: Vec::new(),
            input_extension: default_input_extension(),
            input_file: None,
            input_target: None,
            level: None,
            taxonomy: default_taxonomy(),
            taxonomy_files: Vec::new(),
            ncbi_file_info: Vec::new(),
            ncbi_sequence_info: Vec::new(),
            write_info_file: false,
            keep_files: false,
            restart: false,
            quiet: false,
            verbose: false,
            index: IndexParams::default(),
            tools: ToolPaths::default(),
        }
    }

    pub fn tax_path(&self) -> Utf8PathBuf {
        with_suffix(&self.db_prefix, "tax")
    }

    pub fn index_path(&self) -> Utf8PathBuf {
        with_suffix(&self.db_prefix, "ibf")
    }

    pub fn info_path(&self) -> Utf8PathBuf {
        with_suffix(&self.db_prefix, "info.tsv")
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::for_prefix(&self.db_prefix)
    }
}

/// Download plus build of a database from the download tool's reference
/// collections.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BuildConfig {
    pub db_prefix: Utf8PathBuf,
    #[serde(default = "default_sources")]
    pub source: Vec<String>,
    #[serde(default)]
    pub organism_group: Vec<String>,
    /// Keep only the top assemblies per taxonomic node.
    #[serde(default)]
    pub top: Option<u32>,
    #[serde(default)]
    pub complete_genomes: bool,
    /// Extra arguments passed verbatim to the download tool.
    #[serde(default)]
    pub genome_updater_args: Vec<String>,
    #[serde(default = "default_taxonomy")]
    pub taxonomy: TaxonomySource,
    #[serde(default)]
    pub taxonomy_files: Vec<Utf8PathBuf>,
    #[serde(default)]
    pub restart: bool,
    #[serde(default)]
    pub quiet: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub index: IndexParams,
    #[serde(default)]
    pub tools: ToolPaths,
}

impl BuildConfig {
    pub fn new(db_prefix: impl Into<Utf8PathBuf>) -> Self {
        Self {
            db_prefix: db_prefix.into(),
            source: default_sources(),
            organism_group: Vec::new(),
            top: None,
            complete_genomes: false,
            genome_updater_args: Vec::new(),
            taxonomy: default_taxonomy(),
            taxonomy_files: Vec::new(),
            restart: false,
            quiet: false,
            verbose: false,
            index: IndexParams::default(),
            tools: ToolPaths::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UpdateConfig {
    pub db_prefix: Utf8PathBuf,
    /// Writes the updated database under a new prefix and moves the
    /// workspace along with it.
    #[serde(default)]
    pub output_db_prefix: Option<Utf8PathBuf>,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub restart: bool,
    #[serde(default)]
    pub quiet: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub tools: ToolPaths,
}

impl UpdateConfig {
    pub fn new(db_prefix: impl Into<Utf8PathBuf>) -> Self {
        Self {
            db_prefix: db_prefix.into(),
            output_db_prefix: None,
            threads: default_threads(),
            restart: false,
            quiet: false,
            verbose: false,
            tools: ToolPaths::default(),
        }
    }
}

/// Build configuration as saved in the workspace for later updates.
#[derive(Debug, Deserialize, Serialize)]
struct SavedConfig {
    version: String,
    #[serde(flatten)]
    config: BuildCustomConfig,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn save(path: &Utf8Path, config: &BuildCustomConfig) -> Result<(), KiraError> {
        let saved = SavedConfig {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config: config.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&saved)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;
        Workspace::write_bytes_atomic(path, &bytes)
    }

    pub fn load(path: &Utf8Path) -> Result<BuildCustomConfig, KiraError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| KiraError::ConfigRead(path.to_path_buf()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<BuildCustomConfig, KiraError> {
        let saved: SavedConfig =
            serde_json::from_str(content).map_err(|err| KiraError::ConfigParse(err.to_string()))?;
        Ok(saved.config)
    }
}

fn with_suffix(prefix: &Utf8Path, suffix: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{prefix}.{suffix}"))
}

fn default_threads() -> usize {
    12
}

fn default_kmer_size() -> u32 {
    19
}

fn default_window_size() -> u32 {
    31
}

fn default_hash_functions() -> u32 {
    4
}

fn default_input_extension() -> String {
    DEFAULT_INPUT_EXTENSION.to_string()
}

fn default_taxonomy() -> TaxonomySource {
    TaxonomySource::Ncbi
}

fn default_sources() -> Vec<String> {
    vec!["refseq".to_string()]
}

fn default_genome_updater() -> String {
    DEFAULT_GENOME_UPDATER.to_string()
}

fn default_index_builder() -> String {
    DEFAULT_INDEX_BUILDER.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_saved_config() {
        let config =
            ConfigLoader::parse(r#"{"version": "0.1.0", "db_prefix": "db/refseq"}"#).unwrap();
        assert_eq!(config.db_prefix, Utf8PathBuf::from("db/refseq"));
        assert_eq!(config.taxonomy, TaxonomySource::Ncbi);
        assert_eq!(config.input_extension, "fna.gz");
        assert_eq!(config.index.kmer_size, 19);
        assert_eq!(config.tools.index_builder, "ganon-build");
        assert_eq!(config.tax_path(), Utf8PathBuf::from("db/refseq.tax"));
    }

    #[test]
    fn level_round_trips_as_string() {
        let mut config = BuildCustomConfig::new("db");
        config.level = Some(Level::Rank("genus".to_string()));
        config.input_target = Some(InputTarget::Sequence);
        let json = serde_json::to_string(&SavedConfig {
            version: "x".to_string(),
            config: config.clone(),
        })
        .unwrap();
        assert!(json.contains(r#""level":"genus""#));
        assert!(json.contains(r#""input_target":"sequence""#));
        assert_eq!(ConfigLoader::parse(&json).unwrap(), config);
    }
}
