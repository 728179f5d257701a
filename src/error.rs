use camino::Utf8PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("no valid input files found")]
    NoValidInput,

    #[error("unable to parse input files")]
    ParseInput,

    #[error("unable to match taxonomy to targets")]
    TaxonomyMismatch,

    #[error("unable to match specialization to targets")]
    SpecializationMismatch,

    #[error("build failed - one or more database files not found or empty: {0}")]
    BuildFailed(String),

    #[error("invalid level: {0}")]
    InvalidLevel(String),

    #[error("invalid input target: {0}")]
    InvalidInputTarget(String),

    #[error("invalid taxonomy source: {0}")]
    InvalidTaxonomy(String),

    #[error("failed to parse taxonomy file {path}: {message}")]
    TaxonomyParse { path: Utf8PathBuf, message: String },

    #[error("failed to parse input file {path}: {message}")]
    InputFileParse { path: Utf8PathBuf, message: String },

    #[error("invalid accession pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("{tool} exited with status {}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    ToolFailed { tool: String, code: Option<i32> },

    #[error("download request failed: {0}")]
    Http(String),

    #[error("download returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl KiraError {
    /// Failures of the metadata pipeline itself (nothing usable was left to
    /// index) as opposed to environment errors.
    pub fn is_pipeline_failure(&self) -> bool {
        matches!(
            self,
            KiraError::NoValidInput
                | KiraError::ParseInput
                | KiraError::TaxonomyMismatch
                | KiraError::SpecializationMismatch
                | KiraError::BuildFailed(_)
        )
    }
}
