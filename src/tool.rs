use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use camino::Utf8Path;
use tracing::debug;

use crate::config::{BuildConfig, IndexParams};
use crate::error::KiraError;

/// Runs external collaborators (download tool, index builder) as
/// foreground child processes. Only the exit status is consumed.
pub trait ToolRunner {
    fn run(&self, tool: &str, args: &[String], quiet: bool) -> Result<(), KiraError>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemToolRunner;

impl SystemToolRunner {
    pub fn new() -> Self {
        Self
    }

    fn resolve(&self, tool: &str) -> Result<PathBuf, KiraError> {
        let path = Path::new(tool);
        if path.components().count() > 1 {
            return path
                .exists()
                .then(|| path.to_path_buf())
                .ok_or_else(|| KiraError::MissingTool(tool.to_string()));
        }
        find_in_path(tool).ok_or_else(|| KiraError::MissingTool(tool.to_string()))
    }
}

impl ToolRunner for SystemToolRunner {
    fn run(&self, tool: &str, args: &[String], quiet: bool) -> Result<(), KiraError> {
        let program = self.resolve(tool)?;
        debug!(tool = %program.display(), args = ?args, "running");
        let mut cmd = Command::new(&program);
        cmd.args(args).stdin(Stdio::null()).stderr(Stdio::inherit());
        if quiet {
            cmd.stdout(Stdio::null());
        } else {
            cmd.stdout(Stdio::inherit());
        }
        let status = cmd
            .status()
            .map_err(|err| KiraError::Filesystem(format!("spawn {tool}: {err}")))?;
        if status.success() {
            return Ok(());
        }
        Err(KiraError::ToolFailed {
            tool: tool.to_string(),
            code: status.code(),
        })
    }
}

/// Arguments for a fresh download into `files_dir`.
pub fn genome_updater_build_args(
    config: &BuildConfig,
    files_dir: &Utf8Path,
    resume: bool,
) -> Vec<String> {
    let mut args = vec!["-d".to_string(), config.source.join(",")];
    if !config.organism_group.is_empty() {
        args.push("-g".to_string());
        args.push(config.organism_group.join(","));
    }
    if let Some(top) = config.top {
        args.push("-A".to_string());
        args.push(top.to_string());
    }
    if config.complete_genomes {
        args.push("-l".to_string());
        args.push("complete genome".to_string());
    }
    args.extend([
        "-f".to_string(),
        "genomic.fna.gz".to_string(),
        "-t".to_string(),
        config.index.threads.to_string(),
        "-o".to_string(),
        files_dir.to_string(),
    ]);
    if !config.taxonomy.is_skip() {
        args.push("-M".to_string());
        args.push(config.taxonomy.to_string());
    }
    args.push("-m".to_string());
    if resume {
        args.push("-i".to_string());
    }
    push_verbosity(&mut args, config.quiet, config.verbose);
    args.extend(config.genome_updater_args.iter().cloned());
    args
}

/// Arguments for an incremental update of an existing download.
pub fn genome_updater_update_args(files_dir: &Utf8Path, quiet: bool, verbose: bool) -> Vec<String> {
    let mut args = vec!["-o".to_string(), files_dir.to_string(), "-m".to_string()];
    push_verbosity(&mut args, quiet, verbose);
    args
}

fn push_verbosity(args: &mut Vec<String>, quiet: bool, verbose: bool) {
    if quiet {
        args.push("-s".to_string());
    }
    if !verbose {
        args.push("-w".to_string());
    }
}

/// Arguments for building `<db_prefix>.ibf` from the target-info table.
pub fn index_builder_args(
    params: &IndexParams,
    target_info: &Utf8Path,
    index_path: &Utf8Path,
    quiet: bool,
    verbose: bool,
) -> Vec<String> {
    let mut args = vec![
        "--input-file".to_string(),
        target_info.to_string(),
        "--output-file".to_string(),
        index_path.to_string(),
        "--kmer-size".to_string(),
        params.kmer_size.to_string(),
        "--window-size".to_string(),
        params.window_size.to_string(),
        "--hash-functions".to_string(),
        params.hash_functions.to_string(),
        "--threads".to_string(),
        params.threads.to_string(),
    ];
    match (params.filter_size, params.max_fp) {
        (Some(size), _) => {
            args.push("--filter-size".to_string());
            args.push(size.to_string());
        }
        (None, Some(max_fp)) => {
            args.push("--max-fp".to_string());
            args.push(max_fp.to_string());
        }
        (None, None) => {}
    }
    if quiet {
        args.push("--quiet".to_string());
    } else if verbose {
        args.push("--verbose".to_string());
    }
    args
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}
