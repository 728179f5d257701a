use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kira_db_prep::app::{App, ProgressSink};
use kira_db_prep::config::{
    BuildConfig, BuildCustomConfig, DEFAULT_GENOME_UPDATER, DEFAULT_INDEX_BUILDER,
    DEFAULT_INPUT_EXTENSION, IndexParams, ToolPaths, UpdateConfig,
};
use kira_db_prep::domain::{InputTarget, Level, TaxonomySource};
use kira_db_prep::error::KiraError;
use kira_db_prep::output::{BuildSummary, JsonOutput, LogSink, OutputMode};
use kira_db_prep::remote::HttpDownloader;
use kira_db_prep::tool::SystemToolRunner;

#[derive(Parser)]
#[command(name = "kira-db")]
#[command(about = "Prepare reference metadata and taxonomy for sequence-classification databases")]
#[command(version, author)]
struct Cli {
    #[arg(long, short, global = true)]
    quiet: bool,

    #[arg(long, global = true)]
    verbose: bool,

    /// Print a JSON summary on stdout instead of progress logs
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download reference assemblies and build a database")]
    Build(BuildArgs),
    #[command(about = "Update a database created with build")]
    Update(UpdateArgs),
    #[command(about = "Build a database from local files or an input table")]
    BuildCustom(BuildCustomArgs),
}

#[derive(Args)]
struct BuildArgs {
    #[arg(long, short = 'd')]
    db_prefix: Utf8PathBuf,

    #[arg(long, short = 's', value_delimiter = ',', default_value = "refseq")]
    source: Vec<String>,

    #[arg(long, short = 'g', value_delimiter = ',')]
    organism_group: Vec<String>,

    #[arg(long, short = 'a')]
    top: Option<u32>,

    #[arg(long, short = 'c')]
    complete_genomes: bool,

    /// Extra arguments for the download tool, space separated
    #[arg(long, allow_hyphen_values = true)]
    genome_updater: Option<String>,

    #[arg(long, value_enum, default_value_t = TaxonomySource::Ncbi)]
    taxonomy: TaxonomySource,

    #[arg(long, short = 'z', num_args = 1..)]
    taxonomy_files: Vec<Utf8PathBuf>,

    #[arg(long)]
    restart: bool,

    #[command(flatten)]
    index: IndexArgs,

    #[command(flatten)]
    tools: ToolArgs,
}

#[derive(Args)]
struct UpdateArgs {
    #[arg(long, short = 'd')]
    db_prefix: Utf8PathBuf,

    #[arg(long, short = 'o')]
    output_db_prefix: Option<Utf8PathBuf>,

    #[arg(long, short = 't', default_value_t = 12)]
    threads: usize,

    #[arg(long)]
    restart: bool,

    #[command(flatten)]
    tools: ToolArgs,
}

#[derive(Args)]
struct BuildCustomArgs {
    #[arg(long, short = 'd')]
    db_prefix: Utf8PathBuf,

    /// Input files or folders (folders are not searched recursively)
    #[arg(long, short = 'i', num_args = 1..)]
    input: Vec<Utf8PathBuf>,

    /// Required file name suffix; empty accepts every file
    #[arg(long, short = 'e', default_value = DEFAULT_INPUT_EXTENSION)]
    input_extension: String,

    /// Tab-separated file, target, node, specialization, specialization name
    #[arg(long, short = 'n', conflicts_with = "input")]
    input_file: Option<Utf8PathBuf>,

    #[arg(long, value_enum)]
    input_target: Option<InputTarget>,

    /// Taxonomic rank, leaves, assembly or custom
    #[arg(long, short = 'l')]
    level: Option<Level>,

    #[arg(long, value_enum, default_value_t = TaxonomySource::Ncbi)]
    taxonomy: TaxonomySource,

    #[arg(long, short = 'z', num_args = 1..)]
    taxonomy_files: Vec<Utf8PathBuf>,

    #[arg(long, short = 'M', num_args = 1..)]
    ncbi_file_info: Vec<Utf8PathBuf>,

    #[arg(long, short = 'm', num_args = 1..)]
    ncbi_sequence_info: Vec<Utf8PathBuf>,

    /// Also write the validated table as <db_prefix>.info.tsv
    #[arg(long)]
    write_info_file: bool,

    #[arg(long)]
    keep_files: bool,

    #[arg(long)]
    restart: bool,

    #[command(flatten)]
    index: IndexArgs,

    #[command(flatten)]
    tools: ToolArgs,
}

#[derive(Args)]
struct IndexArgs {
    #[arg(long, short = 't', default_value_t = 12)]
    threads: usize,

    #[arg(long, short = 'p')]
    max_fp: Option<f64>,

    /// Filter size in megabytes
    #[arg(long, short = 'f', conflicts_with = "max_fp")]
    filter_size: Option<f64>,

    #[arg(long, short = 'k', default_value_t = 19)]
    kmer_size: u32,

    #[arg(long, short = 'w', default_value_t = 31)]
    window_size: u32,

    #[arg(long, default_value_t = 4)]
    hash_functions: u32,
}

impl IndexArgs {
    fn into_params(self) -> IndexParams {
        let defaults = IndexParams::default();
        IndexParams {
            threads: self.threads,
            max_fp: match self.filter_size {
                Some(_) => None,
                None => self.max_fp.or(defaults.max_fp),
            },
            filter_size: self.filter_size,
            kmer_size: self.kmer_size,
            window_size: self.window_size,
            hash_functions: self.hash_functions,
        }
    }
}

#[derive(Args)]
struct ToolArgs {
    #[arg(long, default_value = DEFAULT_GENOME_UPDATER)]
    genome_updater_path: String,

    #[arg(long, default_value = DEFAULT_INDEX_BUILDER)]
    index_builder_path: String,
}

impl From<ToolArgs> for ToolPaths {
    fn from(value: ToolArgs) -> Self {
        ToolPaths {
            genome_updater: value.genome_updater_path,
            index_builder: value.index_builder_path,
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(kira) = report.downcast_ref::<KiraError>() {
                return ExitCode::from(map_exit_code(kira));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::NoValidInput
        | KiraError::ParseInput
        | KiraError::TaxonomyMismatch
        | KiraError::SpecializationMismatch
        | KiraError::InvalidLevel(_)
        | KiraError::InvalidInputTarget(_)
        | KiraError::InvalidTaxonomy(_)
        | KiraError::TaxonomyParse { .. }
        | KiraError::InputFileParse { .. }
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_) => 2,
        KiraError::MissingTool(_)
        | KiraError::ToolFailed { .. }
        | KiraError::Http(_)
        | KiraError::HttpStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<bool> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &LogSink,
    };
    let app = App::new(SystemToolRunner::new(), HttpDownloader::new()?);

    let summary = match cli.command {
        Commands::Build(args) => {
            let config = BuildConfig {
                db_prefix: args.db_prefix,
                source: args.source,
                organism_group: args.organism_group,
                top: args.top,
                complete_genomes: args.complete_genomes,
                genome_updater_args: args
                    .genome_updater
                    .as_deref()
                    .map(|extra| extra.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default(),
                taxonomy: args.taxonomy,
                taxonomy_files: args.taxonomy_files,
                restart: args.restart,
                quiet: cli.quiet,
                verbose: cli.verbose,
                index: args.index.into_params(),
                tools: args.tools.into(),
            };
            let success = app.build(&config, sink)?;
            build_summary("build", success, &config.db_prefix, config.taxonomy)
        }
        Commands::Update(args) => {
            let config = UpdateConfig {
                db_prefix: args.db_prefix,
                output_db_prefix: args.output_db_prefix,
                threads: args.threads,
                restart: args.restart,
                quiet: cli.quiet,
                verbose: cli.verbose,
                tools: args.tools.into(),
            };
            let success = app.update(&config, sink)?;
            let prefix = config.output_db_prefix.as_ref().unwrap_or(&config.db_prefix);
            BuildSummary {
                call: "update".to_string(),
                success,
                db_prefix: prefix.to_string(),
                files: vec![format!("{prefix}.ibf")],
            }
        }
        Commands::BuildCustom(args) => {
            let config = BuildCustomConfig {
                db_prefix: args.db_prefix,
                input: args.input,
                input_extension: args.input_extension,
                input_file: args.input_file,
                input_target: args.input_target,
                level: args.level,
                taxonomy: args.taxonomy,
                taxonomy_files: args.taxonomy_files,
                ncbi_file_info: args.ncbi_file_info,
                ncbi_sequence_info: args.ncbi_sequence_info,
                write_info_file: args.write_info_file,
                keep_files: args.keep_files,
                restart: args.restart,
                quiet: cli.quiet,
                verbose: cli.verbose,
                index: args.index.into_params(),
                tools: args.tools.into(),
            };
            let success = app.build_custom(&config, sink)?;
            build_summary("build-custom", success, &config.db_prefix, config.taxonomy)
        }
    };

    if matches!(output_mode, OutputMode::Json) {
        JsonOutput::print_summary(&summary).map_err(|err| miette::miette!("{err}"))?;
    }
    Ok(summary.success)
}

fn build_summary(
    call: &str,
    success: bool,
    db_prefix: &Utf8Path,
    taxonomy: TaxonomySource,
) -> BuildSummary {
    let mut files = vec![format!("{db_prefix}.ibf")];
    if !taxonomy.is_skip() {
        files.push(format!("{db_prefix}.tax"));
    }
    BuildSummary {
        call: call.to_string(),
        success,
        db_prefix: db_prefix.to_string(),
        files,
    }
}

fn init_tracing(quiet: bool, verbose: bool) {
    let default_level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
