use std::collections::HashSet;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{error, info, warn};

use crate::accession::{self, AccessionParser};
use crate::config::{BuildConfig, BuildCustomConfig, ConfigLoader, IndexParams, UpdateConfig};
use crate::domain::{BinColumn, Call, InputTarget, Level, Phase, TaxonomySource};
use crate::error::KiraError;
use crate::info;
use crate::input;
use crate::output;
use crate::remote::{self, Downloader};
use crate::state::{PhaseState, StateBackend};
use crate::store::{Workspace, is_nonempty_file};
use crate::table::{InfoKey, MetadataTable};
use crate::taxonomy::{self, Taxonomy};
use crate::tool::{self, ToolRunner};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, message: impl Into<String>, elapsed: Option<Duration>) {
    sink.event(ProgressEvent {
        message: message.into(),
        elapsed,
    });
}

/// Drives the download, parse and index phases of a database build.
#[derive(Clone)]
pub struct App<R: ToolRunner, D: Downloader> {
    runner: R,
    downloader: D,
}

impl<R: ToolRunner, D: Downloader> App<R, D> {
    pub fn new(runner: R, downloader: D) -> Self {
        Self { runner, downloader }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Downloads reference assemblies with the download tool and builds a
    /// per-assembly database from them.
    pub fn build(&self, config: &BuildConfig, sink: &dyn ProgressSink) -> Result<bool, KiraError> {
        let workspace = Workspace::for_prefix(&config.db_prefix);
        if config.restart {
            workspace.reset()?;
        }
        workspace.ensure_root()?;
        let backend = workspace.state_backend();
        let state = PhaseState::new(Call::Build, &backend);

        let summary = workspace.assembly_summary_path();
        if state.is_marked(Phase::Download)? && is_nonempty_file(&summary) {
            info!("download finished - skipping");
        } else {
            let resume = is_nonempty_file(&summary)
                && workspace
                    .current_files_dir()
                    .map(|dir| dir.as_std_path().is_dir())
                    .unwrap_or(false);
            if resume {
                info!("incomplete files detected, resuming download");
            }
            emit(
                sink,
                format!(
                    "phase=Download; {} [{}]",
                    config.source.join(","),
                    config.organism_group.join(",")
                ),
                None,
            );
            let start = Instant::now();
            let args = tool::genome_updater_build_args(config, workspace.root(), resume);
            self.runner
                .run(&config.tools.genome_updater, &args, config.quiet)?;
            emit(sink, "phase=Download; done", Some(start.elapsed()));
            state.mark(Phase::Download)?;
        }

        let core = BuildCustomConfig {
            input: vec![workspace.current_files_dir()?],
            input_target: Some(InputTarget::File),
            level: Some(Level::Assembly),
            taxonomy: config.taxonomy,
            taxonomy_files: config.taxonomy_files.clone(),
            ncbi_file_info: vec![summary],
            quiet: config.quiet,
            verbose: config.verbose,
            index: config.index.clone(),
            tools: config.tools.clone(),
            ..BuildCustomConfig::new(config.db_prefix.clone())
        };
        ConfigLoader::save(&workspace.config_path(), &core)?;

        let built = self.build_custom_with(&core, Call::Build, &workspace, &backend, sink)?;
        if built {
            info!(
                workspace = %workspace.root(),
                "workspace keeps reference sequences and configuration for later updates"
            );
        }
        Ok(built)
    }

    /// Refreshes a database created by [`App::build`] with new and changed
    /// assemblies, reusing its saved configuration.
    pub fn update(
        &self,
        config: &UpdateConfig,
        sink: &dyn ProgressSink,
    ) -> Result<bool, KiraError> {
        let workspace = Workspace::for_prefix(&config.db_prefix);
        let saved = ConfigLoader::load(&workspace.config_path())?;
        let output_prefix = config
            .output_db_prefix
            .clone()
            .unwrap_or_else(|| config.db_prefix.clone());
        let target = Workspace::for_prefix(&output_prefix);
        if target.root() != workspace.root() && target.exists() {
            return Err(KiraError::Filesystem(format!(
                "output workspace {} already exists",
                target.root()
            )));
        }
        let backend = workspace.state_backend();
        let state = PhaseState::new(Call::Update, &backend);
        if config.restart {
            state.clear_all()?;
        }

        if state.is_marked(Phase::Download)? {
            info!("download finished - skipping");
        } else {
            emit(sink, "phase=Download; updating files", None);
            let start = Instant::now();
            let args =
                tool::genome_updater_update_args(workspace.root(), config.quiet, config.verbose);
            self.runner
                .run(&config.tools.genome_updater, &args, config.quiet)?;
            emit(sink, "phase=Download; done", Some(start.elapsed()));
            state.mark(Phase::Download)?;
        }

        let core = BuildCustomConfig {
            input: vec![workspace.current_files_dir()?],
            input_target: Some(InputTarget::File),
            level: Some(Level::Assembly),
            taxonomy: saved.taxonomy,
            taxonomy_files: saved.taxonomy_files,
            ncbi_file_info: vec![workspace.assembly_summary_path()],
            quiet: config.quiet,
            verbose: config.verbose,
            index: IndexParams {
                threads: config.threads,
                ..saved.index
            },
            tools: config.tools.clone(),
            ..BuildCustomConfig::new(output_prefix)
        };

        let built = self.build_custom_with(&core, Call::Update, &workspace, &backend, sink)?;
        if built {
            workspace.rename_to(&target)?;
            ConfigLoader::save(&target.config_path(), &core)?;
        }
        Ok(built)
    }

    /// Builds a database from user supplied files or an input table.
    pub fn build_custom(
        &self,
        config: &BuildCustomConfig,
        sink: &dyn ProgressSink,
    ) -> Result<bool, KiraError> {
        let workspace = config.workspace();
        if config.restart {
            workspace.reset()?;
        }
        workspace.ensure_root()?;
        let backend = workspace.state_backend();
        self.build_custom_with(config, Call::BuildCustom, &workspace, &backend, sink)
    }

    /// Parse and index phases on an explicit workspace and marker backend.
    ///
    /// Returns `Ok(false)` when the inputs leave nothing to index or the
    /// expected database files are missing afterwards; markers of completed
    /// phases are kept so a rerun resumes.
    pub fn build_custom_with(
        &self,
        config: &BuildCustomConfig,
        call: Call,
        workspace: &Workspace,
        backend: &dyn StateBackend,
        sink: &dyn ProgressSink,
    ) -> Result<bool, KiraError> {
        let state = PhaseState::new(call, backend);

        let target_info = workspace.target_info_path();
        if state.is_marked(Phase::Parse)? && target_info.as_std_path().is_file() {
            info!("parse finished - skipping");
        } else {
            let start = Instant::now();
            match self.parse(config, workspace, sink) {
                Ok(()) => {}
                Err(err) if err.is_pipeline_failure() => {
                    error!("{err}");
                    return Ok(false);
                }
                Err(err) => return Err(err),
            }
            emit(sink, "phase=Parse; done", Some(start.elapsed()));
            state.mark(Phase::Parse)?;
        }

        let index = config.index_path();
        if state.is_marked(Phase::Run)? {
            info!("build finished - skipping");
        } else {
            emit(sink, format!("phase=Run; building {index}"), None);
            let start = Instant::now();
            let args = tool::index_builder_args(
                &config.index,
                &target_info,
                &index,
                config.quiet,
                config.verbose,
            );
            self.runner
                .run(&config.tools.index_builder, &args, config.quiet)?;
            emit(sink, "phase=Run; done", Some(start.elapsed()));
            state.mark(Phase::Run)?;
        }

        let mut expected = vec![index];
        if !config.taxonomy.is_skip() {
            expected.push(config.tax_path());
        }
        let missing: Vec<String> = expected
            .iter()
            .filter(|path| !is_nonempty_file(path))
            .map(|path| path.to_string())
            .collect();
        if !missing.is_empty() {
            error!("{}", KiraError::BuildFailed(missing.join(", ")));
            return Ok(false);
        }

        if call == Call::BuildCustom && !config.keep_files {
            workspace.remove()?;
        } else {
            if call != Call::BuildCustom {
                workspace.remove_build_dir()?;
            }
            state.clear_all()?;
        }
        let files: Vec<&str> = expected.iter().map(|path| path.as_str()).collect();
        info!(database = %files.join(", "), "build finished successfully");
        Ok(true)
    }

    fn parse(
        &self,
        config: &BuildCustomConfig,
        workspace: &Workspace,
        sink: &dyn ProgressSink,
    ) -> Result<(), KiraError> {
        workspace.ensure_build_dir()?;
        let build_dir = workspace.build_dir();

        let input_files = match (&config.input_file, config.input.is_empty()) {
            (Some(_), _) => Vec::new(),
            (None, false) => input::resolve_inputs(&config.input, Some(&config.input_extension))?,
            (None, true) => return Err(KiraError::NoValidInput),
        };
        let input_target = input::infer_input_target(
            config.input_target,
            input_files.len(),
            config.input_file.is_some(),
        );

        let tax = match config.taxonomy {
            TaxonomySource::Skip => None,
            source => {
                emit(sink, format!("phase=Parse; loading {source} taxonomy"), None);
                Some(taxonomy::load_taxonomy(
                    source,
                    &config.taxonomy_files,
                    &build_dir,
                    &self.downloader,
                )?)
            }
        };
        let level = match &tax {
            Some(tax) => taxonomy::resolve_level(config.level.clone(), tax.as_ref()),
            None => config.level.clone(),
        };

        let raw = match &config.input_file {
            Some(path) => {
                emit(sink, format!("phase=Parse; reading {path}"), None);
                accession::parse_input_file(path, input_target)?
            }
            None => {
                emit(
                    sink,
                    format!("phase=Parse; {} input files by {input_target}", input_files.len()),
                    None,
                );
                match input_target {
                    InputTarget::Sequence => accession::parse_sequences(&input_files)?,
                    InputTarget::File => AccessionParser::new()?.parse_files(&input_files),
                }
            }
        };

        let (mut table, report) = MetadataTable::from_raw(raw);
        if report.invalid_entries > 0 {
            warn!(count = report.invalid_entries, "invalid entries skipped");
        }
        if report.invalid_targets > 0 {
            warn!(count = report.invalid_targets, "invalid targets skipped");
        }
        if report.duplicated_targets > 0 {
            warn!(count = report.duplicated_targets, "duplicated targets skipped");
        }
        info!(count = table.len(), "unique entries");
        if table.is_empty() {
            return Err(KiraError::ParseInput);
        }

        if (tax.is_some() || level == Some(Level::Assembly)) && config.input_file.is_none() {
            table = self.enrich(config, table, input_target, tax.as_deref(), &build_dir)?;
        }

        if let Some(tax) = &tax {
            let (validated, dropped) = table.validate_taxonomy(tax.as_ref(), level.as_ref());
            table = validated;
            if dropped > 0 {
                warn!(count = dropped, "entries without valid taxonomic nodes skipped");
            }
            if table.is_empty() {
                return Err(KiraError::TaxonomyMismatch);
            }
        }

        if level.as_ref().is_some_and(Level::is_specialization) {
            let (validated, report) = table.validate_specialization();
            table = validated;
            if report.absent {
                info!("no specialization provided or retrieved");
            }
            if report.replaced > 0 {
                warn!(count = report.replaced, "invalid specialization entries replaced by target");
            }
            if report.dropped > 0 {
                warn!(count = report.dropped, "entries without valid specialization skipped");
            }
            if table.is_empty() {
                return Err(KiraError::SpecializationMismatch);
            }
        }

        let bin = BinColumn::for_level(level.as_ref());
        if let Some(tax) = &tax {
            let filtered = tax.filtered(&table.nodes());
            let rank_label = match &level {
                Some(level) => level.to_string(),
                None => input_target.to_string(),
            };
            output::write_tax(&config.tax_path(), &filtered, &table, bin, &rank_label)?;
        }
        output::write_target_info(&workspace.target_info_path(), &table, bin, input_target)?;
        if config.write_info_file {
            output::write_info(&config.info_path(), &table)?;
        }
        info!(targets = table.len(), "metadata written");
        Ok(())
    }

    /// Pulls node and specialization info for files (assembly summaries) or
    /// sequences (accession2taxid), downloading default tables if none were
    /// configured.
    fn enrich(
        &self,
        config: &BuildCustomConfig,
        table: MetadataTable,
        input_target: InputTarget,
        tax: Option<&dyn Taxonomy>,
        build_dir: &Utf8Path,
    ) -> Result<MetadataTable, KiraError> {
        match input_target {
            InputTarget::File => {
                let files = self.info_files(
                    &config.ncbi_file_info,
                    &info::ASSEMBLY_SUMMARY_URLS,
                    build_dir,
                )?;
                let summary = info::load_assembly_summary(&files)?;
                let (table, matched) = table.enrich(&summary, InfoKey::Specialization);
                info!(matched, "file info retrieved");
                match tax.filter(|tax| tax.source() == TaxonomySource::Gtdb) {
                    Some(tax) => {
                        let (table, assigned) = table.assign_nodes(|row| {
                            row.specialization
                                .as_deref()
                                .and_then(|accession| tax.assignment(accession))
                        });
                        info!(assigned, "nodes assigned from gtdb");
                        Ok(table)
                    }
                    None => Ok(table),
                }
            }
            InputTarget::Sequence => {
                let files = self.info_files(
                    &config.ncbi_sequence_info,
                    &info::ACCESSION2TAXID_URLS,
                    build_dir,
                )?;
                let wanted: HashSet<String> =
                    table.info_keys(InfoKey::Target).into_iter().collect();
                let taxids = info::load_accession2taxid(&files, &wanted)?;
                let (table, matched) = table.enrich(&taxids, InfoKey::Target);
                info!(matched, "sequence info retrieved");
                Ok(table)
            }
        }
    }

    fn info_files(
        &self,
        configured: &[Utf8PathBuf],
        defaults: &[&str],
        build_dir: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, KiraError> {
        if configured.is_empty() {
            remote::download_all(&self.downloader, defaults, build_dir)
        } else {
            Ok(configured.to_vec())
        }
    }
}
