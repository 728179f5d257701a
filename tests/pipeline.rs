use std::fs;
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use kira_db_prep::app::App;
use kira_db_prep::config::{BuildCustomConfig, ConfigLoader};
use kira_db_prep::domain::{Call, InputTarget, Level, Phase, TaxonomySource};
use kira_db_prep::error::KiraError;
use kira_db_prep::output::JsonOutput;
use kira_db_prep::remote::Downloader;
use kira_db_prep::state::{MemoryStateBackend, PhaseState, StateBackend};
use kira_db_prep::tool::ToolRunner;

const NODES: &str = "1\t|\t1\t|\tno rank\t|\n\
2\t|\t1\t|\tsuperkingdom\t|\n\
561\t|\t2\t|\tgenus\t|\n\
562\t|\t561\t|\tspecies\t|\n\
620\t|\t2\t|\tgenus\t|\n\
622\t|\t620\t|\tspecies\t|\n";

const NAMES: &str = "1\t|\troot\t|\t\t|\tscientific name\t|\n\
2\t|\tBacteria\t|\t\t|\tscientific name\t|\n\
561\t|\tEscherichia\t|\t\t|\tscientific name\t|\n\
562\t|\tEscherichia coli\t|\t\t|\tscientific name\t|\n\
620\t|\tShigella\t|\t\t|\tscientific name\t|\n\
622\t|\tShigella dysenteriae\t|\t\t|\tscientific name\t|\n";

/// Stands in for the download tool and the index builder.
#[derive(Default)]
struct MockRunner {
    calls: Mutex<Vec<String>>,
    skip_index: bool,
}

impl MockRunner {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ToolRunner for MockRunner {
    fn run(&self, tool: &str, args: &[String], _quiet: bool) -> Result<(), KiraError> {
        self.calls.lock().unwrap().push(tool.to_string());
        if let Some(pos) = args.iter().position(|arg| arg == "--output-file") {
            if !self.skip_index {
                fs::write(&args[pos + 1], b"index").unwrap();
            }
        }
        if let Some(pos) = args.iter().position(|arg| arg == "-o") {
            fake_download(Utf8Path::new(&args[pos + 1]));
        }
        Ok(())
    }
}

struct FailingRunner;

impl ToolRunner for FailingRunner {
    fn run(&self, tool: &str, _args: &[String], _quiet: bool) -> Result<(), KiraError> {
        Err(KiraError::ToolFailed {
            tool: tool.to_string(),
            code: Some(1),
        })
    }
}

struct NoDownload;

impl Downloader for NoDownload {
    fn download(&self, url: &str, _destination: &Path) -> Result<(), KiraError> {
        Err(KiraError::Http(format!("unexpected download of {url}")))
    }
}

/// Layout the download tool leaves behind: a version folder with files and
/// a summary, linked from the workspace root.
fn fake_download(root: &Utf8Path) {
    let version = "2024-01-01_00-00-00";
    let files = root.join(version).join("files");
    fs::create_dir_all(files.as_std_path()).unwrap();
    fs::write(
        files.join("GCF_000005845.2_ASM584v2_genomic.fna.gz").as_std_path(),
        b"unused",
    )
    .unwrap();
    fs::write(
        root.join(version).join("assembly_summary.txt").as_std_path(),
        "#assembly_accession\tbioproject\tbiosample\twgs_master\trefseq_category\ttaxid\tspecies_taxid\torganism_name\tinfraspecific_name\n\
GCF_000005845.2\tPRJNA57779\tSAMN02604091\t\treference genome\t562\t562\tEscherichia coli\tstrain=K-12\n",
    )
    .unwrap();
    let link = root.join("assembly_summary.txt");
    if fs::symlink_metadata(link.as_std_path()).is_err() {
        #[cfg(unix)]
        std::os::unix::fs::symlink(
            format!("{version}/assembly_summary.txt"),
            link.as_std_path(),
        )
        .unwrap();
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    dir: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        Self { _temp: temp, dir }
    }

    fn write(&self, name: &str, content: &str) -> Utf8PathBuf {
        let path = self.dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path()).unwrap();
        }
        fs::write(path.as_std_path(), content).unwrap();
        path
    }

    fn taxdump(&self) -> Utf8PathBuf {
        self.write("taxdump/nodes.dmp", NODES);
        self.write("taxdump/names.dmp", NAMES);
        self.dir.join("taxdump")
    }

    fn config(&self, prefix: &str) -> BuildCustomConfig {
        let mut config = BuildCustomConfig::new(self.dir.join(prefix));
        config.keep_files = true;
        config
    }
}

fn read_lines(path: &Utf8Path) -> Vec<String> {
    fs::read_to_string(path.as_std_path())
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn three_files_without_taxonomy() {
    let fx = Fixture::new();
    for name in ["a.fna", "b.fna", "c.fna"] {
        fx.write(&format!("refs/{name}"), ">seq\nACGT\n");
    }
    let mut config = fx.config("db");
    config.input = vec![fx.dir.join("refs")];
    config.input_extension = "fna".to_string();
    config.taxonomy = TaxonomySource::Skip;

    let app = App::new(MockRunner::default(), NoDownload);
    assert!(app.build_custom(&config, &JsonOutput).unwrap());

    let refs = fx.dir.join("refs");
    assert_eq!(
        read_lines(&config.workspace().target_info_path()),
        vec![
            format!("{refs}/a.fna\ta.fna"),
            format!("{refs}/b.fna\tb.fna"),
            format!("{refs}/c.fna\tc.fna"),
        ]
    );
    assert!(!config.tax_path().as_std_path().exists());
    assert!(config.index_path().as_std_path().exists());
}

#[test]
fn unresolvable_sequence_node_is_dropped() {
    let fx = Fixture::new();
    let fasta = fx.write(
        "refs/multi.fna",
        ">NC_1.1 one\nA\n>NC_2.1 two\nC\n>NC_3.1\nG\n>NC_4.1\nT\n>NC_5.1 lost\nA\n",
    );
    let acc2taxid = fx.write(
        "nucl.accession2taxid",
        "accession\taccession.version\ttaxid\tgi\n\
NC_1\tNC_1.1\t562\t1\n\
NC_2\tNC_2.1\t562\t2\n\
NC_3\tNC_3.1\t622\t3\n\
NC_4\tNC_4.1\t561\t4\n\
NC_5\tNC_5.1\t999999\t5\n",
    );
    let mut config = fx.config("db");
    config.input = vec![fasta.clone()];
    config.input_target = Some(InputTarget::Sequence);
    config.taxonomy_files = vec![fx.taxdump()];
    config.ncbi_sequence_info = vec![acc2taxid];

    let app = App::new(MockRunner::default(), NoDownload);
    assert!(app.build_custom(&config, &JsonOutput).unwrap());

    let rows = read_lines(&config.workspace().target_info_path());
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0], format!("{fasta}\tNC_1.1\tNC_1.1"));
    assert!(rows.iter().all(|row| !row.contains("NC_5.1")));

    let tax = read_lines(&config.tax_path());
    assert!(tax.contains(&"NC_3.1\t622\tsequence\tNC_3.1".to_string()));
    assert!(tax.contains(&"620\t2\tgenus\tShigella".to_string()));
    let ids: Vec<&str> = tax.iter().map(|row| row.split('\t').next().unwrap()).collect();
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), ids.len());
}

#[test]
fn shared_specialization_under_two_nodes_is_replaced() {
    let fx = Fixture::new();
    let input = fx.write(
        "input.tsv",
        "/refs/a.fna\tT1\t562\tX\tStrain X\n\
/refs/b.fna\tT2\t622\tX\tStrain X\n\
/refs/c.fna\tT3\t562\tY\tStrain Y\n",
    );
    let mut config = fx.config("db");
    config.input_file = Some(input);
    config.level = Some(Level::Assembly);
    config.taxonomy_files = vec![fx.taxdump()];

    let app = App::new(MockRunner::default(), NoDownload);
    assert!(app.build_custom(&config, &JsonOutput).unwrap());

    assert_eq!(
        read_lines(&config.workspace().target_info_path()),
        vec!["/refs/a.fna\tT1", "/refs/b.fna\tT2", "/refs/c.fna\tY"]
    );
    let tax = read_lines(&config.tax_path());
    assert!(tax.contains(&"T1\t562\tassembly\tT1".to_string()));
    assert!(tax.contains(&"Y\t562\tassembly\tStrain Y".to_string()));
    assert!(!tax.iter().any(|row| row.starts_with("X\t")));
}

#[test]
fn rank_level_projects_nodes() {
    let fx = Fixture::new();
    let input = fx.write(
        "input.tsv",
        "/refs/a.fna\tA\t562\t\t\n/refs/b.fna\tB\t622\t\t\n/refs/c.fna\tC\t2\t\t\n",
    );
    let mut config = fx.config("db");
    config.input_file = Some(input);
    config.level = Some(Level::Rank("genus".to_string()));
    config.taxonomy_files = vec![fx.taxdump()];

    let app = App::new(MockRunner::default(), NoDownload);
    assert!(app.build_custom(&config, &JsonOutput).unwrap());

    assert_eq!(
        read_lines(&config.workspace().target_info_path()),
        vec!["/refs/a.fna\t561", "/refs/b.fna\t620"]
    );
    let tax = read_lines(&config.tax_path());
    assert!(!tax.iter().any(|row| row.starts_with("562\t")));
    assert_eq!(tax.len(), 4);
}

#[test]
fn unknown_rank_falls_back_to_leaves() {
    let fx = Fixture::new();
    let input = fx.write("input.tsv", "/refs/a.fna\tA\t562\t\t\n");
    let mut config = fx.config("db");
    config.input_file = Some(input);
    config.level = Some(Level::Rank("subspecies".to_string()));
    config.taxonomy_files = vec![fx.taxdump()];

    let app = App::new(MockRunner::default(), NoDownload);
    assert!(app.build_custom(&config, &JsonOutput).unwrap());
    assert_eq!(
        read_lines(&config.workspace().target_info_path()),
        vec!["/refs/a.fna\t562"]
    );
}

#[test]
fn info_file_feeds_a_later_build() {
    let fx = Fixture::new();
    let input = fx.write(
        "input.tsv",
        "/refs/a.fna\tA\t562\tS1\tFirst\n/refs/b.fna\tB\t622\t\t\n",
    );
    let mut first = fx.config("first");
    first.input_file = Some(input);
    first.level = Some(Level::Custom);
    first.taxonomy_files = vec![fx.taxdump()];
    first.write_info_file = true;

    let app = App::new(MockRunner::default(), NoDownload);
    assert!(app.build_custom(&first, &JsonOutput).unwrap());
    assert_eq!(
        read_lines(&first.info_path()),
        vec!["/refs/a.fna\tA\t562\tS1\tFirst", "/refs/b.fna\tB\t622\tB\tB"]
    );

    let mut second = fx.config("second");
    second.input_file = Some(first.info_path());
    second.level = Some(Level::Custom);
    second.taxonomy_files = first.taxonomy_files.clone();
    assert!(app.build_custom(&second, &JsonOutput).unwrap());
    assert_eq!(
        read_lines(&second.workspace().target_info_path()),
        read_lines(&first.workspace().target_info_path())
    );
    assert_eq!(read_lines(&second.tax_path()), read_lines(&first.tax_path()));
}

#[test]
fn no_matching_input_reports_failure() {
    let fx = Fixture::new();
    fx.write("refs/notes.txt", "nothing");
    let mut config = fx.config("db");
    config.input = vec![fx.dir.join("refs")];
    config.taxonomy = TaxonomySource::Skip;

    let runner = MockRunner::default();
    let app = App::new(runner, NoDownload);
    assert!(!app.build_custom(&config, &JsonOutput).unwrap());
    assert!(!config.index_path().as_std_path().exists());
}

#[test]
fn unmatched_taxonomy_reports_failure() {
    let fx = Fixture::new();
    let input = fx.write("input.tsv", "/refs/a.fna\tA\t777\t\t\n");
    let mut config = fx.config("db");
    config.input_file = Some(input);
    config.taxonomy_files = vec![fx.taxdump()];

    let app = App::new(MockRunner::default(), NoDownload);
    assert!(!app.build_custom(&config, &JsonOutput).unwrap());
}

#[test]
fn missing_index_keeps_markers() {
    let fx = Fixture::new();
    fx.write("refs/a.fna", ">s\nA\n");
    let mut config = fx.config("db");
    config.input = vec![fx.dir.join("refs")];
    config.input_extension = String::new();
    config.taxonomy = TaxonomySource::Skip;

    let runner = MockRunner {
        skip_index: true,
        ..MockRunner::default()
    };
    let app = App::new(runner, NoDownload);
    let workspace = config.workspace();
    let backend = MemoryStateBackend::new();
    let built = app
        .build_custom_with(&config, Call::BuildCustom, &workspace, &backend, &JsonOutput)
        .unwrap();
    assert!(!built);

    let state = PhaseState::new(Call::BuildCustom, &backend);
    assert!(state.is_marked(Phase::Parse).unwrap());
    assert!(state.is_marked(Phase::Run).unwrap());
}

#[test]
fn index_tool_failure_is_an_error() {
    let fx = Fixture::new();
    fx.write("refs/a.fna", ">s\nA\n");
    let mut config = fx.config("db");
    config.input = vec![fx.dir.join("refs/a.fna")];
    config.input_extension = String::new();
    config.taxonomy = TaxonomySource::Skip;

    let app = App::new(FailingRunner, NoDownload);
    let err = app.build_custom(&config, &JsonOutput).unwrap_err();
    assert_matches!(err, KiraError::ToolFailed { code: Some(1), .. });

    let backend = config.workspace().state_backend();
    assert!(backend.exists(&Phase::Parse.marker_name(Call::BuildCustom)).unwrap());
    assert!(!backend.exists(&Phase::Run.marker_name(Call::BuildCustom)).unwrap());
}

#[test]
fn restart_recomputes_marked_phases() {
    let fx = Fixture::new();
    fx.write("refs/a.fna", ">s\nA\n");
    let mut config = fx.config("db");
    config.input = vec![fx.dir.join("refs/a.fna")];
    config.input_extension = String::new();
    config.input_target = Some(InputTarget::File);
    config.taxonomy = TaxonomySource::Skip;

    let workspace = config.workspace();
    let backend = workspace.state_backend();
    let state = PhaseState::new(Call::BuildCustom, &backend);
    state.mark(Phase::Parse).unwrap();
    state.mark(Phase::Run).unwrap();
    fx.write("db_files/build/target_info.tsv", "stale\tstale\n");

    let app = App::new(MockRunner::default(), NoDownload);
    config.restart = true;
    assert!(app.build_custom(&config, &JsonOutput).unwrap());
    assert_eq!(app_calls(&app), vec!["ganon-build"]);
    assert_eq!(
        read_lines(&workspace.target_info_path()),
        vec![format!("{}/refs/a.fna\ta.fna", fx.dir)]
    );
}

#[test]
fn finished_custom_build_removes_workspace() {
    let fx = Fixture::new();
    fx.write("refs/a.fna", ">s\nA\n");
    let mut config = fx.config("db");
    config.input = vec![fx.dir.join("refs/a.fna")];
    config.input_extension = String::new();
    config.taxonomy = TaxonomySource::Skip;
    config.keep_files = false;

    let app = App::new(MockRunner::default(), NoDownload);
    assert!(app.build_custom(&config, &JsonOutput).unwrap());
    assert!(!config.workspace().exists());
}

#[cfg(unix)]
#[test]
fn build_then_update_to_new_prefix() {
    use kira_db_prep::config::{BuildConfig, UpdateConfig};

    let fx = Fixture::new();
    let mut build = BuildConfig::new(fx.dir.join("db"));
    build.taxonomy_files = vec![fx.taxdump()];

    let app = App::new(MockRunner::default(), NoDownload);
    assert!(app.build(&build, &JsonOutput).unwrap());
    assert_eq!(app_calls(&app), vec!["genome_updater.sh", "ganon-build"]);

    let workspace = kira_db_prep::store::Workspace::for_prefix(&build.db_prefix);
    assert!(!workspace.build_dir().as_std_path().exists());
    let tax = read_lines(&fx.dir.join("db.tax"));
    assert!(tax.contains(&"GCF_000005845.2\t562\tassembly\tEscherichia coli K-12".to_string()));
    let saved = ConfigLoader::load(&workspace.config_path()).unwrap();
    assert_eq!(saved.level, Some(Level::Assembly));

    let mut update = UpdateConfig::new(build.db_prefix.clone());
    update.output_db_prefix = Some(fx.dir.join("db2"));
    assert!(app.update(&update, &JsonOutput).unwrap());

    assert!(fx.dir.join("db2.ibf").as_std_path().exists());
    assert!(fx.dir.join("db2.tax").as_std_path().exists());
    assert!(!workspace.exists());
    let saved = ConfigLoader::load(&fx.dir.join("db2_files/config.json")).unwrap();
    assert_eq!(saved.db_prefix, fx.dir.join("db2"));
}

#[test]
fn all_null_specialization_reports_failure() {
    let fx = Fixture::new();
    let input = fx.write("input.tsv", "/r/a.fna\tA\t\t\t\n/r/b.fna\tB\t\t\t\n");
    let mut config = fx.config("db");
    config.input_file = Some(input);
    config.level = Some(Level::Custom);
    config.taxonomy = TaxonomySource::Skip;

    let app = App::new(MockRunner::default(), NoDownload);
    assert!(!app.build_custom(&config, &JsonOutput).unwrap());
    assert!(!config.workspace().target_info_path().as_std_path().exists());
    assert!(app_calls(&app).is_empty());
}

/// Marker store that cannot persist anything.
struct ReadOnlyState;

impl StateBackend for ReadOnlyState {
    fn exists(&self, _name: &str) -> Result<bool, KiraError> {
        Ok(false)
    }

    fn create(&self, name: &str) -> Result<(), KiraError> {
        Err(KiraError::Filesystem(format!("write marker {name}: read-only")))
    }

    fn remove(&self, _name: &str) -> Result<(), KiraError> {
        Ok(())
    }
}

#[test]
fn marker_write_failure_stops_before_index() {
    let fx = Fixture::new();
    fx.write("refs/a.fna", ">s\nA\n");
    let mut config = fx.config("db");
    config.input = vec![fx.dir.join("refs/a.fna")];
    config.input_extension = String::new();
    config.taxonomy = TaxonomySource::Skip;

    let app = App::new(MockRunner::default(), NoDownload);
    let workspace = config.workspace();
    let err = app
        .build_custom_with(&config, Call::BuildCustom, &workspace, &ReadOnlyState, &JsonOutput)
        .unwrap_err();
    assert_matches!(err, KiraError::Filesystem(_));
    assert!(app_calls(&app).is_empty());
    assert!(!config.index_path().as_std_path().exists());
}

#[cfg(unix)]
#[test]
fn update_keeps_existing_output_workspace() {
    use kira_db_prep::config::{BuildConfig, UpdateConfig};

    let fx = Fixture::new();
    let mut build = BuildConfig::new(fx.dir.join("db"));
    build.taxonomy_files = vec![fx.taxdump()];
    let app = App::new(MockRunner::default(), NoDownload);
    assert!(app.build(&build, &JsonOutput).unwrap());

    let existing = fx.write("db2_files/config.json", "{}");
    let mut update = UpdateConfig::new(build.db_prefix.clone());
    update.output_db_prefix = Some(fx.dir.join("db2"));
    let err = app.update(&update, &JsonOutput).unwrap_err();
    assert_matches!(err, KiraError::Filesystem(_));

    assert_eq!(fs::read_to_string(existing.as_std_path()).unwrap(), "{}");
    assert!(fx.dir.join("db_files/config.json").as_std_path().is_file());
    assert_eq!(app_calls(&app), vec!["genome_updater.sh", "ganon-build"]);
}

fn app_calls<D: Downloader>(app: &App<MockRunner, D>) -> Vec<String> {
    app.runner().calls()
}
