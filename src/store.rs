use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::KiraError;
use crate::state::FsStateBackend;

/// Scoped working directory of one database prefix (`<db_prefix>_files/`).
///
/// Holds the download tool's versioned tree, the transient `build/` folder,
/// the saved configuration and the phase markers.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: Utf8PathBuf,
}

impl Workspace {
    pub fn for_prefix(db_prefix: &Utf8Path) -> Self {
        Self {
            root: Utf8PathBuf::from(format!("{db_prefix}_files")),
        }
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn build_dir(&self) -> Utf8PathBuf {
        self.root.join("build")
    }

    pub fn target_info_path(&self) -> Utf8PathBuf {
        self.build_dir().join("target_info.tsv")
    }

    pub fn assembly_summary_path(&self) -> Utf8PathBuf {
        self.root.join("assembly_summary.txt")
    }

    pub fn config_path(&self) -> Utf8PathBuf {
        self.root.join("config.json")
    }

    pub fn state_backend(&self) -> FsStateBackend {
        FsStateBackend::new(self.root.clone())
    }

    pub fn exists(&self) -> bool {
        self.root.as_std_path().is_dir()
    }

    /// Version folder the download tool's `assembly_summary.txt` symlink
    /// points into.
    pub fn current_version(&self) -> Result<String, KiraError> {
        let link = self.assembly_summary_path();
        let target = fs::read_link(link.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read link {link}: {err}")))?;
        let target = Utf8PathBuf::from_path_buf(target)
            .map_err(|_| KiraError::Filesystem("non-utf8 version link".to_string()))?;
        target
            .parent()
            .and_then(|parent| parent.file_name())
            .map(str::to_string)
            .ok_or_else(|| KiraError::Filesystem(format!("unexpected version link: {target}")))
    }

    pub fn current_files_dir(&self) -> Result<Utf8PathBuf, KiraError> {
        Ok(self.root.join(self.current_version()?).join("files"))
    }

    pub fn ensure_root(&self) -> Result<(), KiraError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    pub fn ensure_build_dir(&self) -> Result<(), KiraError> {
        fs::create_dir_all(self.build_dir().as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    /// Removes everything and recreates an empty root.
    pub fn reset(&self) -> Result<(), KiraError> {
        self.remove()?;
        self.ensure_root()
    }

    pub fn remove(&self) -> Result<(), KiraError> {
        remove_dir_if_exists(&self.root)
    }

    pub fn remove_build_dir(&self) -> Result<(), KiraError> {
        remove_dir_if_exists(&self.build_dir())
    }

    /// Moves the whole workspace next to another prefix.
    pub fn rename_to(&self, other: &Workspace) -> Result<(), KiraError> {
        if self.root == other.root {
            return Ok(());
        }
        atomic_rename_dir(self.root.as_std_path(), other.root.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("kira-db-file")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// A file counts as an output only when it exists and is not empty.
pub fn is_nonempty_file(path: &Utf8Path) -> bool {
    fs::metadata(path.as_std_path())
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

pub fn remove_file_if_exists(path: &Utf8Path) -> Result<(), KiraError> {
    match fs::remove_file(path.as_std_path()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(KiraError::Filesystem(format!("remove {path}: {err}"))),
    }
}

fn remove_dir_if_exists(path: &Utf8Path) -> Result<(), KiraError> {
    match fs::remove_dir_all(path.as_std_path()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(KiraError::Filesystem(format!("remove {path}: {err}"))),
    }
}

/// Renames `from` to `to`, refusing to replace an existing destination.
pub fn atomic_rename_dir(from: &std::path::Path, to: &std::path::Path) -> io::Result<()> {
    if to.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", to.display()),
        ));
    }
    fs::rename(from, to)
}
