use std::collections::HashSet;
use std::fs;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{Call, Phase};
use crate::error::KiraError;

/// Storage for named completion markers.
pub trait StateBackend {
    fn exists(&self, name: &str) -> Result<bool, KiraError>;
    fn create(&self, name: &str) -> Result<(), KiraError>;
    fn remove(&self, name: &str) -> Result<(), KiraError>;
}

/// Markers are empty-ish files inside the workspace root.
#[derive(Debug, Clone)]
pub struct FsStateBackend {
    root: Utf8PathBuf,
}

impl FsStateBackend {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn marker_path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(name)
    }
}

impl StateBackend for FsStateBackend {
    fn exists(&self, name: &str) -> Result<bool, KiraError> {
        Ok(self.marker_path(name).as_std_path().is_file())
    }

    fn create(&self, name: &str) -> Result<(), KiraError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("create {}: {err}", self.root)))?;
        let path = self.marker_path(name);
        let stamp = chrono::Utc::now().to_rfc3339();
        fs::write(path.as_std_path(), stamp.as_bytes())
            .map_err(|err| KiraError::Filesystem(format!("write marker {path}: {err}")))
    }

    fn remove(&self, name: &str) -> Result<(), KiraError> {
        let path = self.marker_path(name);
        match fs::remove_file(path.as_std_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(KiraError::Filesystem(format!("remove marker {path}: {err}"))),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStateBackend {
    marks: Mutex<HashSet<String>>,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateBackend for MemoryStateBackend {
    fn exists(&self, name: &str) -> Result<bool, KiraError> {
        let guard = self
            .marks
            .lock()
            .map_err(|_| KiraError::Filesystem("state lock poisoned".to_string()))?;
        Ok(guard.contains(name))
    }

    fn create(&self, name: &str) -> Result<(), KiraError> {
        let mut guard = self
            .marks
            .lock()
            .map_err(|_| KiraError::Filesystem("state lock poisoned".to_string()))?;
        guard.insert(name.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), KiraError> {
        let mut guard = self
            .marks
            .lock()
            .map_err(|_| KiraError::Filesystem("state lock poisoned".to_string()))?;
        guard.remove(name);
        Ok(())
    }
}

/// Phase markers of one workflow.
pub struct PhaseState<'a> {
    call: Call,
    backend: &'a dyn StateBackend,
}

impl<'a> PhaseState<'a> {
    pub fn new(call: Call, backend: &'a dyn StateBackend) -> Self {
        Self { call, backend }
    }

    pub fn is_marked(&self, phase: Phase) -> Result<bool, KiraError> {
        self.backend.exists(&phase.marker_name(self.call))
    }

    pub fn mark(&self, phase: Phase) -> Result<(), KiraError> {
        self.backend.create(&phase.marker_name(self.call))
    }

    pub fn clear(&self, phases: &[Phase]) -> Result<(), KiraError> {
        for phase in phases {
            self.backend.remove(&phase.marker_name(self.call))?;
        }
        Ok(())
    }

    pub fn clear_all(&self) -> Result<(), KiraError> {
        self.clear(&Phase::ALL)
    }
}
