use std::collections::HashSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::domain::InputTarget;
use crate::error::KiraError;

/// Expands user supplied paths into usable input files.
///
/// Directories are scanned one level deep only; nested folders are ignored
/// and have to be passed explicitly. Files (explicit or listed) must end with
/// `extension` when one is given. Paths that do not exist are skipped with a
/// warning. Order of first appearance is kept and duplicates are dropped.
pub fn resolve_inputs(
    paths: &[Utf8PathBuf],
    extension: Option<&str>,
) -> Result<Vec<Utf8PathBuf>, KiraError> {
    let extension = extension.filter(|ext| !ext.is_empty());
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for path in paths {
        let std_path = path.as_std_path();
        if std_path.is_dir() {
            let mut listed = list_dir_files(path)?;
            listed.sort();
            let before = files.len();
            for file in listed {
                if matches_extension(&file, extension) && seen.insert(file.clone()) {
                    files.push(file);
                }
            }
            debug!(folder = %path, files = files.len() - before, "expanded input folder");
        } else if std_path.is_file() {
            if !matches_extension(path, extension) {
                warn!(file = %path, "skipping input without the expected extension");
                continue;
            }
            if seen.insert(path.clone()) {
                files.push(path.clone());
            }
        } else {
            warn!(path = %path, "skipping input that does not exist");
        }
    }

    if files.is_empty() {
        return Err(KiraError::NoValidInput);
    }
    Ok(files)
}

/// Granularity used when none was configured: many files (or a structured
/// table) are identified per file, a single file per sequence.
pub fn infer_input_target(
    explicit: Option<InputTarget>,
    n_files: usize,
    has_input_file: bool,
) -> InputTarget {
    if let Some(target) = explicit {
        return target;
    }
    if n_files > 1 || has_input_file {
        InputTarget::File
    } else {
        InputTarget::Sequence
    }
}

fn list_dir_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, KiraError> {
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("read dir {dir}: {err}")))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match Utf8PathBuf::from_path_buf(path) {
            Ok(path) => files.push(path),
            Err(path) => warn!(path = %path.display(), "skipping non-utf8 input path"),
        }
    }
    Ok(files)
}

fn matches_extension(path: &Utf8Path, extension: Option<&str>) -> bool {
    match extension {
        Some(ext) => path
            .file_name()
            .map(|name| name.ends_with(ext))
            .unwrap_or(false),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn touch(path: &Utf8Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path()).unwrap();
        }
        fs::write(path.as_std_path(), b">s1\nACGT\n").unwrap();
    }

    #[test]
    fn folder_expansion_is_not_recursive() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        touch(&root.join("a.fna.gz"));
        touch(&root.join("b.fna.gz"));
        touch(&root.join("notes.txt"));
        touch(&root.join("more/c.fna.gz"));

        let files = resolve_inputs(&[root.clone()], Some("fna.gz")).unwrap();
        assert_eq!(files, vec![root.join("a.fna.gz"), root.join("b.fna.gz")]);

        let files = resolve_inputs(&[root.clone(), root.join("more")], Some("fna.gz")).unwrap();
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn explicit_files_are_deduplicated() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let file = root.join("a.fna");
        touch(&file);
        let files = resolve_inputs(&[file.clone(), file.clone(), root.clone()], None).unwrap();
        assert_eq!(files, vec![file]);
    }

    #[test]
    fn no_valid_input_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        touch(&root.join("a.fna.gz"));

        let err = resolve_inputs(&[root.clone()], Some("xxx.gz")).unwrap_err();
        assert_matches!(err, KiraError::NoValidInput);
        let err = resolve_inputs(&[root.join("missing")], None).unwrap_err();
        assert_matches!(err, KiraError::NoValidInput);
    }

    #[test]
    fn granularity_defaults() {
        assert_eq!(infer_input_target(None, 3, false), InputTarget::File);
        assert_eq!(infer_input_target(None, 1, false), InputTarget::Sequence);
        assert_eq!(infer_input_target(None, 0, true), InputTarget::File);
        assert_eq!(
            infer_input_target(Some(InputTarget::Sequence), 5, false),
            InputTarget::Sequence
        );
    }
}
