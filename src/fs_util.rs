use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use camino::Utf8Path;
use flate2::read::MultiGzDecoder;
use zip::ZipArchive;

use crate::error::KiraError;

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), KiraError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| KiraError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| KiraError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(KiraError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

pub fn validate_zip(zip_path: &Path) -> Result<(), KiraError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| KiraError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| KiraError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

/// Unpacks a gzip compressed tarball. `tar` refuses entries escaping
/// `target_dir`.
pub fn extract_tar_gz(archive_path: &Path, target_dir: &Path) -> Result<(), KiraError> {
    let file = fs::File::open(archive_path).map_err(|err| {
        KiraError::Filesystem(format!("open archive {}: {err}", archive_path.display()))
    })?;
    fs::create_dir_all(target_dir).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    let mut archive = tar::Archive::new(MultiGzDecoder::new(file));
    archive
        .unpack(target_dir)
        .map_err(|err| KiraError::Filesystem(format!("unpack {}: {err}", archive_path.display())))
}

pub fn is_gzipped(path: &Utf8Path) -> bool {
    let name = path.as_str().to_lowercase();
    name.ends_with(".gz") || name.ends_with(".bgz")
}

/// Opens a text file, decompressing `.gz`/`.bgz` transparently.
pub fn open_text(path: &Utf8Path) -> Result<Box<dyn BufRead>, KiraError> {
    let file = fs::File::open(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("open {path}: {err}")))?;
    if is_gzipped(path) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Basename of a path given as text, or the text itself.
pub fn basename(path: &str) -> String {
    Utf8Path::new(path)
        .file_name()
        .map(str::to_string)
        .unwrap_or_else(|| path.to_string())
}
