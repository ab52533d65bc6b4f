// backuptool/src/backup/archive.rs
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::errors::ArchiveError;

/// Artifacts are named `backup_<label>_<timestamp>.zip`.
pub const ARTIFACT_PREFIX: &str = "backup_";
pub const ARTIFACT_EXTENSION: &str = ".zip";

/// Whether `file_name` looks like an artifact this tool produced.
pub fn is_backup_artifact(file_name: &str) -> bool {
    file_name.starts_with(ARTIFACT_PREFIX) && file_name.ends_with(ARTIFACT_EXTENSION)
}

/// Creates a zip archive from every regular file below `source_dir`.
///
/// Member names are relative to `source_dir` and always use `/` as separator.
/// Directories themselves are not stored, only the files inside them.
///
/// # Returns
/// A human-readable success message.
pub fn compress_tree(source_dir: &Path, dest_zip: &Path) -> Result<String, ArchiveError> {
    if !source_dir.is_dir() {
        return Err(ArchiveError::SourceNotDirectory(source_dir.to_path_buf()));
    }

    // Collect first so a walk error never leaves a half-written archive behind.
    let mut members = Vec::new();
    for entry in WalkDir::new(source_dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|_| {
                ArchiveError::io(
                    entry.path(),
                    io::Error::other(format!("not below {}", source_dir.display())),
                )
            })?;
        members.push((entry.path().to_path_buf(), member_name(relative)));
    }

    info!(
        "Compressing {} file(s) from {} into {}",
        members.len(),
        source_dir.display(),
        dest_zip.display()
    );
    write_archive(&members, dest_zip)?;

    Ok(format!(
        "Backup compressed successfully ({} file(s) from {})",
        members.len(),
        source_dir.display()
    ))
}

/// Archives only the most recently modified file directly inside `source_dir`.
pub fn compress_latest_file(source_dir: &Path, dest_zip: &Path) -> Result<String, ArchiveError> {
    let latest = select_latest_file(source_dir)?;
    compress_single_file(&latest, dest_zip)
}

/// Picks the regular file directly under `source_dir` with the newest modification time.
///
/// Subdirectories are not descended into; directories, symlinks and other
/// non-regular entries are ignored. Earlier backup artifacts are skipped too,
/// so a kept artifact in the source directory is never archived again.
pub fn select_latest_file(source_dir: &Path) -> Result<PathBuf, ArchiveError> {
    if !source_dir.is_dir() {
        return Err(ArchiveError::SourceNotDirectory(source_dir.to_path_buf()));
    }

    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for entry in WalkDir::new(source_dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() || is_backup_artifact(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let modified = entry
            .metadata()?
            .modified()
            .map_err(|e| ArchiveError::io(entry.path(), e))?;
        let newer = match &latest {
            Some((best, _)) => modified > *best,
            None => true,
        };
        if newer {
            latest = Some((modified, entry.into_path()));
        }
    }

    match latest {
        Some((_, path)) => {
            debug!("Latest file in {} is {}", source_dir.display(), path.display());
            Ok(path)
        }
        None => Err(ArchiveError::NoEligibleFile(source_dir.to_path_buf())),
    }
}

/// Archives one already selected file under its own file name.
fn compress_single_file(file: &Path, dest_zip: &Path) -> Result<String, ArchiveError> {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ArchiveError::NoEligibleFile(file.to_path_buf()))?;

    info!("Compressing {} into {}", file.display(), dest_zip.display());
    write_archive(&[(file.to_path_buf(), name.clone())], dest_zip)?;

    Ok(format!("Backup compressed successfully (latest file {})", name))
}

fn write_archive(members: &[(PathBuf, String)], dest_zip: &Path) -> Result<(), ArchiveError> {
    if let Some(parent) = dest_zip.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;
        }
    }

    let archive_file = File::create(dest_zip).map_err(|e| ArchiveError::io(dest_zip, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(archive_file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    for (path, name) in members {
        zip.start_file(name.as_str(), options)?;
        let mut reader = BufReader::new(File::open(path).map_err(|e| ArchiveError::io(path, e))?);
        io::copy(&mut reader, &mut zip).map_err(|e| ArchiveError::io(path, e))?;
    }

    let mut writer = zip.finish()?;
    io::Write::flush(&mut writer).map_err(|e| ArchiveError::io(dest_zip, e))?;
    Ok(())
}

fn member_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
