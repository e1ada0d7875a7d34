//! Mission archive handling.
//!
//! A `.miz` is a plain ZIP. Translation only ever touches
//! `l10n/DEFAULT/dictionary`; everything else is extracted and repacked as is.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use log::{debug, info};
use zip::read::ZipArchive;
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::backup::{build_temp_path, replace_file};

/// Dictionary location inside an extracted mission.
pub const DICTIONARY_ENTRY: &str = "l10n/DEFAULT/dictionary";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive not found: {0}")]
    NotFound(String),

    #[error("Not a mission archive: {0}")]
    InvalidArchive(String),

    #[error("Entry escapes the extraction directory: {0}")]
    UnsafeEntry(String),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// True for `.miz` files, any case.
pub fn is_mission_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("miz"))
        .unwrap_or(false)
}

pub fn dictionary_path(extracted: &Path) -> PathBuf {
    extracted.join(DICTIONARY_ENTRY)
}

/// Extracts `archive` into `dest`, clearing `dest` first.
pub fn extract(archive: &Path, dest: &Path) -> ArchiveResult<usize> {
    if !archive.is_file() {
        return Err(ArchiveError::NotFound(archive.display().to_string()));
    }
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file)
        .map_err(|err| ArchiveError::InvalidArchive(format!("{}: {err}", archive.display())))?;

    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;

    let mut written = 0usize;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let name = entry.name().to_string();
        let relative = safe_relative_path(&name)?;
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        fs::write(&target, content)?;
        written += 1;
    }

    debug!("extracted {written} files from {}", archive.display());
    Ok(written)
}

fn safe_relative_path(name: &str) -> ArchiveResult<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return Err(ArchiveError::UnsafeEntry(name.to_string())),
        }
    }
    Ok(relative)
}

/// Zips every file under `source_dir` into `output`. Entries are sorted and
/// use forward slashes; the archive is built next to `output` and renamed in.
pub fn repack(source_dir: &Path, output: &Path) -> ArchiveResult<usize> {
    if !source_dir.is_dir() {
        return Err(ArchiveError::NotFound(source_dir.display().to_string()));
    }

    let mut files = Vec::new();
    collect_files(source_dir, source_dir, &mut files)?;
    files.sort();

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let temp_path = build_temp_path(output);
    let output_file = File::create(&temp_path)?;
    let mut writer = ZipWriter::new(output_file);

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for name in &files {
        let content = fs::read(source_dir.join(name))?;
        writer.start_file(name.as_str(), options)?;
        writer.write_all(&content)?;
    }
    writer.finish()?;

    replace_file(&temp_path, output)?;
    info!("packed {} files into {}", files.len(), output.display());
    Ok(files.len())
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(name);
        }
    }
    Ok(())
}

/// Overwrites the dictionary of an extracted mission and packs the result
/// into `output`.
pub fn replace_dictionary(extracted: &Path, translated: &str, output: &Path) -> ArchiveResult<usize> {
    let target = dictionary_path(extracted);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&target, translated)?;
    repack(extracted, output)
}
