use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("could not back up {path}: {message}")]
    BackupCreate { path: PathBuf, message: String },
}

/// Copies `archive` into `backup_dir` as `<name>.bak.<YYYYmmddHHMMSS>`.
pub fn backup_archive(archive: &Path, backup_dir: &Path) -> Result<PathBuf, BackupError> {
    let file_name = archive
        .file_name()
        .ok_or_else(|| BackupError::BackupCreate {
            path: archive.to_path_buf(),
            message: "path has no file name".into(),
        })?;
    fs::create_dir_all(backup_dir)?;

    let timestamp = Local::now().format("%Y%m%d%H%M%S");
    let mut name = file_name.to_os_string();
    name.push(format!(".bak.{timestamp}"));
    let candidate = backup_dir.join(name);

    fs::copy(archive, &candidate).map_err(|err| BackupError::BackupCreate {
        path: archive.to_path_buf(),
        message: err.to_string(),
    })?;
    Ok(candidate)
}

/// Writes through a sibling temp file and renames it over `target`.
pub fn write_atomic(target: &Path, contents: &[u8]) -> Result<(), BackupError> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp_path = build_temp_path(target);
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    replace_file(&temp_path, target)?;
    Ok(())
}

pub(crate) fn replace_file(temp_path: &Path, target: &Path) -> io::Result<()> {
    #[cfg(target_os = "windows")]
    {
        if target.exists() {
            fs::remove_file(target)?;
        }
    }
    fs::rename(temp_path, target)
}

pub(crate) fn build_temp_path(target: &Path) -> PathBuf {
    let mut temp = target.to_path_buf();
    let pid = std::process::id();
    let suffix = format!("__tmp__pid_{}", pid);
    match temp.file_name() {
        Some(name) => {
            let mut os_string = name.to_os_string();
            os_string.push(suffix);
            temp.set_file_name(os_string);
        }
        None => {
            temp.push(format!("temp_{pid}"));
        }
    }
    temp
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn backs_up_with_timestamp_suffix() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("op_fox.miz");
        fs::write(&archive, b"zip bytes").unwrap();

        let backup = backup_archive(&archive, &dir.path().join("backup")).unwrap();
        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("op_fox.miz.bak."));
        assert_eq!(name.len(), "op_fox.miz.bak.".len() + 14);
        assert_eq!(fs::read(&backup).unwrap(), b"zip bytes");
        assert!(archive.exists());
    }

    #[test]
    fn missing_archive_is_an_error() {
        let dir = tempdir().unwrap();
        let err = backup_archive(&dir.path().join("nope.miz"), dir.path()).unwrap_err();
        assert!(matches!(err, BackupError::BackupCreate { .. }));
    }

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("nested").join("cache.json");
        write_atomic(&target, b"{}").unwrap();
        write_atomic(&target, b"{\"a\":\"b\"}").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "{\"a\":\"b\"}");
        assert!(!build_temp_path(&target).exists());
    }
}
