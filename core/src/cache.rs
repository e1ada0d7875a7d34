//! Persistent English → Spanish cache keyed by cleaned source text.

use crate::backup::{write_atomic, BackupError};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CACHE_FILE_NAME: &str = "translation_cache.json";
const APP_DIR_NAME: &str = "miz-translator";

/// `<user data dir>/miz-translator/translation_cache.json`, when the platform
/// has a data directory.
pub fn default_global_cache_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR_NAME).join(CACHE_FILE_NAME))
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to serialize cache: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write cache {path}: {source}")]
    Write { path: PathBuf, source: BackupError },
}

/// One cache file. Instances are independent; merge them explicitly with
/// [`TranslationCache::merge_from`].
#[derive(Debug, Clone, Default)]
pub struct TranslationCache {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl TranslationCache {
    /// Empty cache that will be saved to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Reads `path`. A missing or corrupt file gives an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<BTreeMap<String, String>>(&data) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!("cache {} is corrupt, starting empty: {err}", path.display());
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("no cache at {}", path.display());
                BTreeMap::new()
            }
            Err(err) => {
                warn!("failed to read cache {}: {err}", path.display());
                BTreeMap::new()
            }
        };
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns true when the stored value changed.
    pub fn upsert(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let value = value.into();
        match self.entries.insert(key.into(), value.clone()) {
            Some(previous) => previous != value,
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Full overwrite, pretty printed, non-ASCII kept literal.
    pub fn save(&self) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        write_atomic(&self.path, json.as_bytes()).map_err(|source| CacheError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Copies every entry of `other` in; `other` wins on conflicts. Returns
    /// the number of keys added or changed.
    pub fn merge_from(&mut self, other: &TranslationCache) -> usize {
        other
            .entries
            .iter()
            .filter(|(key, value)| self.upsert(key.as_str(), value.as_str()))
            .count()
    }

    /// Copies the entries of `other` whose keys are not present here. Returns
    /// how many were added.
    pub fn fill_from(&mut self, other: &TranslationCache) -> usize {
        let mut added = 0usize;
        for (key, value) in &other.entries {
            if !self.entries.contains_key(key) {
                self.entries.insert(key.clone(), value.clone());
                added += 1;
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_and_corrupt_files_load_empty() {
        let dir = tempdir().unwrap();
        assert!(TranslationCache::load(dir.path().join("none.json")).is_empty());

        let corrupt = dir.path().join("bad.json");
        fs::write(&corrupt, "{ not json").unwrap();
        let cache = TranslationCache::load(&corrupt);
        assert!(cache.is_empty());
        assert_eq!(cache.path(), corrupt.as_path());
    }

    #[test]
    fn save_and_reload_keeps_accents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CACHE_FILE_NAME);
        let mut cache = TranslationCache::new(&path);
        assert!(cache.upsert("Engage bandit", "Ataca al bandido"));
        assert!(cache.upsert("Good bye", "Adiós"));
        assert!(!cache.upsert("Good bye", "Adiós"));
        cache.save().unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("Adiós"));
        assert!(raw.contains("\n  \"Engage bandit\": \"Ataca al bandido\""));

        let reloaded = TranslationCache::load(&path);
        assert_eq!(reloaded.get("Engage bandit"), Some("Ataca al bandido"));
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn global_cache_lives_under_the_app_dir() {
        if let Some(path) = default_global_cache_path() {
            assert!(path.ends_with("miz-translator/translation_cache.json"));
        }
    }

    #[test]
    fn merge_is_last_write_wins() {
        let mut global = TranslationCache::new("global.json");
        global.upsert("Tanker", "Cisterna");
        global.upsert("Fight's on", "Combate");

        let mut mission = TranslationCache::new("mission.json");
        mission.upsert("Tanker", "Avión cisterna");
        mission.upsert("Fight's on", "Combate");
        mission.upsert("RTB", "Regresa a base");

        assert_eq!(global.merge_from(&mission), 2);
        assert_eq!(global.get("Tanker"), Some("Avión cisterna"));
        assert_eq!(global.len(), 3);
    }

    #[test]
    fn fill_keeps_existing_entries() {
        let mut global = TranslationCache::new("global.json");
        global.upsert("Tanker", "Cisterna");
        global.upsert("RTB", "Regresa a base");

        let mut mission = TranslationCache::new("mission.json");
        mission.upsert("Tanker", "Avión cisterna");

        assert_eq!(mission.fill_from(&global), 1);
        assert_eq!(mission.get("Tanker"), Some("Avión cisterna"));
        assert_eq!(mission.get("RTB"), Some("Regresa a base"));
    }
}
