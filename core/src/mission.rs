//! Sequential processing of mission archives.
//!
//! For a mission `<stem>.miz` the runner uses `<dest>/<stem>/extracted` for the
//! unpacked archive, `<dest>/<stem>/out` for dictionary outputs and writes the
//! rebuilt archive to `<dest>/<stem>.miz`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, error, info};
use serde::Serialize;

use crate::ai::CompletionBackend;
use crate::archive::{self, ArchiveError};
use crate::backup::{backup_archive, BackupError};
use crate::cache::{CacheError, TranslationCache};
use crate::config::PreparedConfig;
use crate::translate::{
    CancelFlag, DictionaryReport, DictionaryTranslator, OutputLayout, TranslateError,
};

const BACKUP_DIR_NAME: &str = "backup";

#[derive(Debug, thiserror::Error)]
pub enum MissionError {
    #[error("mission archive not found: {0}")]
    MissingArchive(PathBuf),
    #[error("not a .miz archive: {0}")]
    NotAMission(PathBuf),
    #[error("no translated dictionary at {0}; run the translate step first")]
    MissingTranslation(PathBuf),
    #[error("unknown mode {0:?} (expected translate, miz or all)")]
    UnknownMode(String),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionMode {
    /// Extract and translate only.
    Translate,
    /// Repack a previously translated dictionary.
    Repack,
    All,
}

impl MissionMode {
    fn translates(self) -> bool {
        matches!(self, MissionMode::Translate | MissionMode::All)
    }

    fn repacks(self) -> bool {
        matches!(self, MissionMode::Repack | MissionMode::All)
    }
}

impl FromStr for MissionMode {
    type Err = MissionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "translate" | "traducir" => Ok(MissionMode::Translate),
            "miz" | "repack" | "reempaquetar" => Ok(MissionMode::Repack),
            "all" | "traducir+reempaquetar" => Ok(MissionMode::All),
            other => Err(MissionError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MissionStatus {
    Succeeded,
    SucceededWithFallback { fallbacks: usize },
    Failed { message: String },
    Cancelled,
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissionStatus::Succeeded => write!(f, "ok"),
            MissionStatus::SucceededWithFallback { fallbacks } => {
                write!(f, "ok ({fallbacks} fallbacks)")
            }
            MissionStatus::Failed { message } => write!(f, "failed: {message}"),
            MissionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MissionReport {
    pub mission: String,
    #[serde(flatten)]
    pub status: MissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dictionary: Option<DictionaryReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
}

impl MissionReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, MissionStatus::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct MissionPlan {
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub missions: Vec<String>,
    pub mode: MissionMode,
}

/// Paths used for one mission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionPaths {
    pub archive: PathBuf,
    pub extracted: PathBuf,
    pub outputs: OutputLayout,
    pub repacked: PathBuf,
    pub backup_dir: Option<PathBuf>,
}

impl MissionPaths {
    pub fn new(source_dir: &Path, dest_dir: &Path, mission: &str) -> Self {
        let archive = source_dir.join(mission);
        let stem = Path::new(mission)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| mission.to_string());
        let work = dest_dir.join(&stem);
        let backup_dir = same_directory(source_dir, dest_dir).then(|| dest_dir.join(BACKUP_DIR_NAME));
        Self {
            archive,
            extracted: work.join("extracted"),
            outputs: OutputLayout::in_dir(work.join("out")),
            repacked: dest_dir.join(format!("{stem}.miz")),
            backup_dir,
        }
    }
}

fn same_directory(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

pub struct MissionRunner<'a, B: CompletionBackend> {
    backend: &'a B,
    config: PreparedConfig,
    cancel: CancelFlag,
    global_cache: Option<PathBuf>,
}

impl<'a, B: CompletionBackend> MissionRunner<'a, B> {
    pub fn new(backend: &'a B, config: PreparedConfig, cancel: CancelFlag) -> Self {
        Self {
            backend,
            config,
            cancel,
            global_cache: None,
        }
    }

    /// Merge every mission cache into the cache file at `path`.
    pub fn with_global_cache(mut self, path: Option<PathBuf>) -> Self {
        self.global_cache = path;
        self
    }

    /// Processes every mission in order. One failure never stops the rest.
    pub async fn run(&self, plan: &MissionPlan) -> Vec<MissionReport> {
        let mut reports = Vec::with_capacity(plan.missions.len());
        for mission in &plan.missions {
            if self.cancel.is_cancelled() {
                reports.push(MissionReport {
                    mission: mission.clone(),
                    status: MissionStatus::Cancelled,
                    dictionary: None,
                    output: None,
                    backup: None,
                });
                continue;
            }

            info!("processing {mission} ({:?})", plan.mode);
            let paths = MissionPaths::new(&plan.source_dir, &plan.dest_dir, mission);
            let mut report = MissionReport {
                mission: mission.clone(),
                status: MissionStatus::Succeeded,
                dictionary: None,
                output: None,
                backup: None,
            };
            if let Err(err) = self.process(&paths, plan.mode, &mut report).await {
                error!("{mission} failed: {err}");
                report.status = MissionStatus::Failed {
                    message: err.to_string(),
                };
            } else if report.status == MissionStatus::Succeeded {
                if let Some(fallbacks) = report
                    .dictionary
                    .as_ref()
                    .map(|d| d.fallbacks)
                    .filter(|&n| n > 0)
                {
                    report.status = MissionStatus::SucceededWithFallback { fallbacks };
                }
            }
            reports.push(report);
        }
        reports
    }

    async fn process(
        &self,
        paths: &MissionPaths,
        mode: MissionMode,
        report: &mut MissionReport,
    ) -> Result<(), MissionError> {
        if !archive::is_mission_archive(&paths.archive) {
            return Err(MissionError::NotAMission(paths.archive.clone()));
        }
        if !paths.archive.is_file() {
            return Err(MissionError::MissingArchive(paths.archive.clone()));
        }

        if mode.translates() {
            archive::extract(&paths.archive, &paths.extracted)?;
            self.seed_from_global(&paths.outputs.cache)?;
            let translator = DictionaryTranslator::new(self.backend, self.config.clone())
                .with_cancel(self.cancel.clone());
            let dictionary = translator
                .translate_file(&archive::dictionary_path(&paths.extracted), &paths.outputs)
                .await?;
            let cancelled = dictionary.cancelled;
            report.dictionary = Some(dictionary);
            self.merge_into_global(&paths.outputs.cache)?;
            if cancelled {
                info!("translation cancelled; not repacking");
                report.status = MissionStatus::Cancelled;
                return Ok(());
            }
        }

        if mode.repacks() {
            let translated = &paths.outputs.translated;
            if !translated.is_file() {
                return Err(MissionError::MissingTranslation(translated.clone()));
            }
            if !paths.extracted.is_dir() {
                archive::extract(&paths.archive, &paths.extracted)?;
            }
            if let Some(backup_dir) = &paths.backup_dir {
                if paths.repacked.is_file() {
                    report.backup = Some(backup_archive(&paths.repacked, backup_dir)?);
                }
            }
            let text = fs::read_to_string(translated)?;
            archive::replace_dictionary(&paths.extracted, &text, &paths.repacked)?;
            report.output = Some(paths.repacked.clone());
        }
        Ok(())
    }

    /// Adds global entries the mission cache lacks, so strings translated by
    /// earlier missions are cache hits here.
    fn seed_from_global(&self, mission_cache: &Path) -> Result<(), MissionError> {
        let Some(global_path) = &self.global_cache else {
            return Ok(());
        };
        let global = TranslationCache::load(global_path);
        if global.is_empty() {
            return Ok(());
        }
        let mut mission = TranslationCache::load(mission_cache);
        let added = mission.fill_from(&global);
        if added > 0 {
            mission.save()?;
            debug!("seeded {added} entries from {}", global_path.display());
        }
        Ok(())
    }

    fn merge_into_global(&self, mission_cache: &Path) -> Result<(), MissionError> {
        let Some(global_path) = &self.global_cache else {
            return Ok(());
        };
        let mission = TranslationCache::load(mission_cache);
        let mut global = TranslationCache::load(global_path);
        let changed = global.merge_from(&mission);
        if changed > 0 {
            global.save()?;
            info!("merged {changed} entries into {}", global_path.display());
        } else {
            debug!("no new entries for {}", global_path.display());
        }
        Ok(())
    }
}
