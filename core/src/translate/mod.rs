//! Translating one dictionary file end to end.

pub mod batch;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;

use crate::ai::CompletionBackend;
use crate::cache::{CacheError, TranslationCache, CACHE_FILE_NAME};
use crate::config::PreparedConfig;
use crate::dictionary::DictionaryParser;
use crate::export::{append_finetune_pairs, write_segments_jsonl};
use crate::segment::Segment;

pub use batch::{BatchProtocol, ProtocolState, ProtocolStats};

/// Cooperative cancellation shared between the caller and running work.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("dictionary not found: {0}")]
    MissingInput(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DictionaryReport {
    pub total_segments: usize,
    pub non_translatable: usize,
    pub cache_hits: usize,
    pub unique_sent: usize,
    pub model_resolved: usize,
    pub retry_resolved: usize,
    pub fallbacks: usize,
    pub cache_writes: usize,
    pub entries_before: usize,
    pub entries_after: usize,
    pub entries_match: bool,
    pub cancelled: bool,
}

impl DictionaryReport {
    fn new(total_segments: usize, stats: ProtocolStats) -> Self {
        Self {
            total_segments,
            non_translatable: stats.non_translatable,
            cache_hits: stats.cache_hits,
            unique_sent: stats.unique_sent,
            model_resolved: stats.model_resolved,
            retry_resolved: stats.retry_resolved,
            fallbacks: stats.fallbacks,
            cache_writes: stats.cache_writes,
            cancelled: stats.cancelled,
            ..Self::default()
        }
    }
}

/// File names produced for one dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub dir: PathBuf,
    pub translated: PathBuf,
    pub placeholders: PathBuf,
    pub segments: PathBuf,
    pub cache: PathBuf,
    pub finetune: PathBuf,
}

impl OutputLayout {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            translated: dir.join("dictionary.translated.lua"),
            placeholders: dir.join("dictionary.placeholders.lua"),
            segments: dir.join("segments.jsonl"),
            cache: dir.join(CACHE_FILE_NAME),
            finetune: dir.join("finetune_dataset.jsonl"),
            dir,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranslatedDictionary {
    pub text: String,
    pub placeholder_text: String,
    pub segments: Vec<Segment>,
    pub report: DictionaryReport,
}

pub struct DictionaryTranslator<'a, B: CompletionBackend> {
    backend: &'a B,
    config: PreparedConfig,
    cancel: Option<CancelFlag>,
}

impl<'a, B: CompletionBackend> DictionaryTranslator<'a, B> {
    pub fn new(backend: &'a B, config: PreparedConfig) -> Self {
        Self {
            backend,
            config,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Source text after typographic apostrophes and fixed replacements.
    fn normalize(&self, text: &str) -> String {
        let mut normalized = text.replace('\u{2019}', "'");
        for replacement in &self.config.replacements {
            if !replacement.from.is_empty() {
                normalized = normalized.replace(&replacement.from, &replacement.to);
            }
        }
        normalized
    }

    pub async fn translate_text(
        &self,
        source: &str,
        cache: &mut TranslationCache,
    ) -> TranslatedDictionary {
        let text = self.normalize(source);
        let parser = DictionaryParser::new(self.config.filter.clone(), self.config.protector);

        let mut segments = parser.parse(&text);
        let placeholder_text = parser.render_placeholders(&text, &segments);
        let entries_before = parser.count_entries(&text);
        let placeholder_entries = parser.count_entries(&placeholder_text);
        if placeholder_entries != entries_before {
            warn!(
                "placeholder pass changed the entry count ({entries_before} -> {placeholder_entries})"
            );
        }

        let mut protocol = BatchProtocol::new(self.backend, &self.config);
        if let Some(cancel) = &self.cancel {
            protocol = protocol.with_cancel(cancel.clone());
        }
        let stats = protocol.run(&mut segments, cache).await;

        let translated = parser.reassemble(&placeholder_text, &segments);
        let entries_after = parser.count_entries(&translated);
        if entries_after != entries_before {
            warn!("entry count changed after reassembly ({entries_before} -> {entries_after})");
        }

        let mut report = DictionaryReport::new(segments.len(), stats);
        report.entries_before = entries_before;
        report.entries_after = entries_after;
        report.entries_match = entries_before == entries_after;

        TranslatedDictionary {
            text: translated,
            placeholder_text,
            segments,
            report,
        }
    }

    /// Translates `input` and writes every output of `layout`, using and
    /// updating the cache stored there.
    pub async fn translate_file(
        &self,
        input: &Path,
        layout: &OutputLayout,
    ) -> Result<DictionaryReport, TranslateError> {
        if !input.is_file() {
            return Err(TranslateError::MissingInput(input.to_path_buf()));
        }
        let source = fs::read_to_string(input).map_err(|source| TranslateError::Read {
            path: input.to_path_buf(),
            source,
        })?;
        fs::create_dir_all(&layout.dir).map_err(|source| TranslateError::Write {
            path: layout.dir.clone(),
            source,
        })?;

        let mut cache = TranslationCache::load(&layout.cache);
        let result = self.translate_text(&source, &mut cache).await;

        write_output(&layout.placeholders, &result.placeholder_text)?;
        write_output(&layout.translated, &result.text)?;
        write_segments_jsonl(&layout.segments, &result.segments).map_err(|source| {
            TranslateError::Write {
                path: layout.segments.clone(),
                source,
            }
        })?;
        cache.save()?;
        let added = append_finetune_pairs(&layout.finetune, &cache).map_err(|source| {
            TranslateError::Write {
                path: layout.finetune.clone(),
                source,
            }
        })?;

        let report = result.report;
        info!(
            "{}: {} segments, {} from cache, {} from model, {} retried, {} fallbacks, {} new training pairs",
            input.display(),
            report.total_segments,
            report.cache_hits,
            report.model_resolved,
            report.retry_resolved,
            report.fallbacks,
            added
        );
        Ok(report)
    }
}

fn write_output(path: &Path, contents: &str) -> Result<(), TranslateError> {
    fs::write(path, contents).map_err(|source| TranslateError::Write {
        path: path.to_path_buf(),
        source,
    })
}
