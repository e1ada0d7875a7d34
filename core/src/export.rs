//! JSON-lines exports written next to a translated dictionary.

use crate::cache::TranslationCache;
use crate::segment::Segment;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

pub const FINETUNE_PROMPT_PREFIX: &str = "Translate to Spanish (DCS mission text):\n";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentRecord {
    pub id: String,
    pub key: String,
    pub en: String,
    pub es: String,
}

impl From<&Segment> for SegmentRecord {
    fn from(segment: &Segment) -> Self {
        Self {
            id: segment.id.clone(),
            key: segment.key.clone(),
            en: segment.cleaned_core(),
            es: segment.translated_or_fallback(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinetuneRecord {
    pub prompt: String,
    pub response: String,
}

/// One line per segment, in index order. Overwrites `path`.
pub fn write_segments_jsonl(path: &Path, segments: &[Segment]) -> io::Result<()> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    for segment in segments {
        let line = serde_json::to_string(&SegmentRecord::from(segment))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()
}

/// Appends cache pairs whose prompt is not in `path` yet. Returns the number
/// of lines added.
pub fn append_finetune_pairs(path: &Path, cache: &TranslationCache) -> io::Result<usize> {
    let mut seen: HashSet<String> = HashSet::new();
    if let Ok(existing) = fs::read_to_string(path) {
        for line in existing.lines().filter(|line| !line.trim().is_empty()) {
            if let Ok(record) = serde_json::from_str::<FinetuneRecord>(line) {
                seen.insert(record.prompt);
            }
        }
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut added = 0usize;
    for (en, es) in cache.entries() {
        let prompt = format!("{FINETUNE_PROMPT_PREFIX}{en}");
        if !seen.insert(prompt.clone()) {
            continue;
        }
        let record = FinetuneRecord {
            prompt,
            response: es.to_string(),
        };
        writeln!(file, "{}", serde_json::to_string(&record)?)?;
        added += 1;
    }
    Ok(added)
}
