//! Cache lookup, batched model calls, retry and fallback for one file.
//!
//! Segments move through [`ProtocolState`] in order. Only one representative
//! per distinct masked core is sent to the model; the answer is post-processed
//! for every member of the group with that member's own bracket tokens.
//! Nothing in here fails: a batch that errors or returns garbage simply leaves
//! its segments for the next state, and the last state degrades to source
//! text.

use std::collections::HashMap;

use log::{debug, info, warn};
use serde::Serialize;

use super::CancelFlag;
use crate::ai::prompt::{build_system_prompt, build_user_payload, BatchItem, TranslationConstraints};
use crate::ai::response::parse_batch_response;
use crate::ai::CompletionBackend;
use crate::cache::TranslationCache;
use crate::config::{apply_rules, PreparedConfig};
use crate::protector::{missing_markers, unknown_markers, unprotect, TokenMap};
use crate::segment::{collapse_whitespace, Resolution, Segment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
    Pending,
    CacheResolved,
    FirstPass,
    RetryPass,
    Fallback,
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProtocolStats {
    pub non_translatable: usize,
    pub cache_hits: usize,
    /// Distinct strings sent in the first pass.
    pub unique_sent: usize,
    pub model_resolved: usize,
    pub retry_resolved: usize,
    pub fallbacks: usize,
    pub cache_writes: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub cancelled: bool,
}

/// Segments sharing one masked core.
#[derive(Debug)]
struct Group {
    id: String,
    text: String,
    members: Vec<usize>,
}

pub struct BatchProtocol<'a, B: CompletionBackend> {
    backend: &'a B,
    config: &'a PreparedConfig,
    system_prompt: String,
    cancel: Option<CancelFlag>,
    state: ProtocolState,
}

impl<'a, B: CompletionBackend> BatchProtocol<'a, B> {
    pub fn new(backend: &'a B, config: &'a PreparedConfig) -> Self {
        let constraints = TranslationConstraints {
            preserve_markers: true,
            protected_terms: config.terms.terms().map(str::to_string).collect(),
            glossary: config.glossary.clone(),
        };
        Self {
            backend,
            config,
            system_prompt: build_system_prompt(&constraints),
            cancel: None,
            state: ProtocolState::Pending,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled)
    }

    /// Resolves every segment. On return each one carries a translation.
    pub async fn run(
        &mut self,
        segments: &mut [Segment],
        cache: &mut TranslationCache,
    ) -> ProtocolStats {
        let mut stats = ProtocolStats::default();
        self.state = ProtocolState::Pending;

        for segment in segments.iter_mut().filter(|s| !s.is_translatable()) {
            let text = segment.cleaned_core();
            segment.resolve(text, Resolution::Verbatim);
            stats.non_translatable += 1;
        }

        self.state = ProtocolState::CacheResolved;
        for segment in segments.iter_mut().filter(|s| !s.is_resolved()) {
            if let Some(hit) = cache.get(&segment.cleaned_core()) {
                segment.resolve(hit.to_string(), Resolution::Cache);
                stats.cache_hits += 1;
            }
        }

        let groups = self.group_unresolved(segments);
        stats.unique_sent = groups.len();
        debug!(
            "{} segments, {} cache hits, {} distinct strings for the model",
            segments.len(),
            stats.cache_hits,
            groups.len()
        );

        self.state = ProtocolState::FirstPass;
        let first_pass: Vec<&Group> = groups.iter().collect();
        self.run_pass(
            &first_pass,
            self.config.batch_size,
            Resolution::Model,
            segments,
            cache,
            &mut stats,
        )
        .await;

        self.state = ProtocolState::RetryPass;
        let pending: Vec<&Group> = groups
            .iter()
            .filter(|group| group.members.iter().any(|&i| !segments[i].is_resolved()))
            .collect();
        if !pending.is_empty() {
            info!("retrying {} unresolved strings", pending.len());
            self.run_pass(
                &pending,
                self.config.retry_batch_size,
                Resolution::Retry,
                segments,
                cache,
                &mut stats,
            )
            .await;
        }

        self.state = ProtocolState::Fallback;
        for segment in segments.iter_mut().filter(|s| !s.is_resolved()) {
            warn!(
                "no translation for {} ({}); keeping source text",
                segment.id, segment.key
            );
            let text = segment.cleaned_core();
            segment.resolve(text, Resolution::Fallback);
            stats.fallbacks += 1;
        }

        stats.cancelled = self.is_cancelled();
        self.state = ProtocolState::Done;
        stats
    }

    fn group_unresolved(&self, segments: &[Segment]) -> Vec<Group> {
        let mut groups: Vec<Group> = Vec::new();
        let mut by_text: HashMap<String, usize> = HashMap::new();
        for (index, segment) in segments.iter().enumerate() {
            if segment.is_resolved() {
                continue;
            }
            let key = segment.cleaned_protected();
            match by_text.get(&key) {
                Some(&group) => groups[group].members.push(index),
                None => {
                    by_text.insert(key.clone(), groups.len());
                    groups.push(Group {
                        id: segment.id.clone(),
                        text: apply_rules(&self.config.phraseology, &key),
                        members: vec![index],
                    });
                }
            }
        }
        groups
    }

    async fn run_pass(
        &self,
        groups: &[&Group],
        batch_size: usize,
        resolution: Resolution,
        segments: &mut [Segment],
        cache: &mut TranslationCache,
        stats: &mut ProtocolStats,
    ) {
        for chunk in groups.chunks(batch_size.max(1)) {
            if self.is_cancelled() {
                warn!("cancelled; skipping the remaining batches");
                return;
            }
            let raw = self.call_batch(chunk, stats).await;
            let by_id: HashMap<&str, &Group> =
                chunk.iter().map(|group| (group.id.as_str(), *group)).collect();

            for item in parse_batch_response(&raw) {
                let Some(group) = by_id.get(item.id.as_str()) else {
                    debug!("model returned unknown id {}", item.id);
                    continue;
                };
                let resolved = self.settle(group, &item.es, resolution, segments, cache, stats);
                match resolution {
                    Resolution::Retry => stats.retry_resolved += resolved,
                    _ => stats.model_resolved += resolved,
                }
            }
        }
    }

    /// One model call. Errors are logged and read as an empty response.
    async fn call_batch(&self, chunk: &[&Group], stats: &mut ProtocolStats) -> String {
        let items: Vec<BatchItem> = chunk
            .iter()
            .map(|group| BatchItem {
                id: group.id.clone(),
                en: group.text.clone(),
            })
            .collect();
        stats.batches += 1;
        match self
            .backend
            .complete(&self.system_prompt, &build_user_payload(&items))
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                warn!("batch of {} failed: {err}", items.len());
                stats.failed_batches += 1;
                String::new()
            }
        }
    }

    /// Applies one model answer to every member of `group`. Returns how many
    /// segments were resolved.
    fn settle(
        &self,
        group: &Group,
        translated: &str,
        resolution: Resolution,
        segments: &mut [Segment],
        cache: &mut TranslationCache,
        stats: &mut ProtocolStats,
    ) -> usize {
        let mut resolved = 0usize;
        for &index in &group.members {
            let segment = &mut segments[index];
            if segment.is_resolved() {
                continue;
            }
            let masked = self.rewrite_masked(translated);
            let missing = missing_markers(&masked, &segment.tokens);
            if !missing.is_empty() {
                debug!("{} dropped markers {:?}", segment.id, missing);
                continue;
            }
            let unknown = unknown_markers(&masked, &segment.tokens);
            if !unknown.is_empty() {
                debug!("{} invented markers {:?}", segment.id, unknown);
                continue;
            }
            let text = collapse_whitespace(&unprotect(&masked, &segment.tokens));
            if text.is_empty() {
                continue;
            }

            let source = segment.cleaned_core();
            if self.should_cache(&source, &text) && cache.upsert(source.clone(), text.clone()) {
                stats.cache_writes += 1;
            }
            segment.resolve(text, resolution);
            resolved += 1;
        }
        resolved
    }

    /// Term recasing, glossary and post rules. Bracket markers are still in
    /// place, so none of these can touch the protected spans.
    fn rewrite_masked(&self, translated: &str) -> String {
        let mut text = self.config.terms.apply(translated);
        for (english, spanish) in &self.config.glossary {
            if !english.is_empty() {
                text = text.replace(english.as_str(), spanish);
            }
        }
        apply_rules(&self.config.post_rules, &text)
    }

    /// Masked rewrites, then bracket restore and whitespace collapse.
    pub fn post_process(&self, translated: &str, tokens: &TokenMap) -> String {
        collapse_whitespace(&unprotect(&self.rewrite_masked(translated), tokens))
    }

    fn should_cache(&self, source: &str, translated: &str) -> bool {
        let source = source.to_lowercase();
        source != translated.to_lowercase() || self.config.identity_allowlist.contains(&source)
    }
}
