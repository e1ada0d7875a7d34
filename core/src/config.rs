/// Configuration for the dictionary translator
use crate::ai::TransportMode;
use crate::dictionary::KeyFilter;
use crate::protector::{ProtectedTerms, Protector};
use log::warn;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

static BACKREF_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\([0-9])").expect("valid backreference regex"));

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Literal substring replacement applied to the whole file before parsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiteralReplacement {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegexRule {
    pub pattern: String,
    pub replacement: String,
    /// Any of `i`, `m`, `s`, `x`.
    #[serde(default)]
    pub flags: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmOptions {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub compat: TransportMode,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub repetition_penalty: Option<f64>,
    #[serde(default = "default_true")]
    pub supports_system_role: bool,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_yaml::Value>,
}

fn default_base_url() -> String {
    "http://localhost:1234/v1".to_string()
}

fn default_temperature() -> Option<f64> {
    Some(0.2)
}

fn default_max_tokens() -> Option<u32> {
    Some(2048)
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    20
}

fn default_retry_batch_size() -> usize {
    2
}

fn default_timeout() -> u64 {
    180
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: String::new(),
            api_key: None,
            compat: TransportMode::default(),
            temperature: default_temperature(),
            top_p: None,
            top_k: None,
            max_tokens: default_max_tokens(),
            stop: Vec::new(),
            repetition_penalty: None,
            supports_system_role: true,
            unknown: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_retry_batch_size")]
    pub retry_batch_size: usize,
    /// Seconds per model call.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub keys_filter: Option<Vec<String>>,
    #[serde(default)]
    pub target_prefixes: Vec<String>,
    #[serde(default)]
    pub exclude_prefixes: Vec<String>,
    #[serde(default = "default_true")]
    pub protect_brackets: bool,
    #[serde(default)]
    pub protected_terms: Vec<String>,
    #[serde(default)]
    pub no_translate_terms: Vec<String>,
    #[serde(default)]
    pub technical_terms: Vec<String>,
    /// Strings whose translation may legitimately equal the source.
    #[serde(default)]
    pub no_translation_needed: Vec<String>,
    #[serde(default)]
    pub fixed_full_replacements: Vec<LiteralReplacement>,
    #[serde(default)]
    pub glossary: BTreeMap<String, String>,
    #[serde(default)]
    pub phraseology_rules: Vec<RegexRule>,
    #[serde(default)]
    pub post_rules: Vec<RegexRule>,
    #[serde(default)]
    pub llm: LlmOptions,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_yaml::Value>,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            retry_batch_size: default_retry_batch_size(),
            timeout: default_timeout(),
            keys_filter: None,
            target_prefixes: Vec::new(),
            exclude_prefixes: Vec::new(),
            protect_brackets: true,
            protected_terms: Vec::new(),
            no_translate_terms: Vec::new(),
            technical_terms: Vec::new(),
            no_translation_needed: Vec::new(),
            fixed_full_replacements: Vec::new(),
            glossary: BTreeMap::new(),
            phraseology_rules: Vec::new(),
            post_rules: Vec::new(),
            llm: LlmOptions::default(),
            unknown: BTreeMap::new(),
        }
    }
}

impl TranslatorConfig {
    /// Loads YAML, or JSON when the extension is `.json`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        };
        parsed.map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, String> {
        let config: Self = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
        config.warn_unknown_keys();
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, String> {
        let config: Self = serde_json::from_str(content).map_err(|e| e.to_string())?;
        config.warn_unknown_keys();
        Ok(config)
    }

    /// Names of keys nobody consumes, `llm.` prefixed for the model section.
    pub fn unknown_keys(&self) -> Vec<String> {
        self.unknown
            .keys()
            .cloned()
            .chain(self.llm.unknown.keys().map(|key| format!("llm.{key}")))
            .collect()
    }

    fn warn_unknown_keys(&self) {
        for key in self.unknown_keys() {
            warn!("ignoring unknown configuration key {key:?}");
        }
    }

    /// Protected, do-not-translate and technical vocabularies as one list.
    pub fn merged_terms(&self) -> Vec<String> {
        self.protected_terms
            .iter()
            .chain(&self.no_translate_terms)
            .chain(&self.technical_terms)
            .cloned()
            .collect()
    }

    pub fn key_filter(&self) -> KeyFilter {
        KeyFilter {
            keys: self.keys_filter.clone().unwrap_or_default(),
            include_prefixes: self.target_prefixes.clone(),
            exclude_prefixes: self.exclude_prefixes.clone(),
        }
    }

    /// Compiles everything the pipeline needs out of the raw options.
    pub fn prepare(&self) -> PreparedConfig {
        PreparedConfig {
            batch_size: self.batch_size.max(1),
            retry_batch_size: self.retry_batch_size.max(1),
            filter: self.key_filter(),
            protector: Protector::new(self.protect_brackets),
            terms: ProtectedTerms::new(self.merged_terms()),
            replacements: self.fixed_full_replacements.clone(),
            glossary: self.glossary.clone(),
            phraseology: compile_rules(&self.phraseology_rules, "phraseology"),
            post_rules: compile_rules(&self.post_rules, "post"),
            identity_allowlist: self
                .no_translation_needed
                .iter()
                .map(|entry| entry.trim().to_lowercase())
                .filter(|entry| !entry.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    regex: Regex,
    replacement: String,
}

impl CompiledRule {
    pub fn apply(&self, text: &str) -> String {
        self.regex
            .replace_all(text, self.replacement.as_str())
            .into_owned()
    }
}

pub fn apply_rules(rules: &[CompiledRule], text: &str) -> String {
    rules
        .iter()
        .fold(text.to_string(), |current, rule| rule.apply(&current))
}

fn compile_rules(rules: &[RegexRule], label: &str) -> Vec<CompiledRule> {
    rules
        .iter()
        .filter_map(|rule| match compile_rule(rule) {
            Ok(compiled) => Some(compiled),
            Err(err) => {
                warn!("skipping invalid {label} rule {:?}: {err}", rule.pattern);
                None
            }
        })
        .collect()
}

fn compile_rule(rule: &RegexRule) -> Result<CompiledRule, regex::Error> {
    let mut builder = RegexBuilder::new(&rule.pattern);
    for flag in rule.flags.chars() {
        match flag.to_ascii_lowercase() {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                warn!("unknown regex flag {other:?} in rule {:?}", rule.pattern);
                &mut builder
            }
        };
    }
    Ok(CompiledRule {
        regex: builder.build()?,
        replacement: BACKREF_REGEX
            .replace_all(&rule.replacement, "$${$1}")
            .into_owned(),
    })
}

/// Options resolved into the shapes the pipeline consumes.
#[derive(Debug, Clone)]
pub struct PreparedConfig {
    pub batch_size: usize,
    pub retry_batch_size: usize,
    pub filter: KeyFilter,
    pub protector: Protector,
    pub terms: ProtectedTerms,
    pub replacements: Vec<LiteralReplacement>,
    pub glossary: BTreeMap<String, String>,
    pub phraseology: Vec<CompiledRule>,
    pub post_rules: Vec<CompiledRule>,
    /// Lowercased strings whose identical translation is still cached.
    pub identity_allowlist: HashSet<String>,
}

impl Default for PreparedConfig {
    fn default() -> Self {
        TranslatorConfig::default().prepare()
    }
}

/// Credentials and endpoint defaults per engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysFile {
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEntry {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl KeysFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    /// Overlays the selected engine onto `llm`. Returns false if the engine is
    /// not listed.
    pub fn apply_engine(&self, engine: &str, llm: &mut LlmOptions) -> bool {
        let Some(entry) = self.providers.get(engine) else {
            return false;
        };
        if let Some(key) = entry.api_key.as_ref().filter(|key| !key.trim().is_empty()) {
            llm.api_key = Some(key.trim().to_string());
        }
        if let Some(base_url) = &entry.base_url {
            llm.base_url = base_url.clone();
        }
        if let Some(model) = &entry.model {
            llm.model = model.clone();
        }
        true
    }
}
