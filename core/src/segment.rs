/// One translatable line of a dictionary value.
///
/// A value such as `"Check in.\` + newline + `Push FENCE!"` becomes two
/// segments. Each keeps the leading whitespace and trailing punctuation run of
/// its line aside so only the core text travels to the model, and the
/// reassembler can rebuild the value byte for byte around the translation.
use crate::protector::{Protector, TokenMap};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

pub const SEGMENT_ID_PREFIX: &str = "SEG_";
const SEGMENT_ID_HEX_LEN: usize = 12;

/// Matches identifiers produced by [`segment_id`] inside placeholder text.
pub static SEGMENT_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"SEG_[0-9a-f]{12}").expect("valid segment id regex"));

static WHITESPACE_RUN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// How a segment obtained its final text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Nothing to translate (empty, numeric or punctuation-only core).
    Verbatim,
    Cache,
    Model,
    Retry,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub key: String,
    pub index: usize,
    /// Escaped line text exactly as found in the Lua source.
    pub raw: String,
    /// `\` + newline (or `\` + CRLF) that followed the line, empty for the last line.
    pub line_break: String,
    pub leading_whitespace: String,
    pub trailing_punct: String,
    pub core: String,
    pub protected_core: String,
    pub tokens: TokenMap,
    pub id: String,
    translation: Option<String>,
    resolution: Option<Resolution>,
}

impl Segment {
    pub fn new(
        key: &str,
        index: usize,
        raw: &str,
        line_break: &str,
        protector: &Protector,
    ) -> Self {
        let unescaped = unescape_lua(raw);
        let (leading, core, trailing) = split_line(&unescaped);
        let protected = protector.protect(core);
        let id = segment_id(key, index, core);

        Self {
            key: key.to_string(),
            index,
            raw: raw.to_string(),
            line_break: line_break.to_string(),
            leading_whitespace: leading.to_string(),
            trailing_punct: trailing.to_string(),
            core: core.to_string(),
            protected_core: protected.masked,
            tokens: protected.tokens,
            id,
            translation: None,
            resolution: None,
        }
    }

    /// Cache key: the English core with whitespace collapsed.
    pub fn cleaned_core(&self) -> String {
        collapse_whitespace(&self.core)
    }

    /// Deduplication key: the masked core with whitespace collapsed.
    pub fn cleaned_protected(&self) -> String {
        collapse_whitespace(&self.protected_core)
    }

    pub fn is_translatable(&self) -> bool {
        self.core.chars().any(char::is_alphabetic)
    }

    pub fn translation(&self) -> Option<&str> {
        self.translation.as_deref()
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    pub fn is_resolved(&self) -> bool {
        self.translation.is_some()
    }

    /// Assigns the final text. Only the first assignment sticks.
    pub fn resolve(&mut self, text: String, resolution: Resolution) -> bool {
        if self.translation.is_some() {
            return false;
        }
        self.translation = Some(text);
        self.resolution = Some(resolution);
        true
    }

    /// Text written back into the value: the translation when present,
    /// the cleaned source otherwise.
    pub fn translated_or_fallback(&self) -> String {
        match &self.translation {
            Some(text) => text.clone(),
            None => self.cleaned_core(),
        }
    }
}

/// `SEG_` + the first 12 hex digits of SHA-256 over `key#index#core`.
pub fn segment_id(key: &str, index: usize, core: &str) -> String {
    let digest = Sha256::digest(format!("{key}#{index}#{core}").as_bytes());
    let hex = hex::encode(digest);
    format!("{SEGMENT_ID_PREFIX}{}", &hex[..SEGMENT_ID_HEX_LEN])
}

pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RUN_REGEX.replace_all(text.trim(), " ").into_owned()
}

fn is_trailing_punct(c: char) -> bool {
    c.is_whitespace() || matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | '…')
}

/// Splits a line into `(leading whitespace, core, trailing punctuation run)`.
pub fn split_line(line: &str) -> (&str, &str, &str) {
    let body_start = line
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map(|(idx, _)| idx)
        .unwrap_or(line.len());
    let (leading, body) = line.split_at(body_start);

    let core_end = body
        .char_indices()
        .rev()
        .find(|(_, c)| !is_trailing_punct(*c))
        .map(|(idx, c)| idx + c.len_utf8())
        .unwrap_or(0);
    let (core, trailing) = body.split_at(core_end);

    (leading, core, trailing)
}

/// Decodes the escapes the dictionary idiom uses inside double-quoted strings.
pub fn unescape_lua(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Inverse of [`unescape_lua`] for text about to be written into a Lua string.
pub fn escape_lua(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}
