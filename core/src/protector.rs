//! Shields text from the model.
//!
//! Bracketed spans such as `[BLUE]` or `[CALLSIGN]` are swapped for `⟦B0⟧`
//! style markers before a segment is sent and swapped back afterwards.
//! Protected vocabulary is handled on the way back instead: the model output is
//! scanned for each term as a whole word and the canonical spelling is
//! reinstated.

use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

// `[...]` without line breaks or nested opening brackets.
static BRACKET_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\[\]\r\n]*\]").expect("valid bracket regex"));

static MARKER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"⟦B[0-9]+⟧").expect("valid marker regex"));

/// Marker → original bracketed text.
pub type TokenMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectedText {
    pub masked: String,
    pub tokens: TokenMap,
}

#[derive(Debug, Clone, Copy)]
pub struct Protector {
    protect_brackets: bool,
}

impl Protector {
    pub fn new(protect_brackets: bool) -> Self {
        Self { protect_brackets }
    }

    pub fn protect(&self, input: &str) -> ProtectedText {
        if !self.protect_brackets || input.is_empty() {
            return ProtectedText {
                masked: input.to_string(),
                tokens: TokenMap::new(),
            };
        }

        let mut tokens = TokenMap::new();
        let mut masked = String::with_capacity(input.len());
        let mut cursor = 0usize;
        for (index, mat) in BRACKET_REGEX.find_iter(input).enumerate() {
            let marker = marker_for(index);
            masked.push_str(&input[cursor..mat.start()]);
            masked.push_str(&marker);
            tokens.insert(marker, mat.as_str().to_string());
            cursor = mat.end();
        }
        masked.push_str(&input[cursor..]);

        ProtectedText { masked, tokens }
    }
}

fn marker_for(index: usize) -> String {
    format!("⟦B{index}⟧")
}

/// Restores bracketed text. Markers are replaced longest first so `⟦B1⟧`
/// never clobbers part of `⟦B10⟧`.
pub fn unprotect(text: &str, tokens: &TokenMap) -> String {
    if tokens.is_empty() {
        return text.to_string();
    }

    let mut ordered: Vec<(&String, &String)> = tokens.iter().collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

    let mut output = text.to_string();
    for (marker, original) in ordered {
        output = output.replace(marker.as_str(), original);
    }
    output
}

/// Markers of `tokens` that do not appear in `text`.
pub fn missing_markers(text: &str, tokens: &TokenMap) -> Vec<String> {
    tokens
        .keys()
        .filter(|marker| !text.contains(marker.as_str()))
        .cloned()
        .collect()
}

/// Markers present in `text` that the map does not know about.
pub fn unknown_markers(text: &str, tokens: &TokenMap) -> Vec<String> {
    MARKER_REGEX
        .find_iter(text)
        .map(|mat| mat.as_str())
        .filter(|marker| !tokens.contains_key(*marker))
        .map(str::to_string)
        .collect()
}

/// Protected vocabulary compiled for whole-word, case-insensitive matching.
#[derive(Debug, Clone, Default)]
pub struct ProtectedTerms {
    terms: Vec<(String, Regex)>,
}

impl ProtectedTerms {
    /// Builds the set, keeping the first spelling of terms that differ only in
    /// case. Longer terms are matched first.
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut compiled = Vec::new();
        for term in terms {
            let term = term.as_ref().trim();
            if term.is_empty() || !seen.insert(term.to_lowercase()) {
                continue;
            }
            match Regex::new(&format!("(?i){}", regex::escape(term))) {
                Ok(regex) => compiled.push((term.to_string(), regex)),
                Err(err) => warn!("skipping protected term {term:?}: {err}"),
            }
        }
        compiled.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));
        Self { terms: compiled }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(|(term, _)| term.as_str())
    }

    /// Rewrites whole-word occurrences of each term with its canonical spelling.
    pub fn apply(&self, text: &str) -> String {
        let mut current = text.to_string();
        for (canonical, regex) in &self.terms {
            let mut output = String::with_capacity(current.len());
            let mut cursor = 0usize;
            for mat in regex.find_iter(&current) {
                let before = current[..mat.start()].chars().next_back();
                let after = current[mat.end()..].chars().next();
                if before.is_some_and(is_word_char) || after.is_some_and(is_word_char) {
                    continue;
                }
                output.push_str(&current[cursor..mat.start()]);
                output.push_str(canonical);
                cursor = mat.end();
            }
            output.push_str(&current[cursor..]);
            current = output;
        }
        current
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
