//! Parsing a dictionary into segments and putting translations back.
//!
//! Reassembly happens in two passes over the text. Pass 1 swaps every segment
//! of an accepted entry for its identifier (punctuation and line breaks stay
//! in place); the result is written out as the intermediate placeholder file.
//! Pass 2 swaps identifiers for the escaped translations. Every byte outside
//! the string values is carried through untouched.

use crate::formats::{EntryGrammar, LuaTableGrammar};
use crate::protector::Protector;
use crate::segment::{escape_lua, Segment, SEGMENT_ID_REGEX};
use log::{debug, warn};
use std::collections::HashMap;

/// Decides which dictionary keys are translated.
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    /// Substrings; a key containing any of them is accepted.
    pub keys: Vec<String>,
    pub include_prefixes: Vec<String>,
    pub exclude_prefixes: Vec<String>,
}

impl KeyFilter {
    pub fn accepts(&self, key: &str) -> bool {
        if self
            .exclude_prefixes
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()))
        {
            return false;
        }
        if self.keys.is_empty() && self.include_prefixes.is_empty() {
            return true;
        }
        self.keys.iter().any(|needle| key.contains(needle.as_str()))
            || self
                .include_prefixes
                .iter()
                .any(|prefix| key.starts_with(prefix.as_str()))
    }
}

pub struct DictionaryParser<G: EntryGrammar = LuaTableGrammar> {
    grammar: G,
    filter: KeyFilter,
    protector: Protector,
}

impl DictionaryParser<LuaTableGrammar> {
    pub fn new(filter: KeyFilter, protector: Protector) -> Self {
        Self::with_grammar(LuaTableGrammar::new(), filter, protector)
    }
}

impl<G: EntryGrammar> DictionaryParser<G> {
    pub fn with_grammar(grammar: G, filter: KeyFilter, protector: Protector) -> Self {
        Self {
            grammar,
            filter,
            protector,
        }
    }

    pub fn count_entries(&self, text: &str) -> usize {
        self.grammar.count_entries(text)
    }

    /// Segments of every accepted entry, numbered in file order.
    pub fn parse(&self, text: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        for entry in self.grammar.entries(text) {
            if !self.filter.accepts(entry.key) {
                debug!("skipping key {}", entry.key);
                continue;
            }
            for line in self.grammar.split_value(entry.value) {
                let index = segments.len();
                segments.push(Segment::new(
                    entry.key,
                    index,
                    line.text,
                    line.terminator,
                    &self.protector,
                ));
            }
        }
        segments
    }

    /// Pass 1: replaces segment text with `id + punct + line_break`.
    pub fn render_placeholders(&self, text: &str, segments: &[Segment]) -> String {
        let mut remaining = segments.iter();
        let mut output = String::with_capacity(text.len());
        let mut cursor = 0usize;

        for entry in self.grammar.entries(text) {
            if !self.filter.accepts(entry.key) {
                continue;
            }
            let line_count = self.grammar.split_value(entry.value).len();
            let mut value = String::new();
            for _ in 0..line_count {
                let Some(segment) = remaining.next() else {
                    warn!("ran out of segments while rendering key {}", entry.key);
                    break;
                };
                if segment.key != entry.key {
                    warn!(
                        "segment {} belongs to {} but was rendered into {}",
                        segment.id, segment.key, entry.key
                    );
                }
                value.push_str(&segment.id);
                value.push_str(&escape_lua(&segment.trailing_punct));
                value.push_str(&segment.line_break);
            }

            output.push_str(&text[cursor..entry.value_range.start]);
            output.push_str(&value);
            cursor = entry.value_range.end;
        }
        output.push_str(&text[cursor..]);

        if remaining.next().is_some() {
            warn!("placeholder pass left segments unused; the text changed since parsing");
        }
        output
    }

    /// Pass 2: replaces identifiers inside values with
    /// `leading_whitespace + translation`, escaped for Lua.
    pub fn reassemble(&self, placeholder_text: &str, segments: &[Segment]) -> String {
        let by_id: HashMap<&str, &Segment> = segments
            .iter()
            .map(|segment| (segment.id.as_str(), segment))
            .collect();

        let mut output = String::with_capacity(placeholder_text.len());
        let mut cursor = 0usize;
        for entry in self.grammar.entries(placeholder_text) {
            if !SEGMENT_ID_REGEX.is_match(entry.value) {
                continue;
            }
            let value = SEGMENT_ID_REGEX.replace_all(entry.value, |caps: &regex::Captures| {
                let id = &caps[0];
                match by_id.get(id) {
                    Some(segment) => escape_lua(&format!(
                        "{}{}",
                        segment.leading_whitespace,
                        segment.translated_or_fallback()
                    )),
                    None => {
                        warn!("unknown segment id {id} in key {}", entry.key);
                        id.to_string()
                    }
                }
            });

            output.push_str(&placeholder_text[cursor..entry.value_range.start]);
            output.push_str(&value);
            cursor = entry.value_range.end;
        }
        output.push_str(&placeholder_text[cursor..]);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Resolution;

    const SAMPLE: &str = concat!(
        "dictionary = \n{\n",
        "    [\"DictKey_ActionText_1\"] = \"Engage bandit\",\n",
        "    [\"DictKey_descriptionBriefing_2\"] = \"Take off.\\\n  Join on [LEAD]!\\\n\",\n",
        "    [\"DictKey_ActionRadioText_3\"] = \"Say \\\"ready\\\"\",\n",
        "    [\"DictKey_sortie_4\"] = \"\",\n",
        "} -- end of dictionary\n",
    );

    fn parser(filter: KeyFilter) -> DictionaryParser {
        DictionaryParser::new(filter, Protector::new(true))
    }

    #[test]
    fn filter_rules() {
        let filter = KeyFilter {
            keys: vec!["ActionText".into()],
            include_prefixes: vec!["DictKey_description".into()],
            exclude_prefixes: vec!["DictKey_ActionTextX".into()],
        };
        assert!(filter.accepts("DictKey_ActionText_1"));
        assert!(filter.accepts("DictKey_descriptionBriefing_2"));
        assert!(!filter.accepts("DictKey_ActionTextX_9"));
        assert!(!filter.accepts("DictKey_sortie_4"));
        assert!(KeyFilter::default().accepts("anything"));
    }

    #[test]
    fn parse_splits_values_into_segments() {
        let segments = parser(KeyFilter::default()).parse(SAMPLE);
        let cores: Vec<&str> = segments.iter().map(|s| s.core.as_str()).collect();
        assert_eq!(cores, vec!["Engage bandit", "Take off", "Join on [LEAD]", "", "Say \"ready\"", ""]);
        assert_eq!(segments[2].leading_whitespace, "  ");
        assert_eq!(segments[2].trailing_punct, "!");
        assert_eq!(segments[2].line_break, "\\\n");
        assert_eq!(segments[1].index, 1);
    }

    #[test]
    fn excluded_keys_pass_through() {
        let filter = KeyFilter {
            exclude_prefixes: vec!["DictKey_description".into()],
            ..KeyFilter::default()
        };
        let parser = parser(filter);
        let segments = parser.parse(SAMPLE);
        assert!(segments.iter().all(|s| s.key != "DictKey_descriptionBriefing_2"));

        let placeholders = parser.render_placeholders(SAMPLE, &segments);
        assert!(placeholders.contains("\"Take off.\\\n  Join on [LEAD]!\\\n\""));
    }

    #[test]
    fn identity_reassembly_reproduces_source() {
        let parser = parser(KeyFilter::default());
        let segments = parser.parse(SAMPLE);
        let placeholders = parser.render_placeholders(SAMPLE, &segments);
        assert_eq!(parser.count_entries(&placeholders), 4);
        assert!(placeholders.contains(&format!("\"{}\"", segments[0].id)));

        let output = parser.reassemble(&placeholders, &segments);
        assert_eq!(output, SAMPLE);
    }

    #[test]
    fn translations_are_escaped_on_reinsertion() {
        let parser = parser(KeyFilter::default());
        let mut segments = parser.parse(SAMPLE);
        segments[0].resolve("Ataca al \"bandido\"".into(), Resolution::Model);
        segments[1].resolve("Despega".into(), Resolution::Model);
        segments[2].resolve("Únete a [LEAD]".into(), Resolution::Model);
        let placeholders = parser.render_placeholders(SAMPLE, &segments);
        let output = parser.reassemble(&placeholders, &segments);

        assert!(output.contains("[\"DictKey_ActionText_1\"] = \"Ataca al \\\"bandido\\\"\""));
        assert!(output.contains("\"Despega.\\\n  Únete a [LEAD]!\\\n\""));
        assert_eq!(parser.count_entries(&output), parser.count_entries(SAMPLE));
    }
}
