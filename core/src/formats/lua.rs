//! Regex grammar for the DCS dictionary idiom: `["key"] = "value",`
use super::{EntryGrammar, RawEntry, ValueLine};
use once_cell::sync::Lazy;
use regex::Regex;

// Double-quoted key and value; escapes (including `\` + newline) are consumed
// as pairs so an escaped quote never closes the string.
static ENTRY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)\["((?:[^"\\]|\\.)*)"\]\s*=\s*"((?:[^"\\]|\\.)*)""#)
        .expect("valid entry regex")
});

static LINE_SPLIT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\\r?\n").expect("valid line split regex"));

#[derive(Debug, Clone, Copy, Default)]
pub struct LuaTableGrammar;

impl LuaTableGrammar {
    pub fn new() -> Self {
        Self
    }
}

impl EntryGrammar for LuaTableGrammar {
    fn entries<'t>(&self, text: &'t str) -> Vec<RawEntry<'t>> {
        ENTRY_REGEX
            .captures_iter(text)
            .filter_map(|caps| {
                let key = caps.get(1)?;
                let value = caps.get(2)?;
                Some(RawEntry {
                    key: key.as_str(),
                    value: value.as_str(),
                    value_range: value.range(),
                })
            })
            .collect()
    }

    fn split_value<'t>(&self, value: &'t str) -> Vec<ValueLine<'t>> {
        let mut lines = Vec::new();
        let mut cursor = 0usize;
        for mat in LINE_SPLIT_REGEX.find_iter(value) {
            lines.push(ValueLine {
                text: &value[cursor..mat.start()],
                terminator: mat.as_str(),
            });
            cursor = mat.end();
        }
        lines.push(ValueLine {
            text: &value[cursor..],
            terminator: "",
        });
        lines
    }
}
