//! Entry grammars for dictionary files.
//!
//! The translation core only needs two things from a dictionary format: where
//! each `key = value` entry sits in the text, and how a value breaks into
//! lines. Keeping that behind [`EntryGrammar`] lets the regex-based Lua
//! grammar be swapped for a real literal-table parser without touching the
//! segment or batch logic.
pub mod lua;

use std::ops::Range;

pub use lua::LuaTableGrammar;

/// One `["key"] = "value"` occurrence in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry<'t> {
    pub key: &'t str,
    /// Escaped value text between the quotes.
    pub value: &'t str,
    /// Byte range of `value` inside the scanned text.
    pub value_range: Range<usize>,
}

/// A line of a value plus the continuation that ended it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueLine<'t> {
    pub text: &'t str,
    /// `\` + newline, `\` + CRLF, or empty for the last line.
    pub terminator: &'t str,
}

pub trait EntryGrammar: Send + Sync {
    /// Every entry in `text`, in source order.
    fn entries<'t>(&self, text: &'t str) -> Vec<RawEntry<'t>>;

    /// Splits an escaped value on line continuations. Always yields at least
    /// one line.
    fn split_value<'t>(&self, value: &'t str) -> Vec<ValueLine<'t>>;

    fn count_entries(&self, text: &str) -> usize {
        self.entries(text).len()
    }
}
