//! The keyword catalogue: multi-word statement keywords and their arity.
//!
//! Each entry starts with a reserved lead word; the remaining words are
//! matched case-insensitively against the following tokens. The parser
//! tries longer phrases first, so `GET BOT MEMORY` wins over `GET`.
//!
//! The runtime's dispatch table is keyed by [`KeywordSpec::name`].

use crate::lexer::Keyword;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordSpec {
    /// Canonical phrase, e.g. `SET BOT MEMORY`.
    pub name: &'static str,
    pub lead: Keyword,
    pub rest: &'static [&'static str],
    pub min_args: usize,
    pub max_args: usize,
    /// Whether the phrase may appear on the right of an assignment.
    pub returns_value: bool,
}

impl KeywordSpec {
    pub fn arity(&self) -> String {
        if self.min_args == self.max_args {
            self.min_args.to_string()
        } else {
            format!("{}-{}", self.min_args, self.max_args)
        }
    }
}

const fn spec(
    name: &'static str,
    lead: Keyword,
    rest: &'static [&'static str],
    min_args: usize,
    max_args: usize,
    returns_value: bool,
) -> KeywordSpec {
    KeywordSpec {
        name,
        lead,
        rest,
        min_args,
        max_args,
        returns_value,
    }
}

pub const CATALOGUE: &[KeywordSpec] = &[
    spec("PRINT", Keyword::Print, &[], 1, 1, false),
    spec("WAIT", Keyword::Wait, &[], 1, 1, false),
    spec("SET BOT MEMORY", Keyword::Set, &["BOT", "MEMORY"], 2, 2, false),
    spec("GET BOT MEMORY", Keyword::Get, &["BOT", "MEMORY"], 1, 1, true),
    spec("SET CONTEXT", Keyword::Set, &["CONTEXT"], 2, 2, false),
    spec("CLEAR CONTEXT", Keyword::Clear, &["CONTEXT"], 0, 0, false),
    spec("USE KB", Keyword::Use, &["KB"], 1, 1, false),
    spec("CLEAR KB", Keyword::Clear, &["KB"], 0, 1, false),
    spec("USE TOOL", Keyword::Use, &["TOOL"], 1, 1, false),
    spec("CLEAR TOOLS", Keyword::Clear, &["TOOLS"], 0, 0, false),
    spec("LLM", Keyword::Llm, &[], 1, 1, true),
    spec("GET", Keyword::Get, &[], 1, 1, true),
    spec("POST", Keyword::Post, &[], 2, 2, true),
];

/// Look up a canonical phrase.
pub fn lookup(name: &str) -> Option<&'static KeywordSpec> {
    CATALOGUE.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}

/// Phrases starting with `lead`, longest first.
pub fn phrases_for(lead: Keyword) -> Vec<&'static KeywordSpec> {
    let mut phrases: Vec<_> = CATALOGUE.iter().filter(|s| s.lead == lead).collect();
    phrases.sort_by(|a, b| b.rest.len().cmp(&a.rest.len()));
    phrases
}

/// Whether a keyword starts a catalogue phrase.
pub fn is_lead(kw: Keyword) -> bool {
    CATALOGUE.iter().any(|s| s.lead == kw)
}
