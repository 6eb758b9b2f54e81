//! Pattern compilation: a literal substring finder or a bounded regex.

use crate::config::SearchConfig;
use crate::error::{CoreError, Result};
use crate::search::options::SearchOptions;
use memchr::memmem;
use regex::{Regex, RegexBuilder};

/// A compiled search pattern.
///
/// Positions passed in and returned are byte offsets into the haystack handed to
/// [`Matcher::find_at`]; for case-insensitive literal search that haystack must be
/// the output of [`fold_case`].
#[derive(Debug)]
pub enum Matcher {
    Literal {
        finder: memmem::Finder<'static>,
        fold_case: bool,
    },
    Regex(Regex),
}

impl Matcher {
    /// Compile `options` into a matcher. An empty pattern yields `None`: it matches
    /// nothing. Invalid or oversized regexes fail with `Pattern`.
    pub fn compile(options: &SearchOptions, config: &SearchConfig) -> Result<Option<Self>> {
        if options.pattern.is_empty() {
            return Ok(None);
        }

        if options.is_literal() {
            let needle = if options.case_sensitive {
                options.pattern.clone()
            } else {
                fold_case(&options.pattern)
            };
            return Ok(Some(Matcher::Literal {
                finder: memmem::Finder::new(needle.as_bytes()).into_owned(),
                fold_case: !options.case_sensitive,
            }));
        }

        let mut pattern = if options.regex {
            options.pattern.clone()
        } else {
            regex::escape(&options.pattern)
        };
        if options.whole_word {
            pattern = format!(r"\b(?:{pattern})\b");
        }
        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(!options.case_sensitive)
            .multi_line(true)
            .size_limit(config.regex_size_limit)
            .build()
            .map_err(|e| CoreError::Pattern(e.to_string()))?;
        Ok(Some(Matcher::Regex(regex)))
    }

    /// Whether haystacks must be passed through [`fold_case`] first
    pub fn folds_case(&self) -> bool {
        matches!(self, Matcher::Literal { fold_case: true, .. })
    }

    /// First match starting at or after byte `at`, as a byte range
    pub fn find_at(&self, haystack: &str, at: usize) -> Option<(usize, usize)> {
        match self {
            Matcher::Literal { finder, .. } => {
                let rest = haystack.as_bytes().get(at..)?;
                finder
                    .find(rest)
                    .map(|pos| (at + pos, at + pos + finder.needle().len()))
            }
            Matcher::Regex(regex) => {
                if at > haystack.len() {
                    return None;
                }
                regex.find_at(haystack, at).map(|m| (m.start(), m.end()))
            }
        }
    }

    /// Replacement text for the match starting at byte `start`. Regexes expand `$1` and
    /// `${name}` against the match; literal replacements are used verbatim.
    pub fn expand(&self, haystack: &str, start: usize, replacement: &str) -> String {
        match self {
            Matcher::Literal { .. } => replacement.to_string(),
            Matcher::Regex(regex) => match regex.captures_at(haystack, start) {
                Some(caps) => {
                    let mut out = String::new();
                    caps.expand(replacement, &mut out);
                    out
                }
                None => replacement.to_string(),
            },
        }
    }
}

/// Lowercase `text` one character at a time, keeping characters whose lowercase form
/// is longer than one character. The result has the same number of characters as the
/// input, so character offsets carry over unchanged.
pub fn fold_case(text: &str) -> String {
    text.chars().map(fold_char).collect()
}

fn fold_char(c: char) -> char {
    if c.is_ascii() {
        return c.to_ascii_lowercase();
    }
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => l,
        _ => c,
    }
}
