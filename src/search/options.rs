use crate::error::{CoreError, Result};
use crate::model::buffer::DocumentSnapshot;
use std::ops::Range;
use std::sync::Arc;

/// Search direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchDirection {
    #[default]
    Forward,
    Backward,
}

/// Part of a document a search looks at
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SearchScope {
    #[default]
    Document,
    /// Character range, e.g. the current selection
    Range(Range<usize>),
}

impl SearchScope {
    /// Resolve against a document of `len` characters
    pub fn resolve(&self, len: usize) -> Result<Range<usize>> {
        match self {
            SearchScope::Document => Ok(0..len),
            SearchScope::Range(range) => {
                if range.end > len {
                    return Err(CoreError::out_of_range("scope end", range.end, len));
                }
                if range.start > range.end {
                    return Err(CoreError::out_of_range(
                        "scope start",
                        range.start,
                        range.end,
                    ));
                }
                Ok(range.clone())
            }
        }
    }
}

/// What to search for and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub pattern: String,
    pub case_sensitive: bool,
    pub whole_word: bool,
    /// Treat `pattern` as a regular expression
    pub regex: bool,
    pub direction: SearchDirection,
    pub wrap_around: bool,
    pub scope: SearchScope,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            case_sensitive: true,
            whole_word: false,
            regex: false,
            direction: SearchDirection::Forward,
            wrap_around: true,
            scope: SearchScope::Document,
        }
    }
}

impl SearchOptions {
    /// Case-sensitive literal search over the whole document
    pub fn literal(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Default::default()
        }
    }

    /// Regular expression search over the whole document
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            regex: true,
            ..Default::default()
        }
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }

    pub fn whole_word(mut self) -> Self {
        self.whole_word = true;
        self
    }

    pub fn backward(mut self) -> Self {
        self.direction = SearchDirection::Backward;
        self
    }

    pub fn no_wrap(mut self) -> Self {
        self.wrap_around = false;
        self
    }

    pub fn in_range(mut self, range: Range<usize>) -> Self {
        self.scope = SearchScope::Range(range);
        self
    }

    /// True when matching can skip the regex engine entirely
    pub fn is_literal(&self) -> bool {
        !self.regex && !self.whole_word
    }
}

/// One match, with enough context to show it in a results list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    /// Character offset of the match start
    pub offset: usize,
    /// Match length in characters
    pub length: usize,
    /// 1-based line of the match start
    pub line: usize,
    /// 1-based column of the match start, in characters
    pub column: usize,
    /// Full text of the line containing the match start, without terminator
    pub line_text: Arc<str>,
    /// Identifies the document in a multi-document search
    pub source_id: Option<Arc<str>>,
}

impl SearchResult {
    /// Build a result for `[offset, offset + length)`, taking line text from the snapshot
    pub fn from_span(
        snapshot: &DocumentSnapshot,
        offset: usize,
        length: usize,
        lines: &mut LineTextCache,
        source_id: Option<Arc<str>>,
    ) -> Result<Self> {
        let (line, column) = snapshot.offset_to_line_column(offset)?;
        let line_text = lines.get_or_insert_with(line, || snapshot.line(line).map(Arc::from))?;
        Ok(SearchResult {
            offset,
            length,
            line: line + 1,
            column: column + 1,
            line_text,
            source_id,
        })
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.length
    }
}

/// Remembers the text of the most recent line a result was built for.
///
/// Matches arrive in document order, so consecutive matches on one line share a single
/// allocation. Owned by the caller of a bulk search and passed down explicitly.
#[derive(Debug, Default)]
pub struct LineTextCache {
    last: Option<(usize, Arc<str>)>,
}

impl LineTextCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text of `line`, computing it with `fetch` unless it was the last line requested
    pub fn get_or_insert_with(
        &mut self,
        line: usize,
        fetch: impl FnOnce() -> Result<Arc<str>>,
    ) -> Result<Arc<str>> {
        if let Some((cached_line, text)) = &self.last {
            if *cached_line == line {
                return Ok(text.clone());
            }
        }
        let text = fetch()?;
        self.last = Some((line, text.clone()));
        Ok(text)
    }

    pub fn clear(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::buffer::DocumentBuffer;

    #[test]
    fn test_scope_resolution() {
        assert_eq!(SearchScope::Document.resolve(10).unwrap(), 0..10);
        assert_eq!(SearchScope::Range(2..5).resolve(10).unwrap(), 2..5);
        assert!(SearchScope::Range(2..11).resolve(10).is_err());
        #[allow(clippy::reversed_empty_ranges)]
        let reversed = SearchScope::Range(5..2);
        assert!(reversed.resolve(10).is_err());
    }

    #[test]
    fn test_builder_flags() {
        let options = SearchOptions::literal("x");
        assert!(options.is_literal());
        assert!(options.case_sensitive && options.wrap_around);

        let options = SearchOptions::literal("x").whole_word().backward().no_wrap();
        assert!(!options.is_literal());
        assert_eq!(options.direction, SearchDirection::Backward);
        assert!(!options.wrap_around);
        assert!(!SearchOptions::regex("x+").is_literal());
    }

    #[test]
    fn test_line_text_shared_between_matches_on_one_line() {
        let buffer = DocumentBuffer::from_text("foo foo\nbar");
        let snapshot = buffer.snapshot();
        let mut lines = LineTextCache::new();

        let first = SearchResult::from_span(&snapshot, 0, 3, &mut lines, None).unwrap();
        let second = SearchResult::from_span(&snapshot, 4, 3, &mut lines, None).unwrap();
        let third = SearchResult::from_span(&snapshot, 8, 3, &mut lines, None).unwrap();

        assert_eq!((second.line, second.column), (1, 5));
        assert!(Arc::ptr_eq(&first.line_text, &second.line_text));
        assert_eq!(&*third.line_text, "bar");
        assert_eq!((third.line, third.column), (2, 1));
    }
}
