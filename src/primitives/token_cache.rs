//! Per-line token cache with incremental re-lexing
//!
//! Each line slot keeps the tokens of that line and the lexer state the line ended in.
//! After an edit only the touched slots are invalidated; re-lexing restarts from the last
//! good state above the edit and stops as soon as a line ends in the same state it ended
//! in before, because every line below it would tokenize exactly as it did.
//!
//! Only a slot that was valid before the pass counts for that comparison. When the pass
//! converges with invalidated slots still further down, it resumes from the next one.

use crate::config::LexingConfig;
use crate::error::Result;
use crate::model::buffer::DocumentSnapshot;
use crate::model::event::{BufferChange, ChangeListener};
use crate::primitives::lexer::{LexState, Token, Tokenizer};
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct LineSlot {
    tokens: Vec<Token>,
    entry_state: LexState,
    end_state: LexState,
    valid: bool,
}

/// What one re-lex pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelexStats {
    /// First line tokenized
    pub start_line: usize,
    pub lines_tokenized: usize,
    /// No usable state was found within the look-back limit
    pub restarted_from_top: bool,
    /// Stopped because a line's end state matched its previous one
    pub stopped_early: bool,
}

#[derive(Debug)]
pub struct TokenCache {
    /// One slot per document line; `None` until first tokenized
    slots: Vec<Option<LineSlot>>,
    batch_lines: usize,
    lookback_limit: usize,
}

impl TokenCache {
    pub fn new(line_count: usize, config: &LexingConfig) -> Self {
        TokenCache {
            slots: vec![None; line_count.max(1)],
            batch_lines: config.batch_lines.max(1),
            lookback_limit: config.lookback_limit,
        }
    }

    pub fn line_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_valid(&self, line: usize) -> bool {
        matches!(self.slots.get(line), Some(Some(slot)) if slot.valid)
    }

    /// Tokens of `line` if it is valid
    pub fn tokens(&self, line: usize) -> Option<&[Token]> {
        match self.slots.get(line) {
            Some(Some(slot)) if slot.valid => Some(&slot.tokens),
            _ => None,
        }
    }

    /// End state of `line` if it is valid
    pub fn end_state(&self, line: usize) -> Option<LexState> {
        match self.slots.get(line) {
            Some(Some(slot)) if slot.valid => Some(slot.end_state),
            _ => None,
        }
    }

    /// Mark `count` lines from `start_line` invalid
    pub fn invalidate(&mut self, start_line: usize, count: usize) {
        let end = start_line.saturating_add(count).min(self.slots.len());
        for slot in self.slots.iter_mut().take(end).skip(start_line).flatten() {
            slot.valid = false;
        }
    }

    /// Insert `count` empty slots before `line`
    pub fn insert_lines(&mut self, line: usize, count: usize) {
        let at = line.min(self.slots.len());
        self.slots
            .splice(at..at, std::iter::repeat(None).take(count));
    }

    /// Remove `count` slots starting at `line`
    pub fn delete_lines(&mut self, line: usize, count: usize) {
        let start = line.min(self.slots.len());
        let end = line.saturating_add(count).min(self.slots.len());
        self.slots.drain(start..end);
        if self.slots.is_empty() {
            self.slots.push(None);
        }
    }

    /// Mirror a buffer edit: the edited line's newlines become `inserted_lines` new ones
    pub fn apply_change(&mut self, change: &BufferChange) {
        let line = change.start_line;
        if change.removed_lines > 0 {
            self.delete_lines(line + 1, change.removed_lines);
        }
        if change.inserted_lines > 0 {
            self.insert_lines(line + 1, change.inserted_lines);
        }
        self.invalidate(line, change.inserted_lines + 1);
    }

    /// Tokenized once and invalidated since
    fn is_invalidated(&self, line: usize) -> bool {
        matches!(self.slots.get(line), Some(Some(slot)) if !slot.valid)
    }

    /// Keep the slot count equal to the document's line count
    fn sync_len(&mut self, line_count: usize) {
        if self.slots.len() != line_count {
            tracing::warn!(
                slots = self.slots.len(),
                lines = line_count,
                "token cache out of step with document, resizing"
            );
            self.slots.resize(line_count.max(1), None);
        }
    }

    /// First line to tokenize for an edit at `edit_line`, with its entry state
    fn restart_point(&self, edit_line: usize) -> (usize, LexState, bool) {
        let mut line = edit_line;
        let mut steps = 0;
        while line > 0 {
            if let Some(state) = self.end_state(line - 1) {
                return (line, state, false);
            }
            line -= 1;
            steps += 1;
            if steps > self.lookback_limit {
                return (0, LexState::NORMAL, true);
            }
        }
        (0, LexState::NORMAL, edit_line > 0)
    }

    /// Re-tokenize from `edit_line` until a line's end state matches the state it had
    /// before, or the document ends
    pub fn incremental_relex(
        &mut self,
        edit_line: usize,
        buffer: &DocumentSnapshot,
        tokenizer: &dyn Tokenizer,
    ) -> Result<RelexStats> {
        self.relex(edit_line, None, buffer, tokenizer)
    }

    /// Make every line in `lines` valid, tokenizing no further than the range's end
    pub fn ensure_valid(
        &mut self,
        lines: Range<usize>,
        buffer: &DocumentSnapshot,
        tokenizer: &dyn Tokenizer,
    ) -> Result<RelexStats> {
        self.sync_len(buffer.line_count());
        let end = lines.end.min(self.slots.len());
        let mut total = RelexStats::default();
        let mut first = true;
        while let Some(line) = (lines.start..end).find(|&l| !self.is_valid(l)) {
            let stats = self.relex(line, Some(end), buffer, tokenizer)?;
            if first {
                total.start_line = stats.start_line;
                first = false;
            }
            total.lines_tokenized += stats.lines_tokenized;
            total.restarted_from_top |= stats.restarted_from_top;
            total.stopped_early |= stats.stopped_early;
        }
        Ok(total)
    }

    fn relex(
        &mut self,
        edit_line: usize,
        limit: Option<usize>,
        buffer: &DocumentSnapshot,
        tokenizer: &dyn Tokenizer,
    ) -> Result<RelexStats> {
        let total_lines = buffer.line_count();
        self.sync_len(total_lines);
        let edit_line = edit_line.min(total_lines - 1);
        let end = limit.unwrap_or(total_lines).min(total_lines);

        let (start, mut state, restarted_from_top) = self.restart_point(edit_line);
        let mut stats = RelexStats {
            start_line: start,
            restarted_from_top,
            ..Default::default()
        };

        let mut line = start;
        let mut target = edit_line;
        let mut converged;
        loop {
            converged = false;
            'batches: while line < end {
                let count = self.batch_lines.min(end - line);
                for text in buffer.line_range(line, count)? {
                    let entry_state = state;
                    let result = tokenizer.tokenize(&text, entry_state);
                    stats.lines_tokenized += 1;
                    let previous = self.end_state(line);
                    state = result.end_state;
                    self.slots[line] = Some(LineSlot {
                        tokens: result.tokens,
                        entry_state,
                        end_state: state,
                        valid: true,
                    });

                    if line > target && previous == Some(state) {
                        converged = true;
                        break 'batches;
                    }
                    line += 1;
                }
            }
            if !converged {
                break;
            }
            stats.stopped_early = true;

            // Another edited region further down still needs lexing
            let Some(next) = (line + 1..end).find(|&l| self.is_invalidated(l)) else {
                break;
            };
            let (resume, resume_state, from_top) = self.restart_point(next);
            stats.restarted_from_top |= from_top;
            line = resume;
            state = resume_state;
            target = next;
        }

        // Stopped by the limit: the next line stays valid only if it was lexed from this state
        if !converged && end < total_lines {
            if let Some(Some(next)) = self.slots.get_mut(end) {
                if next.entry_state != state {
                    next.valid = false;
                }
            }
        }

        tracing::debug!(
            start_line = stats.start_line,
            lines_tokenized = stats.lines_tokenized,
            stopped_early = stats.stopped_early,
            restarted_from_top = stats.restarted_from_top,
            "relexed"
        );
        Ok(stats)
    }
}

fn lock(cache: &Mutex<TokenCache>) -> MutexGuard<'_, TokenCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A token cache shared with the buffer it listens to
#[derive(Debug, Clone)]
pub struct SharedTokenCache(Arc<Mutex<TokenCache>>);

impl SharedTokenCache {
    pub fn new(cache: TokenCache) -> Self {
        SharedTokenCache(Arc::new(Mutex::new(cache)))
    }

    pub fn lock(&self) -> MutexGuard<'_, TokenCache> {
        lock(&self.0)
    }
}

impl ChangeListener for SharedTokenCache {
    fn on_change(&mut self, change: &BufferChange) {
        self.lock().apply_change(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::buffer::DocumentBuffer;
    use crate::primitives::lexer::{CStyleTokenizer, LineTokens, TokenKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps the C tokenizer and counts calls
    struct CountingTokenizer {
        inner: CStyleTokenizer,
        calls: AtomicUsize,
    }

    impl CountingTokenizer {
        fn new() -> Self {
            CountingTokenizer {
                inner: CStyleTokenizer::c(),
                calls: AtomicUsize::new(0),
            }
        }

        fn take_calls(&self) -> usize {
            self.calls.swap(0, Ordering::SeqCst)
        }
    }

    impl Tokenizer for CountingTokenizer {
        fn name(&self) -> &str {
            "counting"
        }

        fn tokenize(&self, line: &str, entry: LexState) -> LineTokens {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.tokenize(line, entry)
        }
    }

    fn config() -> LexingConfig {
        LexingConfig {
            batch_lines: 64,
            lookback_limit: 100,
        }
    }

    fn attach(buffer: &mut DocumentBuffer) -> SharedTokenCache {
        let cache = SharedTokenCache::new(TokenCache::new(buffer.line_count(), &config()));
        buffer.subscribe(Box::new(cache.clone()));
        cache
    }

    #[test]
    fn test_initial_lex_covers_document() {
        let buffer = DocumentBuffer::from_text("int a;\n/* x\ny */\nb");
        let mut cache = TokenCache::new(buffer.line_count(), &config());
        let lexer = CountingTokenizer::new();
        let stats = cache.incremental_relex(0, buffer.text(), &lexer).unwrap();
        assert_eq!(stats.lines_tokenized, 4);
        assert!(!stats.stopped_early);
        assert_eq!(cache.end_state(1).unwrap().id, 1);
        assert_eq!(cache.end_state(2), Some(LexState::NORMAL));
        assert_eq!(cache.tokens(3).unwrap()[0].kind, TokenKind::Identifier);
    }

    #[test]
    fn test_relex_stops_when_state_matches() {
        let mut lines: Vec<String> = (0..1000).map(|i| format!("int v{i};")).collect();
        lines[5] = "/* open".to_string();
        for line in lines.iter_mut().take(20).skip(6) {
            *line = "comment text".to_string();
        }
        lines[20] = "*/ close".to_string();
        let mut buffer = DocumentBuffer::from_text(&lines.join("\n"));
        let cache = attach(&mut buffer);
        let lexer = CountingTokenizer::new();

        cache
            .lock()
            .incremental_relex(0, buffer.text(), &lexer)
            .unwrap();
        assert_eq!(lexer.take_calls(), 1000);

        // Turn the block comment opener into a line comment
        let offset = buffer.line_start_offset(5).unwrap();
        buffer.replace(offset, 2, "//").unwrap();
        assert!(!cache.lock().is_valid(5));

        let stats = cache
            .lock()
            .incremental_relex(5, buffer.text(), &lexer)
            .unwrap();
        assert_eq!(stats.start_line, 5);
        assert!(stats.stopped_early);
        assert_eq!(stats.lines_tokenized, 16);
        assert_eq!(lexer.take_calls(), 16);

        let cache = cache.lock();
        assert_eq!(cache.end_state(10), Some(LexState::NORMAL));
        assert!((0..1000).all(|line| cache.is_valid(line)));
    }

    #[test]
    fn test_relex_reaches_every_edited_region() {
        let text: Vec<String> = (0..60).map(|i| format!("int v{i};")).collect();
        let mut buffer = DocumentBuffer::from_text(&text.join("\n"));
        let cache = attach(&mut buffer);
        let lexer = CountingTokenizer::new();
        cache.lock().incremental_relex(0, buffer.text(), &lexer).unwrap();
        lexer.take_calls();

        // Two separate edits before any re-lex: the lower one opens a block comment
        let offset = buffer.line_start_offset(50).unwrap();
        buffer.replace(offset, 3, "/*").unwrap();
        let offset = buffer.line_start_offset(5).unwrap();
        buffer.replace(offset, 3, "char").unwrap();

        let stats = cache.lock().incremental_relex(5, buffer.text(), &lexer).unwrap();
        assert!(stats.stopped_early);
        // Lines 5 and 6, then 50 through the end of the document
        assert_eq!(stats.lines_tokenized, 2 + 10);
        assert_eq!(lexer.take_calls(), 12);

        let cache = cache.lock();
        assert!((0..60).all(|line| cache.is_valid(line)));
        assert_eq!(cache.tokens(5).unwrap()[0].kind, TokenKind::Keyword);
        assert!(cache.tokens(50).is_some());
        assert_eq!(cache.end_state(59).unwrap().id, 1);
    }

    #[test]
    fn test_relex_ignores_end_state_of_invalidated_slot() {
        let mut buffer = DocumentBuffer::from_text("a\nb\nc\nd");
        let cache = attach(&mut buffer);
        let lexer = CStyleTokenizer::c();
        cache.lock().incremental_relex(0, buffer.text(), &lexer).unwrap();

        // Line 2 is invalidated but its old end state would match
        cache.lock().invalidate(1, 2);
        let stats = cache.lock().incremental_relex(1, buffer.text(), &lexer).unwrap();
        assert_eq!(stats.lines_tokenized, 3);
        assert!((0..4).all(|line| cache.lock().is_valid(line)));
    }

    #[test]
    fn test_line_insertion_and_deletion_keep_slots_aligned() {
        let mut buffer = DocumentBuffer::from_text("a\nb\nc\nd");
        let cache = attach(&mut buffer);
        let lexer = CStyleTokenizer::c();
        cache.lock().incremental_relex(0, buffer.text(), &lexer).unwrap();

        buffer.insert(2, "x\ny\n").unwrap();
        assert_eq!(cache.lock().line_count(), 6);
        assert!(!cache.lock().is_valid(1));
        assert!(!cache.lock().is_valid(3));
        assert!(cache.lock().is_valid(4));

        let offset = buffer.line_start_offset(1).unwrap();
        buffer.delete(offset, 4).unwrap();
        assert_eq!(cache.lock().line_count(), buffer.line_count());

        let stats = cache.lock().incremental_relex(1, buffer.text(), &lexer).unwrap();
        assert!(stats.stopped_early);
        assert!((0..buffer.line_count()).all(|l| cache.lock().is_valid(l)));
    }

    #[test]
    fn test_restart_from_top_beyond_lookback() {
        let text: String = (0..50).map(|i| format!("line {i}\n")).collect();
        let buffer = DocumentBuffer::from_text(&text);
        let mut cache = TokenCache::new(
            buffer.line_count(),
            &LexingConfig {
                batch_lines: 8,
                lookback_limit: 3,
            },
        );
        let lexer = CountingTokenizer::new();
        let stats = cache.incremental_relex(40, buffer.text(), &lexer).unwrap();
        assert!(stats.restarted_from_top);
        assert_eq!(stats.start_line, 0);
        assert_eq!(stats.lines_tokenized, 51);
    }

    #[test]
    fn test_ensure_valid_stops_at_range_end() {
        let buffer = DocumentBuffer::from_text("/* a\nb\nc */\nd\ne");
        let mut cache = TokenCache::new(buffer.line_count(), &config());
        let lexer = CountingTokenizer::new();

        let stats = cache.ensure_valid(0..2, buffer.text(), &lexer).unwrap();
        assert_eq!(stats.lines_tokenized, 2);
        assert!(cache.is_valid(1));
        assert!(!cache.is_valid(2));

        cache.ensure_valid(0..5, buffer.text(), &lexer).unwrap();
        assert!((0..5).all(|l| cache.is_valid(l)));
        assert_eq!(cache.end_state(2), Some(LexState::NORMAL));
    }

    #[test]
    fn test_ensure_valid_invalidates_follower_when_state_changes() {
        let mut buffer = DocumentBuffer::from_text("a\nb\nc");
        let cache = attach(&mut buffer);
        let lexer = CStyleTokenizer::c();
        cache.lock().incremental_relex(0, buffer.text(), &lexer).unwrap();

        buffer.insert(0, "/* ").unwrap();
        cache.lock().ensure_valid(0..1, buffer.text(), &lexer).unwrap();
        let cache = cache.lock();
        assert!(cache.is_valid(0));
        assert!(!cache.is_valid(1));
    }
}
