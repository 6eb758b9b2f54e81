//! Windowed scanning.
//!
//! The searched range is copied out of the document one window at a time so memory
//! stays bounded regardless of document size.
//!
//! ```text
//! window 1: [c|------------------ scanned ------------------]
//! window 2:                            [c|overlap|--- scanned ---]
//! ```
//!
//! Each window carries one character of look-behind context (`c`) so `^` and `\b`
//! behave as they would on the whole document. Consecutive windows overlap by at least
//! the pattern length, so a match crossing a seam is seen whole by the later window.
//! A match touching the end of a window that is not the last one may be truncated (or
//! see a false end of input), so it is left for the next window, which starts at or
//! before it. Matches found twice in the overlap are dropped.

use crate::cancel::CancellationFlag;
use crate::error::{CoreError, Result};
use crate::model::buffer::DocumentSnapshot;
use crate::search::matcher::{fold_case, Matcher};
use std::ops::{ControlFlow, Range};
use std::time::{Duration, Instant};

/// Window geometry and time budget for one scan
#[derive(Debug, Clone)]
pub(crate) struct ScanLimits<'a> {
    pub window_chars: usize,
    pub overlap: usize,
    /// `None` disables the per-window time budget
    pub budget: Option<Duration>,
    /// Reported in `SearchTimeout`
    pub pattern: &'a str,
}

/// A match in document coordinates, plus its byte span in the window haystack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Hit {
    pub start: usize,
    pub end: usize,
    pub byte_start: usize,
}

/// Maps between byte and character positions of one string, moving forward only.
#[derive(Debug, Default, Clone, Copy)]
struct CharCursor {
    byte: usize,
    chars: usize,
}

impl CharCursor {
    fn chars_at(&mut self, text: &str, byte: usize) -> usize {
        if byte < self.byte {
            *self = Self::default();
        }
        self.chars += text.get(self.byte..byte).map_or(0, |s| s.chars().count());
        self.byte = byte;
        self.chars
    }

    fn byte_at(&mut self, text: &str, chars: usize) -> Option<usize> {
        if chars < self.chars {
            *self = Self::default();
        }
        let mut rest = text.get(self.byte..)?.chars();
        while self.chars < chars {
            self.byte += rest.next()?.len_utf8();
            self.chars += 1;
        }
        Some(self.byte)
    }
}

/// Text of one window, starting at `context_start`
#[derive(Debug)]
pub(crate) struct Window {
    context_start: usize,
    start: usize,
    end: usize,
    text: String,
    folded: Option<String>,
    line_cursor: CharCursor,
}

impl Window {
    fn load(snapshot: &DocumentSnapshot, start: usize, end: usize, fold: bool) -> Self {
        let context_start = start.saturating_sub(1);
        let mut text = String::with_capacity(end - context_start);
        snapshot.push_range(context_start, end, &mut text);
        let folded = fold.then(|| fold_case(&text));
        Window {
            context_start,
            start,
            end,
            text,
            folded,
            line_cursor: CharCursor::default(),
        }
    }

    /// What the matcher runs over
    pub fn haystack(&self) -> &str {
        self.folded.as_deref().unwrap_or(&self.text)
    }

    /// Byte offset in the haystack where scanning starts, just past the context char
    fn scan_from(&self) -> usize {
        if self.context_start < self.start {
            self.haystack().chars().next().map_or(0, char::len_utf8)
        } else {
            0
        }
    }

    /// Text of the line starting at `line_start` when the whole line lies inside this
    /// window. Calls must use non-decreasing `line_start`s for the cheap path.
    pub fn line_text(&mut self, line_start: usize, doc_len: usize) -> Option<&str> {
        if line_start < self.context_start {
            return None;
        }
        let from = self
            .line_cursor
            .byte_at(&self.text, line_start - self.context_start)?;
        let rest = self.text.get(from..)?;
        match memchr::memchr(b'\n', rest.as_bytes()) {
            Some(len) => rest.get(..len),
            None if self.end == doc_len => Some(rest),
            None => None,
        }
    }
}

/// Scan `range` of `snapshot` window by window, calling `visit` for each accepted
/// match in document order until it breaks or the range is exhausted.
///
/// Cancellation is checked before each window and before each accepted match.
/// `progress` receives the percentage of the range scanned after every window.
pub(crate) fn scan_windows(
    snapshot: &DocumentSnapshot,
    matcher: &Matcher,
    range: Range<usize>,
    limits: &ScanLimits<'_>,
    cancel: Option<&CancellationFlag>,
    progress: &mut dyn FnMut(u8),
    visit: &mut dyn FnMut(&mut Window, Hit) -> Result<ControlFlow<()>>,
) -> Result<()> {
    if range.start >= range.end {
        return Ok(());
    }
    let overlap = limits.overlap;
    let window_chars = limits.window_chars.max(overlap + 1);
    let total = range.end - range.start;
    let mut last_reported = None;
    let mut last: Option<(usize, usize)> = None;
    let mut pos = range.start;

    loop {
        if let Some(cancel) = cancel {
            cancel.check()?;
        }
        let end = (pos + window_chars).min(range.end);
        let final_window = end == range.end;
        let mut window = Window::load(snapshot, pos, end, matcher.folds_case());
        tracing::trace!(window_start = pos, window_end = end, "search window");

        let deadline = limits.budget.map(|budget| Instant::now() + budget);
        let timed_out = || deadline.is_some_and(|d| Instant::now() > d);

        // Resume after the last accepted match; matches starting inside it do not count
        let mut offsets = CharCursor::default();
        let mut deferred = None;
        let mut at = match last {
            Some((_, last_end)) if last_end > pos => offsets
                .byte_at(window.haystack(), last_end - window.context_start)
                .unwrap_or(usize::MAX),
            _ => window.scan_from(),
        };
        while let Some((byte_start, byte_end)) = matcher.find_at(window.haystack(), at) {
            if timed_out() {
                return Err(timeout(limits, pos));
            }
            let start = window.context_start + offsets.chars_at(window.haystack(), byte_start);
            let match_end = window.context_start + offsets.chars_at(window.haystack(), byte_end);

            if byte_end == byte_start {
                // Empty matches are skipped
                at = window
                    .haystack()
                    .get(byte_start..)
                    .and_then(|rest| rest.chars().next())
                    .map_or(usize::MAX, |c| byte_start + c.len_utf8());
                continue;
            }
            at = byte_end;

            if let Some((last_start, last_end)) = last {
                if start <= last_start || start < last_end {
                    continue;
                }
            }
            if !final_window && match_end >= end && start > pos {
                deferred = Some(start);
                break;
            }

            if let Some(cancel) = cancel {
                cancel.check()?;
            }
            last = Some((start, match_end));
            let hit = Hit {
                start,
                end: match_end,
                byte_start,
            };
            if visit(&mut window, hit)?.is_break() {
                return Ok(());
            }
        }
        if timed_out() {
            return Err(timeout(limits, pos));
        }

        let percent = ((end - range.start) * 100 / total) as u8;
        if last_reported != Some(percent) {
            last_reported = Some(percent);
            progress(percent);
        }
        if final_window {
            return Ok(());
        }

        let mut next = end.saturating_sub(overlap);
        if let Some(deferred) = deferred {
            next = next.min(deferred);
        }
        pos = next.max(pos + 1);
    }
}

fn timeout(limits: &ScanLimits<'_>, window_start: usize) -> CoreError {
    tracing::warn!(
        pattern = limits.pattern,
        window_start,
        "search window exceeded its time budget"
    );
    CoreError::SearchTimeout {
        pattern: limits.pattern.to_string(),
        window_start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::model::buffer::DocumentBuffer;
    use crate::search::options::SearchOptions;

    fn limits(window_chars: usize, overlap: usize) -> ScanLimits<'static> {
        ScanLimits {
            window_chars,
            overlap,
            budget: None,
            pattern: "test",
        }
    }

    fn spans(text: &str, options: SearchOptions, window_chars: usize, overlap: usize) -> Vec<(usize, usize)> {
        let buffer = DocumentBuffer::from_text(text);
        let snapshot = buffer.snapshot();
        let matcher = Matcher::compile(&options, &SearchConfig::default())
            .unwrap()
            .unwrap();
        let mut found = Vec::new();
        scan_windows(
            &snapshot,
            &matcher,
            0..snapshot.len(),
            &limits(window_chars, overlap),
            None,
            &mut |_| {},
            &mut |_, hit| {
                found.push((hit.start, hit.end));
                Ok(ControlFlow::Continue(()))
            },
        )
        .unwrap();
        found
    }

    #[test]
    fn test_single_char_matches_across_tiny_windows() {
        let found = spans("aaaa", SearchOptions::literal("a"), 2, 1);
        assert_eq!(found, vec![(0, 1), (1, 2), (2, 3), (3, 4)]);
    }

    #[test]
    fn test_match_across_window_seam_found_once() {
        let text = "xxxxneedlexxxxneedle";
        for window in [3, 5, 7, 11, 64] {
            let found = spans(text, SearchOptions::literal("needle"), window, 6);
            assert_eq!(found, vec![(4, 10), (14, 20)], "window {window}");
        }
    }

    #[test]
    fn test_anchor_uses_look_behind_context() {
        // Window boundaries fall mid-line; `^` must only match at real line starts
        let text = "ab ab\nab";
        let found = spans(text, SearchOptions::regex("^ab"), 3, 2);
        assert_eq!(found, vec![(0, 2), (6, 8)]);

        let found = spans("xcat cat", SearchOptions::literal("cat").whole_word(), 3, 3);
        assert_eq!(found, vec![(5, 8)]);
    }

    #[test]
    fn test_greedy_match_not_truncated_at_window_end() {
        let found = spans("xx aaaaa yy", SearchOptions::regex("a+"), 5, 6);
        assert_eq!(found, vec![(3, 8)]);
    }

    #[test]
    fn test_multibyte_offsets_are_chars() {
        let found = spans("héllo wörld wörld", SearchOptions::literal("wörld"), 8, 5);
        assert_eq!(found, vec![(6, 11), (12, 17)]);

        let found = spans("ÄÖÜ äöü", SearchOptions::literal("äöü").case_insensitive(), 4, 3);
        assert_eq!(found, vec![(0, 3), (4, 7)]);
    }

    #[test]
    fn test_cancel_stops_scan() {
        let buffer = DocumentBuffer::from_text(&"abc ".repeat(100));
        let snapshot = buffer.snapshot();
        let matcher = Matcher::compile(&SearchOptions::literal("abc"), &SearchConfig::default())
            .unwrap()
            .unwrap();
        let cancel = CancellationFlag::new();
        let mut seen = 0;
        let result = scan_windows(
            &snapshot,
            &matcher,
            0..snapshot.len(),
            &limits(16, 3),
            Some(&cancel),
            &mut |_| {},
            &mut |_, _| {
                seen += 1;
                if seen == 5 {
                    cancel.cancel();
                }
                Ok(ControlFlow::Continue(()))
            },
        );
        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert_eq!(seen, 5);
    }

    #[test]
    fn test_zero_budget_times_out() {
        let buffer = DocumentBuffer::from_text(&"abc ".repeat(1000));
        let snapshot = buffer.snapshot();
        let matcher = Matcher::compile(&SearchOptions::regex(r"\w+"), &SearchConfig::default())
            .unwrap()
            .unwrap();
        let limits = ScanLimits {
            budget: Some(Duration::ZERO),
            ..limits(1024, 256)
        };
        let result = scan_windows(
            &snapshot,
            &matcher,
            0..snapshot.len(),
            &limits,
            None,
            &mut |_| {},
            &mut |_, _| {
                std::thread::sleep(Duration::from_millis(1));
                Ok(ControlFlow::Continue(()))
            },
        );
        match result {
            Err(CoreError::SearchTimeout { pattern, window_start }) => {
                assert_eq!(pattern, "test");
                assert_eq!(window_start, 0);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_line_text_from_window() {
        let buffer = DocumentBuffer::from_text("one\ntwo\nthree");
        let snapshot = buffer.snapshot();
        let mut window = Window::load(&snapshot, 5, 13, false);
        assert_eq!(window.line_text(4, 13), Some("two"));
        assert_eq!(window.line_text(8, 13), Some("three"));
        assert_eq!(window.line_text(0, 13), None);

        let mut partial = Window::load(&snapshot, 0, 6, false);
        assert_eq!(partial.line_text(0, 13), Some("one"));
        assert_eq!(partial.line_text(4, 13), None);
    }
}
