//! Sparse line index over a read-only backing source.
//!
//! Only every `sample_interval`-th line start is stored. A query jumps straight to the
//! checkpoint for its line (`line / sample_interval`, no search) and scans forward over at
//! most `sample_interval` lines, so memory stays proportional to `lines / interval` while
//! each lookup touches a bounded amount of the source.
//!
//! Offsets are byte offsets into the source. Lines end at `\n` in the source's encoding,
//! and also at a lone `\r` with [`LineBreaks::Any`]. A trailing terminator starts one
//! final empty line, matching the editable buffer.

use crate::cancel::CancellationFlag;
use crate::error::{CoreError, Result};
use crate::model::backing::BackingSource;
use crate::model::encoding::Encoding;
use std::ops::ControlFlow;
use std::sync::Arc;

/// Bytes read from the source per scan step; even so UTF-16 units never straddle a block
const SCAN_BLOCK: usize = 64 * 1024;

/// Progress is reported after this many bytes
const PROGRESS_STEP: usize = 4 * 1024 * 1024;

/// Which terminators end a line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineBreaks {
    /// `\n` only; a `\r` right before it still belongs to the terminator
    #[default]
    Lf,
    /// `\n`, `\r\n` and a lone `\r`, the way `normalize_line_endings` reads text
    Any,
}

/// Finds line starts block by block. A `\r` in the last unit of a block is held until
/// the next block shows whether a `\n` follows it.
struct BreakScanner {
    encoding: Encoding,
    breaks: LineBreaks,
    pending_cr: Option<usize>,
}

impl BreakScanner {
    fn new(encoding: Encoding, breaks: LineBreaks) -> Self {
        BreakScanner {
            encoding,
            breaks,
            pending_cr: None,
        }
    }

    /// Call `visit` with each line start in `block`, which begins at `block_pos`
    fn feed(
        &mut self,
        block: &[u8],
        block_pos: usize,
        visit: &mut impl FnMut(usize) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        let unit = self.encoding.unit_size();
        let lf = self.encoding.line_feed();
        let cr = self.encoding.carriage_return();
        // Offset of the ASCII byte inside a code unit
        let lag = usize::from(self.encoding == Encoding::Utf16Be);

        if let Some(start) = self.pending_cr.take() {
            if block.get(..unit) != Some(lf) && visit(start).is_break() {
                return ControlFlow::Break(());
            }
        }

        let second = match self.breaks {
            LineBreaks::Lf => b'\n',
            LineBreaks::Any => b'\r',
        };
        for i in memchr::memchr2_iter(b'\n', second, block) {
            let Some(s) = i.checked_sub(lag) else {
                continue;
            };
            if (block_pos + s) % unit != 0 {
                continue;
            }
            let line_start = block_pos + s + unit;
            let found = match block.get(s..s + unit) {
                Some(u) if u == lf => Some(line_start),
                Some(u) if u == cr && self.breaks == LineBreaks::Any => {
                    match block.get(s + unit..s + 2 * unit) {
                        Some(next) if next == lf => None,
                        Some(_) => Some(line_start),
                        None => {
                            self.pending_cr = Some(line_start);
                            None
                        }
                    }
                }
                _ => None,
            };
            if let Some(start) = found {
                if visit(start).is_break() {
                    return ControlFlow::Break(());
                }
            }
        }
        ControlFlow::Continue(())
    }

    /// End of the source: a held `\r` was a lone one
    fn finish(&mut self, visit: &mut impl FnMut(usize) -> ControlFlow<()>) -> ControlFlow<()> {
        match self.pending_cr.take() {
            Some(start) => visit(start),
            None => ControlFlow::Continue(()),
        }
    }
}

/// Call `visit` with each line start after `from` until it breaks or the source ends
fn scan_line_starts(
    source: &dyn BackingSource,
    encoding: Encoding,
    breaks: LineBreaks,
    from: usize,
    mut visit: impl FnMut(usize) -> ControlFlow<()>,
) -> Result<()> {
    let len = source.len()?;
    let mut scanner = BreakScanner::new(encoding, breaks);
    let mut buf = vec![0u8; SCAN_BLOCK];
    let mut pos = from;
    while pos < len {
        let n = source.read_at(pos, &mut buf)?;
        if n == 0 {
            break;
        }
        if scanner.feed(&buf[..n], pos, &mut visit).is_break() {
            return Ok(());
        }
        pos += n;
    }
    let _ = scanner.finish(&mut visit);
    Ok(())
}

/// Sparse checkpoints of line-start offsets
pub struct LineIndex {
    source: Arc<dyn BackingSource>,
    encoding: Encoding,
    breaks: LineBreaks,
    /// `entries[k]` is the start of line `k * sample_interval`
    entries: Vec<usize>,
    sample_interval: usize,
    total_lines: usize,
    source_len: usize,
    complete: bool,
}

impl std::fmt::Debug for LineIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineIndex")
            .field("entries", &self.entries.len())
            .field("sample_interval", &self.sample_interval)
            .field("total_lines", &self.total_lines)
            .field("complete", &self.complete)
            .finish()
    }
}

impl LineIndex {
    /// Scan `source` once with `\n` line breaks, keeping every `sample_interval`-th line
    /// start.
    ///
    /// `cancel` is polled once per scan block. A cancelled build still returns an index,
    /// but it reports `is_complete() == false` and every query on it fails with
    /// [`CoreError::Cancelled`]. `progress` receives values in `[0, 1]`.
    pub fn build(
        source: Arc<dyn BackingSource>,
        encoding: Encoding,
        sample_interval: usize,
        cancel: &CancellationFlag,
        progress: impl FnMut(f64),
    ) -> Result<Self> {
        Self::build_with(source, encoding, LineBreaks::Lf, sample_interval, cancel, progress)
    }

    /// [`Self::build`] with a choice of line terminators
    pub fn build_with(
        source: Arc<dyn BackingSource>,
        encoding: Encoding,
        breaks: LineBreaks,
        sample_interval: usize,
        cancel: &CancellationFlag,
        mut progress: impl FnMut(f64),
    ) -> Result<Self> {
        let sample_interval = sample_interval.max(1);
        let source_len = source.len()?;
        tracing::debug!(bytes = source_len, sample_interval, "line index build started");

        let mut entries = Vec::with_capacity(source_len / (64 * sample_interval) + 1);
        entries.push(0);
        let mut total_lines = 1;
        let mut complete = true;

        let mut record = |start: usize| {
            if total_lines % sample_interval == 0 {
                entries.push(start);
            }
            total_lines += 1;
            ControlFlow::Continue(())
        };
        let mut scanner = BreakScanner::new(encoding, breaks);
        let mut buf = vec![0u8; SCAN_BLOCK];
        let mut pos = 0;
        let mut next_report = PROGRESS_STEP;
        while pos < source_len {
            if cancel.is_cancelled() {
                complete = false;
                break;
            }
            let n = source.read_at(pos, &mut buf)?;
            if n == 0 {
                break;
            }
            let _ = scanner.feed(&buf[..n], pos, &mut record);
            pos += n;
            if pos >= next_report {
                progress(pos as f64 / source_len as f64);
                next_report += PROGRESS_STEP;
            }
        }
        if complete {
            let _ = scanner.finish(&mut record);
        }

        if complete {
            progress(1.0);
            tracing::debug!(total_lines, checkpoints = entries.len(), "line index built");
        } else {
            tracing::debug!(scanned = pos, lines_so_far = total_lines, "line index build cancelled");
        }

        Ok(LineIndex {
            source,
            encoding,
            breaks,
            entries,
            sample_interval,
            total_lines,
            source_len,
            complete,
        })
    }

    /// Whether the last build scanned the whole source
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    fn ensure_complete(&self) -> Result<()> {
        if self.complete {
            Ok(())
        } else {
            Err(CoreError::Cancelled)
        }
    }

    pub fn total_lines(&self) -> usize {
        self.total_lines
    }

    pub fn sample_interval(&self) -> usize {
        self.sample_interval
    }

    pub fn source_len(&self) -> usize {
        self.source_len
    }

    /// Approximate heap footprint of the checkpoints
    pub fn memory_usage(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<usize>()
    }

    /// Byte offset of `line`'s first byte
    pub fn line_start_offset(&self, line: usize) -> Result<usize> {
        self.ensure_complete()?;
        if line >= self.total_lines {
            return Err(CoreError::out_of_range("line", line, self.total_lines));
        }
        let checkpoint = line / self.sample_interval;
        let base = self.entries[checkpoint];
        let remaining = line % self.sample_interval;
        if remaining == 0 {
            return Ok(base);
        }

        let mut seen = 0;
        let mut found = None;
        scan_line_starts(self.source.as_ref(), self.encoding, self.breaks, base, |start| {
            seen += 1;
            if seen == remaining {
                found = Some(start);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        // The source must have changed underneath the index
        found.ok_or_else(|| CoreError::out_of_range("line", line, self.total_lines))
    }

    /// Line containing byte `offset` (an offset equal to the source length is valid)
    pub fn line_of_offset(&self, offset: usize) -> Result<usize> {
        self.ensure_complete()?;
        if offset > self.source_len {
            return Err(CoreError::out_of_range("byte offset", offset, self.source_len));
        }
        let checkpoint = self.entries.partition_point(|&e| e <= offset) - 1;
        let mut line = checkpoint * self.sample_interval;
        let base = self.entries[checkpoint];
        scan_line_starts(self.source.as_ref(), self.encoding, self.breaks, base, |start| {
            if start > offset {
                ControlFlow::Break(())
            } else {
                line += 1;
                ControlFlow::Continue(())
            }
        })?;
        Ok(line)
    }

    /// Byte range of `line`, excluding its terminator
    pub fn line_range(&self, line: usize) -> Result<(usize, usize)> {
        let start = self.line_start_offset(line)?;
        if line + 1 >= self.total_lines {
            return Ok((start, self.source_len));
        }
        let next = self.line_start_offset(line + 1)?;
        let unit = self.encoding.unit_size();
        let mut end = next - unit;
        if end >= start + unit {
            // `\r\n` is one terminator
            let mut pair = vec![0u8; 2 * unit];
            self.source.read_at(end - unit, &mut pair)?;
            let (prev, last) = pair.split_at(unit);
            if prev == self.encoding.carriage_return() && last == self.encoding.line_feed() {
                end -= unit;
            }
        }
        Ok((start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::backing::MemorySource;

    fn index(text: &str, interval: usize) -> LineIndex {
        let source: Arc<dyn BackingSource> = Arc::new(MemorySource::new(text));
        LineIndex::build(source, Encoding::Utf8, interval, &CancellationFlag::new(), |_| {})
            .unwrap()
    }

    #[test]
    fn test_three_lines_interval_one() {
        let idx = index("line1\nline2\nline3", 1);
        assert_eq!(idx.total_lines(), 3);
        assert_eq!(idx.line_start_offset(0).unwrap(), 0);
        assert_eq!(idx.line_start_offset(1).unwrap(), 6);
        assert_eq!(idx.line_start_offset(2).unwrap(), 12);
        assert!(matches!(
            idx.line_start_offset(3),
            Err(CoreError::OutOfRange { value: 3, bound: 3, .. })
        ));
    }

    #[test]
    fn test_sparse_checkpoints_match_dense() {
        let text: String = (0..500).map(|i| format!("row {i}\n")).collect();
        let dense = index(&text, 1);
        let sparse = index(&text, 64);
        assert_eq!(dense.total_lines(), 501);
        assert_eq!(sparse.total_lines(), 501);
        for line in 0..501 {
            assert_eq!(
                sparse.line_start_offset(line).unwrap(),
                dense.line_start_offset(line).unwrap(),
                "line {line}"
            );
        }
        assert!(sparse.memory_usage() < dense.memory_usage());
    }

    #[test]
    fn test_line_of_offset() {
        let idx = index("ab\ncd\n\nef", 2);
        assert_eq!(idx.line_of_offset(0).unwrap(), 0);
        assert_eq!(idx.line_of_offset(2).unwrap(), 0);
        assert_eq!(idx.line_of_offset(3).unwrap(), 1);
        assert_eq!(idx.line_of_offset(6).unwrap(), 2);
        assert_eq!(idx.line_of_offset(7).unwrap(), 3);
        assert_eq!(idx.line_of_offset(9).unwrap(), 3);
        assert!(idx.line_of_offset(10).is_err());
    }

    #[test]
    fn test_line_range_strips_crlf() {
        let idx = index("one\r\ntwo\nthree", 1);
        assert_eq!(idx.line_range(0).unwrap(), (0, 3));
        assert_eq!(idx.line_range(1).unwrap(), (5, 8));
        assert_eq!(idx.line_range(2).unwrap(), (9, 14));
    }

    fn index_any(text: &str) -> LineIndex {
        let source: Arc<dyn BackingSource> = Arc::new(MemorySource::new(text));
        LineIndex::build_with(
            source,
            Encoding::Utf8,
            LineBreaks::Any,
            1,
            &CancellationFlag::new(),
            |_| {},
        )
        .unwrap()
    }

    #[test]
    fn test_lone_cr_ends_a_line() {
        let idx = index_any("a\rb\r\nc\r");
        assert_eq!(idx.total_lines(), 4);
        assert_eq!(idx.line_range(0).unwrap(), (0, 1));
        assert_eq!(idx.line_range(1).unwrap(), (2, 3));
        assert_eq!(idx.line_range(2).unwrap(), (5, 6));
        assert_eq!(idx.line_range(3).unwrap(), (7, 7));
        assert_eq!(idx.line_of_offset(4).unwrap(), 1);

        assert_eq!(index("a\rb\r\nc\r", 1).total_lines(), 2);
    }

    #[test]
    fn test_cr_at_scan_block_end() {
        // A `\r\n` split by the first block boundary, a lone `\r` ending the second block
        let mut text = "x".repeat(SCAN_BLOCK - 1);
        text.push_str("\r\n");
        text.push_str(&"y".repeat(SCAN_BLOCK - 2));
        text.push_str("\rz");
        let idx = index_any(&text);
        assert_eq!(idx.total_lines(), 3);
        assert_eq!(idx.line_start_offset(1).unwrap(), SCAN_BLOCK + 1);
        assert_eq!(idx.line_start_offset(2).unwrap(), 2 * SCAN_BLOCK);
        assert_eq!(idx.line_range(0).unwrap(), (0, SCAN_BLOCK - 1));
        assert_eq!(idx.line_range(1).unwrap(), (SCAN_BLOCK + 1, 2 * SCAN_BLOCK - 1));
    }

    #[test]
    fn test_trailing_newline_adds_empty_line() {
        let idx = index("a\n", 1);
        assert_eq!(idx.total_lines(), 2);
        assert_eq!(idx.line_range(1).unwrap(), (2, 2));
        assert_eq!(index("", 4).total_lines(), 1);
    }

    #[test]
    fn test_utf16_newlines() {
        let bytes: Vec<u8> = "x\u{010A}\ny"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let source: Arc<dyn BackingSource> = Arc::new(MemorySource::new(bytes));
        let idx =
            LineIndex::build(source, Encoding::Utf16Le, 1, &CancellationFlag::new(), |_| {})
                .unwrap();
        // U+010A contains a 0x0A byte but is not a line break
        assert_eq!(idx.total_lines(), 2);
        assert_eq!(idx.line_start_offset(1).unwrap(), 6);
    }

    #[test]
    fn test_cancelled_build_is_flagged() {
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let source: Arc<dyn BackingSource> = Arc::new(MemorySource::new("a\nb\nc"));
        let idx = LineIndex::build(source, Encoding::Utf8, 1, &cancel, |_| {}).unwrap();
        assert!(!idx.is_complete());
        assert!(matches!(idx.line_start_offset(0), Err(CoreError::Cancelled)));
    }

    #[test]
    fn test_progress_reaches_one() {
        let mut last = 0.0;
        let source: Arc<dyn BackingSource> = Arc::new(MemorySource::new("a\nb"));
        LineIndex::build(source, Encoding::Utf8, 1, &CancellationFlag::new(), |p| last = p)
            .unwrap();
        assert_eq!(last, 1.0);
    }
}
