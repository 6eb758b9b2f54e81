/// Document buffer backed by a piece tree with integrated line tracking.
///
/// The tree is the single source of truth for both text and line information. All
/// offsets are character (Unicode scalar value) offsets.
use crate::error::{CoreError, Result};
use crate::model::event::{BufferChange, ChangeListener, ChangeListeners, ListenerId};
use crate::model::piece_tree::{BufferLocation, LeafData, PieceTree, StringBuffer, TreeStats};
use std::sync::Arc;

/// Line ending format used by the text a buffer was created from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnding {
    /// Unix/Linux/Mac format (\n)
    #[default]
    Lf,
    /// Windows format (\r\n)
    Crlf,
    /// Old Mac format (\r)
    Cr,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::Crlf => "\r\n",
            Self::Cr => "\r",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Lf => "LF",
            Self::Crlf => "CRLF",
            Self::Cr => "CR",
        }
    }

    /// Detect the dominant line ending in the first 8K characters by majority vote
    pub fn detect(text: &str) -> LineEnding {
        let mut crlf_count = 0;
        let mut lf_only_count = 0;
        let mut cr_only_count = 0;

        let mut chars = text.chars().take(8 * 1024).peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '\r' if chars.peek() == Some(&'\n') => {
                    chars.next();
                    crlf_count += 1;
                }
                '\r' => cr_only_count += 1,
                '\n' => lf_only_count += 1,
                _ => {}
            }
        }

        if crlf_count > lf_only_count && crlf_count > cr_only_count {
            LineEnding::Crlf
        } else if cr_only_count > lf_only_count && cr_only_count > crlf_count {
            LineEnding::Cr
        } else {
            LineEnding::Lf
        }
    }
}

/// One replacement in a batch applied by [`DocumentBuffer::apply_edits_descending`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub offset: usize,
    pub length: usize,
    pub text: String,
}

/// An immutable view of a document's content.
///
/// Cloning is cheap: the tree nodes and the text storage are shared with the live
/// buffer. A snapshot never observes edits made after it was taken, which makes it the
/// unit of work for background search.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    piece_tree: PieceTree,
    /// Index 0 is the original text; later entries received inserted text
    buffers: Vec<Arc<StringBuffer>>,
    version: u64,
}

impl DocumentSnapshot {
    fn from_text(text: &str) -> Self {
        let original = StringBuffer::new(0, text);
        let count = original.len();
        let line_feeds = original.line_feeds_in(0, count);
        DocumentSnapshot {
            piece_tree: PieceTree::new(BufferLocation::Stored(0), 0, count, line_feeds),
            buffers: vec![Arc::new(original)],
            version: 0,
        }
    }

    /// Total number of characters
    pub fn len(&self) -> usize {
        self.piece_tree.total_chars()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of lines; an empty document has one
    pub fn line_count(&self) -> usize {
        self.piece_tree.line_count()
    }

    /// Version of the buffer this snapshot was taken from
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn stats(&self) -> TreeStats {
        self.piece_tree.stats()
    }

    fn check_range(&self, offset: usize, length: usize) -> Result<usize> {
        let len = self.len();
        if offset > len {
            return Err(CoreError::out_of_range("offset", offset, len));
        }
        match offset.checked_add(length) {
            Some(end) if end <= len => Ok(end),
            _ => Err(CoreError::out_of_range("range end", offset.saturating_add(length), len)),
        }
    }

    fn check_line(&self, line: usize) -> Result<()> {
        let count = self.line_count();
        if line >= count {
            return Err(CoreError::out_of_range("line", line, count));
        }
        Ok(())
    }

    pub fn char_at(&self, offset: usize) -> Result<char> {
        let info = self
            .piece_tree
            .find_by_offset(offset)
            .ok_or_else(|| CoreError::out_of_range("offset", offset, self.len()))?;
        self.buffers
            .get(info.location.buffer_id())
            .and_then(|b| b.char_at(info.offset + info.offset_in_piece))
            .ok_or_else(|| CoreError::out_of_range("offset", offset, self.len()))
    }

    /// Copy `length` characters starting at `offset`
    pub fn text(&self, offset: usize, length: usize) -> Result<String> {
        let end = self.check_range(offset, length)?;
        let mut out = String::with_capacity(length);
        self.push_range(offset, end, &mut out);
        Ok(out)
    }

    /// The whole document as a string
    pub fn text_all(&self) -> String {
        let mut out = String::with_capacity(self.len());
        self.push_range(0, self.len(), &mut out);
        out
    }

    /// Append `[start, end)` to `out`; the range must already be validated
    pub(crate) fn push_range(&self, start: usize, end: usize, out: &mut String) {
        for piece in self.piece_tree.iter_pieces_in_range(start, end) {
            if let Some(buffer) = self.buffers.get(piece.location.buffer_id()) {
                out.push_str(buffer.slice(piece.buffer_offset, piece.buffer_offset + piece.chars));
            }
        }
    }

    /// Offset of the first character of `line`
    pub fn line_start_offset(&self, line: usize) -> Result<usize> {
        self.check_line(line)?;
        self.piece_tree
            .line_start(line, &self.buffers)
            .ok_or_else(|| CoreError::out_of_range("line", line, self.line_count()))
    }

    /// Offset just past the last character of `line`, excluding its `\n`
    fn line_end_offset(&self, line: usize) -> Result<usize> {
        if line + 1 < self.line_count() {
            Ok(self.line_start_offset(line + 1)? - 1)
        } else {
            Ok(self.len())
        }
    }

    /// Length of `line` in characters, without its terminator
    pub fn line_len(&self, line: usize) -> Result<usize> {
        let start = self.line_start_offset(line)?;
        Ok(self.line_end_offset(line)? - start)
    }

    /// Text of one line, without its terminator
    pub fn line(&self, line: usize) -> Result<String> {
        let start = self.line_start_offset(line)?;
        let end = self.line_end_offset(line)?;
        let mut out = String::with_capacity(end - start);
        self.push_range(start, end, &mut out);
        Ok(out)
    }

    /// Text of `count` consecutive lines starting at `start_line`.
    ///
    /// Locates both ends of the run once and copies it in a single pass over the tree,
    /// instead of one descent per line.
    pub fn line_range(&self, start_line: usize, count: usize) -> Result<Vec<String>> {
        let total = self.line_count();
        let end_line = start_line
            .checked_add(count)
            .filter(|&end| end <= total)
            .ok_or_else(|| CoreError::out_of_range("line", start_line.saturating_add(count), total))?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let start = self.line_start_offset(start_line)?;
        let end = self.line_end_offset(end_line - 1)?;
        let mut text = String::with_capacity(end - start);
        self.push_range(start, end, &mut text);
        Ok(text.split('\n').map(str::to_owned).collect())
    }

    /// Map an offset in `[0, len]` to a zero-based (line, column) pair
    pub fn offset_to_line_column(&self, offset: usize) -> Result<(usize, usize)> {
        let len = self.len();
        if offset > len {
            return Err(CoreError::out_of_range("offset", offset, len));
        }
        let line = self.piece_tree.line_of_offset(offset, &self.buffers);
        let line_start = self.line_start_offset(line)?;
        Ok((line, offset - line_start))
    }

    /// Map a zero-based (line, column) pair to an offset; the column may equal the
    /// line's length (end of line) but not exceed it
    pub fn line_column_to_offset(&self, line: usize, column: usize) -> Result<usize> {
        let start = self.line_start_offset(line)?;
        let line_len = self.line_end_offset(line)? - start;
        if column > line_len {
            return Err(CoreError::out_of_range("column", column, line_len));
        }
        Ok(start + column)
    }
}

/// A mutable document.
///
/// Not internally synchronized: a single owner (the editing thread) mutates it, and
/// background readers work on [`DocumentSnapshot`]s taken with [`Self::snapshot`].
#[derive(Debug)]
pub struct DocumentBuffer {
    snapshot: DocumentSnapshot,
    listeners: ChangeListeners,
    line_ending: LineEnding,
}

impl Default for DocumentBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        DocumentBuffer {
            snapshot: DocumentSnapshot::from_text(""),
            listeners: ChangeListeners::default(),
            line_ending: LineEnding::default(),
        }
    }

    /// Create a buffer holding `text`
    pub fn from_text(text: &str) -> Self {
        let line_ending = LineEnding::detect(text);
        let snapshot = DocumentSnapshot::from_text(text);
        tracing::debug!(
            chars = snapshot.len(),
            lines = snapshot.line_count(),
            line_ending = line_ending.display_name(),
            "DocumentBuffer created"
        );
        DocumentBuffer {
            snapshot,
            listeners: ChangeListeners::default(),
            line_ending,
        }
    }

    /// Borrow the current content without cloning
    pub fn text(&self) -> &DocumentSnapshot {
        &self.snapshot
    }

    /// Take an immutable, `Send + Sync` copy of the current content
    pub fn snapshot(&self) -> DocumentSnapshot {
        self.snapshot.clone()
    }

    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    pub fn version(&self) -> u64 {
        self.snapshot.version
    }

    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    pub fn line_count(&self) -> usize {
        self.snapshot.line_count()
    }

    pub fn char_at(&self, offset: usize) -> Result<char> {
        self.snapshot.char_at(offset)
    }

    pub fn get_text(&self, offset: usize, length: usize) -> Result<String> {
        self.snapshot.text(offset, length)
    }

    pub fn text_all(&self) -> String {
        self.snapshot.text_all()
    }

    pub fn line(&self, line: usize) -> Result<String> {
        self.snapshot.line(line)
    }

    pub fn line_range(&self, start_line: usize, count: usize) -> Result<Vec<String>> {
        self.snapshot.line_range(start_line, count)
    }

    pub fn line_start_offset(&self, line: usize) -> Result<usize> {
        self.snapshot.line_start_offset(line)
    }

    pub fn offset_to_line_column(&self, offset: usize) -> Result<(usize, usize)> {
        self.snapshot.offset_to_line_column(offset)
    }

    pub fn line_column_to_offset(&self, line: usize, column: usize) -> Result<usize> {
        self.snapshot.line_column_to_offset(line, column)
    }

    pub fn stats(&self) -> TreeStats {
        self.snapshot.stats()
    }

    /// Register a listener for change notifications
    pub fn subscribe(&mut self, listener: Box<dyn ChangeListener>) -> ListenerId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Insert `text` so that the character previously at `offset` follows it
    pub fn insert(&mut self, offset: usize, text: &str) -> Result<()> {
        self.replace(offset, 0, text).map(|_| ())
    }

    /// Remove `length` characters at `offset`, returning the removed text
    pub fn delete(&mut self, offset: usize, length: usize) -> Result<String> {
        self.replace(offset, length, "")
    }

    /// Replace `length` characters at `offset` with `text` as a single edit, returning
    /// the removed text. Listeners see one change carrying both extents.
    pub fn replace(&mut self, offset: usize, length: usize, text: &str) -> Result<String> {
        let end = self.snapshot.check_range(offset, length)?;
        if length == 0 && text.is_empty() {
            return Ok(String::new());
        }

        let start_line = self
            .snapshot
            .piece_tree
            .line_of_offset(offset, &self.snapshot.buffers);

        let mut removed = String::new();
        let mut removed_lines = 0;
        if length > 0 {
            self.snapshot.push_range(offset, end, &mut removed);
            removed_lines = removed.matches('\n').count();
            let DocumentSnapshot {
                piece_tree,
                buffers,
                ..
            } = &mut self.snapshot;
            piece_tree.delete(offset, length, buffers);
        }

        let inserted_chars = text.chars().count();
        let inserted_lines = memchr::memchr_iter(b'\n', text.as_bytes()).count();
        if inserted_chars > 0 {
            self.insert_text(offset, text, inserted_chars, inserted_lines);
        }

        self.snapshot.version += 1;
        let change = BufferChange {
            offset,
            start_line,
            removed_chars: length,
            inserted_chars,
            removed_lines,
            inserted_lines,
            version: self.snapshot.version,
        };
        tracing::trace!(?change, "buffer edit");
        self.listeners.notify(&change);
        Ok(removed)
    }

    /// Apply a batch of replacements ordered from the last offset to the first.
    ///
    /// The whole batch is validated before anything is applied: every range must lie in
    /// the current document, and each edit must end at or before the start of the edit
    /// preceding it in the list. Because later edits are applied first, the offsets of
    /// the earlier ones stay valid.
    pub fn apply_edits_descending(&mut self, edits: &[TextEdit]) -> Result<()> {
        let len = self.len();
        let mut previous_start = len;
        for edit in edits {
            let end = self.snapshot.check_range(edit.offset, edit.length)?;
            if end > previous_start {
                return Err(CoreError::out_of_range("edit end", end, previous_start));
            }
            previous_start = edit.offset;
        }

        for edit in edits {
            self.replace(edit.offset, edit.length, &edit.text)?;
        }
        Ok(())
    }

    fn insert_text(&mut self, offset: usize, text: &str, chars: usize, line_feeds: usize) {
        let (location, buffer_offset) = self.append_to_add_buffer(text);
        let DocumentSnapshot {
            piece_tree,
            buffers,
            ..
        } = &mut self.snapshot;

        // Typing at the end of the most recent insertion extends that piece in place
        if piece_tree.try_extend_piece(offset, location, buffer_offset, chars, line_feeds) {
            return;
        }
        piece_tree.insert(
            offset,
            LeafData::new(location, buffer_offset, chars, line_feeds),
            buffers,
        );
    }

    /// Append to the newest add buffer, or start a new one if a snapshot shares it
    fn append_to_add_buffer(&mut self, text: &str) -> (BufferLocation, usize) {
        let buffers = &mut self.snapshot.buffers;
        let last = buffers.len() - 1;
        if last > 0 {
            if let Some(buffer) = Arc::get_mut(&mut buffers[last]) {
                let start = buffer.append(text);
                return (BufferLocation::Added(last), start);
            }
        }
        let id = buffers.len();
        buffers.push(Arc::new(StringBuffer::new(id, text)));
        (BufferLocation::Added(id), 0)
    }
}
