//! Piece tree with integrated line tracking.
//!
//! Text lives in append-only [`StringBuffer`]s; the tree only records which slice of
//! which buffer appears where in the document. Every node caches its character count and
//! newline count, so offset lookups and line lookups are both O(log n) descents.
//!
//! Nodes are immutable and shared through `Arc`: an edit copies only the path it touches,
//! which makes cloning the whole tree (for a search snapshot) O(1). Balance is kept with
//! AVL rotations inside [`PieceTree::join`], which is the single place where subtrees are
//! glued back together after a split.

use std::sync::Arc;

/// Characters between entries of [`StringBuffer`]'s char-to-byte index
const CHAR_STRIDE: usize = 64;

/// An append-only UTF-8 string, addressed by character index.
///
/// Keeps the byte offset of every [`CHAR_STRIDE`]-th character so a character index maps
/// to a byte offset with one lookup and a short walk, plus the index after each `\n`.
#[derive(Debug, Clone)]
pub struct StringBuffer {
    /// Unique identifier for this buffer
    pub id: usize,
    data: String,
    chars: usize,
    /// `char_bytes[k]` is the byte offset of character `k * CHAR_STRIDE`
    char_bytes: Vec<usize>,
    /// Index just past every `\n` in `data`, with a leading 0
    line_starts: Vec<usize>,
}

impl StringBuffer {
    pub fn new(id: usize, text: &str) -> Self {
        let mut buffer = StringBuffer {
            id,
            data: String::new(),
            chars: 0,
            char_bytes: Vec::new(),
            line_starts: vec![0],
        };
        buffer.append(text);
        buffer
    }

    /// Length in characters
    pub fn len(&self) -> usize {
        self.chars
    }

    pub fn is_empty(&self) -> bool {
        self.chars == 0
    }

    /// Append `text`, returning the character index where it starts
    pub fn append(&mut self, text: &str) -> usize {
        let start = self.chars;
        let base = self.data.len();
        for (byte, ch) in text.char_indices() {
            if self.chars % CHAR_STRIDE == 0 {
                self.char_bytes.push(base + byte);
            }
            self.chars += 1;
            if ch == '\n' {
                self.line_starts.push(self.chars);
            }
        }
        self.data.push_str(text);
        start
    }

    /// Byte offset of character `index`; `index == len()` maps to the end
    fn byte_of(&self, index: usize) -> usize {
        let Some(&from) = self.char_bytes.get(index / CHAR_STRIDE) else {
            return self.data.len();
        };
        self.data[from..]
            .char_indices()
            .nth(index % CHAR_STRIDE)
            .map_or(self.data.len(), |(byte, _)| from + byte)
    }

    /// Characters `[start, end)`
    pub fn slice(&self, start: usize, end: usize) -> &str {
        let from = self.byte_of(start);
        &self.data[from..self.byte_of(end.max(start))]
    }

    pub fn char_at(&self, index: usize) -> Option<char> {
        if index >= self.chars {
            return None;
        }
        self.data[self.byte_of(index)..].chars().next()
    }

    /// Number of `\n` characters in `[start, end)`
    pub fn line_feeds_in(&self, start: usize, end: usize) -> usize {
        if end <= start {
            return 0;
        }
        let upto_end = self.line_starts.partition_point(|&s| s <= end);
        let upto_start = self.line_starts.partition_point(|&s| s <= start);
        upto_end - upto_start
    }

    /// Index just past the `n`-th (1-based) newline found at or after `start`
    fn nth_line_start_after(&self, start: usize, n: usize) -> Option<usize> {
        debug_assert!(n > 0);
        let first = self.line_starts.partition_point(|&s| s <= start);
        self.line_starts.get(first + n - 1).copied()
    }
}

/// Identifies which buffer a piece of text comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLocation {
    /// Data is in the original buffer the document was created from
    Stored(usize),
    /// Data is in a buffer that received inserted text
    Added(usize),
}

impl BufferLocation {
    pub fn buffer_id(&self) -> usize {
        match self {
            Self::Stored(id) | Self::Added(id) => *id,
        }
    }
}

/// A node in the piece tree
#[derive(Debug, Clone)]
pub enum PieceTreeNode {
    Internal {
        chars: usize,
        line_feeds: usize,
        height: u32,
        leaves: usize,
        left: Arc<PieceTreeNode>,
        right: Arc<PieceTreeNode>,
    },
    Leaf {
        location: BufferLocation,
        /// Offset within the buffer
        offset: usize,
        chars: usize,
        line_feed_cnt: usize,
    },
}

/// Represents the data for a leaf node in the piece tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafData {
    pub location: BufferLocation,
    pub offset: usize,
    pub chars: usize,
    pub line_feed_cnt: usize,
}

impl LeafData {
    pub fn new(location: BufferLocation, offset: usize, chars: usize, line_feed_cnt: usize) -> Self {
        LeafData {
            location,
            offset,
            chars,
            line_feed_cnt,
        }
    }

    fn into_node(self) -> Arc<PieceTreeNode> {
        Arc::new(PieceTreeNode::Leaf {
            location: self.location,
            offset: self.offset,
            chars: self.chars,
            line_feed_cnt: self.line_feed_cnt,
        })
    }
}

/// Information about the piece containing a document offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceInfo {
    pub location: BufferLocation,
    /// Starting offset of this piece within its buffer
    pub offset: usize,
    pub chars: usize,
    /// How far into the piece the queried offset is
    pub offset_in_piece: usize,
}

/// Statistics about the piece tree structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub total_chars: usize,
    pub depth: usize,
    pub leaf_count: usize,
    pub line_feed_count: usize,
}

impl PieceTreeNode {
    pub fn chars(&self) -> usize {
        match self {
            Self::Internal { chars, .. } | Self::Leaf { chars, .. } => *chars,
        }
    }

    pub fn line_feeds(&self) -> usize {
        match self {
            Self::Internal { line_feeds, .. } => *line_feeds,
            Self::Leaf { line_feed_cnt, .. } => *line_feed_cnt,
        }
    }

    fn height(&self) -> u32 {
        match self {
            Self::Internal { height, .. } => *height,
            Self::Leaf { .. } => 1,
        }
    }

    fn leaves(&self) -> usize {
        match self {
            Self::Internal { leaves, .. } => *leaves,
            Self::Leaf { .. } => 1,
        }
    }

    fn children(&self) -> Option<(&Arc<PieceTreeNode>, &Arc<PieceTreeNode>)> {
        match self {
            Self::Internal { left, right, .. } => Some((left, right)),
            Self::Leaf { .. } => None,
        }
    }

    fn find_by_offset(&self, offset: usize) -> Option<PieceInfo> {
        match self {
            Self::Internal { left, right, .. } => {
                let left_chars = left.chars();
                if offset < left_chars {
                    left.find_by_offset(offset)
                } else {
                    right.find_by_offset(offset - left_chars)
                }
            }
            Self::Leaf {
                location,
                offset: piece_offset,
                chars,
                ..
            } => (offset < *chars).then_some(PieceInfo {
                location: *location,
                offset: *piece_offset,
                chars: *chars,
                offset_in_piece: offset,
            }),
        }
    }

    fn line_feeds_before(&self, offset: usize, buffers: &[Arc<StringBuffer>]) -> usize {
        match self {
            Self::Internal { left, right, .. } => {
                let left_chars = left.chars();
                if offset <= left_chars {
                    left.line_feeds_before(offset, buffers)
                } else {
                    left.line_feeds() + right.line_feeds_before(offset - left_chars, buffers)
                }
            }
            Self::Leaf {
                location,
                offset: piece_offset,
                chars,
                line_feed_cnt,
            } => {
                if offset >= *chars {
                    return *line_feed_cnt;
                }
                buffers
                    .get(location.buffer_id())
                    .map(|b| b.line_feeds_in(*piece_offset, piece_offset + offset))
                    .unwrap_or(0)
            }
        }
    }

    /// Document offset just past the `n`-th (1-based) newline in this subtree
    fn offset_after_newline(&self, n: usize, buffers: &[Arc<StringBuffer>]) -> Option<usize> {
        match self {
            Self::Internal { left, right, .. } => {
                let left_lf = left.line_feeds();
                if n <= left_lf {
                    left.offset_after_newline(n, buffers)
                } else {
                    right
                        .offset_after_newline(n - left_lf, buffers)
                        .map(|o| o + left.chars())
                }
            }
            Self::Leaf {
                location,
                offset,
                line_feed_cnt,
                ..
            } => {
                if n > *line_feed_cnt {
                    return None;
                }
                let buffer = buffers.get(location.buffer_id())?;
                buffer
                    .nth_line_start_after(*offset, n)
                    .map(|start| start - offset)
            }
        }
    }

    fn collect_leaves(&self, leaves: &mut Vec<LeafData>) {
        match self {
            Self::Internal { left, right, .. } => {
                left.collect_leaves(leaves);
                right.collect_leaves(leaves);
            }
            Self::Leaf {
                location,
                offset,
                chars,
                line_feed_cnt,
            } => leaves.push(LeafData::new(*location, *offset, *chars, *line_feed_cnt)),
        }
    }

    /// Collect the pieces overlapping `[start, end)`; `node_start` is this node's offset
    fn collect_range(&self, node_start: usize, start: usize, end: usize, out: &mut Vec<PieceView>) {
        let node_end = node_start + self.chars();
        if end <= node_start || start >= node_end {
            return;
        }
        match self {
            Self::Internal { left, right, .. } => {
                left.collect_range(node_start, start, end, out);
                right.collect_range(node_start + left.chars(), start, end, out);
            }
            Self::Leaf {
                location, offset, ..
            } => {
                let clip_start = start.max(node_start);
                let clip_end = end.min(node_end);
                out.push(PieceView {
                    location: *location,
                    buffer_offset: offset + (clip_start - node_start),
                    chars: clip_end - clip_start,
                    doc_offset: clip_start,
                });
            }
        }
    }

    /// Copy the path to the leaf ending exactly at `end`, growing that leaf in place
    fn with_leaf_extended(
        &self,
        end: usize,
        extra_chars: usize,
        extra_lf: usize,
    ) -> Option<Arc<PieceTreeNode>> {
        match self {
            Self::Internal { left, right, .. } => {
                let left_chars = left.chars();
                let (new_left, new_right) = if end <= left_chars {
                    (left.with_leaf_extended(end, extra_chars, extra_lf)?, right.clone())
                } else {
                    (
                        left.clone(),
                        right.with_leaf_extended(end - left_chars, extra_chars, extra_lf)?,
                    )
                };
                Some(PieceTree::internal(new_left, new_right))
            }
            Self::Leaf {
                location,
                offset,
                chars,
                line_feed_cnt,
            } => (end == *chars).then(|| {
                LeafData::new(
                    *location,
                    *offset,
                    chars + extra_chars,
                    line_feed_cnt + extra_lf,
                )
                .into_node()
            }),
        }
    }
}

/// A clipped view of one piece inside a queried range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceView {
    pub location: BufferLocation,
    /// Offset of the clipped slice within its buffer
    pub buffer_offset: usize,
    pub chars: usize,
    /// Document offset where the clipped slice starts
    pub doc_offset: usize,
}

/// The piece tree itself; `None` root means an empty document
#[derive(Debug, Clone, Default)]
pub struct PieceTree {
    root: Option<Arc<PieceTreeNode>>,
}

impl PieceTree {
    /// Create a tree with a single initial piece
    pub fn new(location: BufferLocation, offset: usize, chars: usize, line_feed_cnt: usize) -> Self {
        if chars == 0 {
            return Self::empty();
        }
        PieceTree {
            root: Some(LeafData::new(location, offset, chars, line_feed_cnt).into_node()),
        }
    }

    pub fn empty() -> Self {
        PieceTree { root: None }
    }

    /// Build a balanced tree from a list of leaves
    pub fn from_leaves(leaves: &[LeafData]) -> Self {
        PieceTree {
            root: Self::build_balanced(leaves),
        }
    }

    fn build_balanced(leaves: &[LeafData]) -> Option<Arc<PieceTreeNode>> {
        match leaves.len() {
            0 => None,
            1 => Some(leaves[0].into_node()),
            n => {
                let mid = n / 2;
                let left = Self::build_balanced(&leaves[..mid])?;
                let right = Self::build_balanced(&leaves[mid..])?;
                Some(Self::internal(left, right))
            }
        }
    }

    fn internal(left: Arc<PieceTreeNode>, right: Arc<PieceTreeNode>) -> Arc<PieceTreeNode> {
        Arc::new(PieceTreeNode::Internal {
            chars: left.chars() + right.chars(),
            line_feeds: left.line_feeds() + right.line_feeds(),
            height: 1 + left.height().max(right.height()),
            leaves: left.leaves() + right.leaves(),
            left,
            right,
        })
    }

    /// Glue two subtrees whose heights differ by at most two, rotating if needed
    fn balance(left: Arc<PieceTreeNode>, right: Arc<PieceTreeNode>) -> Arc<PieceTreeNode> {
        let (hl, hr) = (left.height(), right.height());
        if hl > hr + 1 {
            if let Some((ll, lr)) = left.children() {
                if ll.height() >= lr.height() {
                    return Self::internal(ll.clone(), Self::internal(lr.clone(), right));
                }
                if let Some((lrl, lrr)) = lr.children() {
                    return Self::internal(
                        Self::internal(ll.clone(), lrl.clone()),
                        Self::internal(lrr.clone(), right),
                    );
                }
            }
        } else if hr > hl + 1 {
            if let Some((rl, rr)) = right.children() {
                if rr.height() >= rl.height() {
                    return Self::internal(Self::internal(left, rl.clone()), rr.clone());
                }
                if let Some((rll, rlr)) = rl.children() {
                    return Self::internal(
                        Self::internal(left, rll.clone()),
                        Self::internal(rlr.clone(), rr.clone()),
                    );
                }
            }
        }
        Self::internal(left, right)
    }

    fn join_nodes(left: Arc<PieceTreeNode>, right: Arc<PieceTreeNode>) -> Arc<PieceTreeNode> {
        let (hl, hr) = (left.height(), right.height());
        if hl > hr + 1 {
            if let Some((ll, lr)) = left.children() {
                return Self::balance(ll.clone(), Self::join_nodes(lr.clone(), right));
            }
        } else if hr > hl + 1 {
            if let Some((rl, rr)) = right.children() {
                return Self::balance(Self::join_nodes(left, rl.clone()), rr.clone());
            }
        }
        Self::internal(left, right)
    }

    fn join(
        left: Option<Arc<PieceTreeNode>>,
        right: Option<Arc<PieceTreeNode>>,
    ) -> Option<Arc<PieceTreeNode>> {
        match (left, right) {
            (None, other) | (other, None) => other,
            (Some(l), Some(r)) => Some(Self::join_nodes(l, r)),
        }
    }

    /// Split a subtree into `[0, at)` and `[at, len)`
    fn split(
        node: &Arc<PieceTreeNode>,
        at: usize,
        buffers: &[Arc<StringBuffer>],
    ) -> (Option<Arc<PieceTreeNode>>, Option<Arc<PieceTreeNode>>) {
        if at == 0 {
            return (None, Some(node.clone()));
        }
        if at >= node.chars() {
            return (Some(node.clone()), None);
        }
        match node.as_ref() {
            PieceTreeNode::Internal { left, right, .. } => {
                let left_chars = left.chars();
                if at < left_chars {
                    let (a, b) = Self::split(left, at, buffers);
                    (a, Self::join(b, Some(right.clone())))
                } else if at == left_chars {
                    (Some(left.clone()), Some(right.clone()))
                } else {
                    let (a, b) = Self::split(right, at - left_chars, buffers);
                    (Self::join(Some(left.clone()), a), b)
                }
            }
            PieceTreeNode::Leaf {
                location,
                offset,
                chars,
                line_feed_cnt,
            } => {
                let head_lf = buffers
                    .get(location.buffer_id())
                    .map(|b| b.line_feeds_in(*offset, offset + at))
                    .unwrap_or(0);
                let head = LeafData::new(*location, *offset, at, head_lf);
                let tail = LeafData::new(
                    *location,
                    offset + at,
                    chars - at,
                    line_feed_cnt.saturating_sub(head_lf),
                );
                (Some(head.into_node()), Some(tail.into_node()))
            }
        }
    }

    /// Insert a piece so that it starts at document `offset`
    pub fn insert(&mut self, offset: usize, leaf: LeafData, buffers: &[Arc<StringBuffer>]) {
        if leaf.chars == 0 {
            return;
        }
        let offset = offset.min(self.total_chars());
        let (before, after) = match &self.root {
            Some(root) => Self::split(root, offset, buffers),
            None => (None, None),
        };
        let middle = Self::join(before, Some(leaf.into_node()));
        self.root = Self::join(middle, after);
    }

    /// Grow the piece that ends exactly at `end` if it is `location` and ends at
    /// `buffer_end` within its buffer. Returns false when no such piece exists.
    pub fn try_extend_piece(
        &mut self,
        end: usize,
        location: BufferLocation,
        buffer_end: usize,
        extra_chars: usize,
        extra_lf: usize,
    ) -> bool {
        if end == 0 {
            return false;
        }
        let Some(info) = self.find_by_offset(end - 1) else {
            return false;
        };
        let piece_ends_here = info.offset_in_piece + 1 == info.chars;
        if !piece_ends_here || info.location != location || info.offset + info.chars != buffer_end
        {
            return false;
        }
        let Some(root) = &self.root else {
            return false;
        };
        match root.with_leaf_extended(end, extra_chars, extra_lf) {
            Some(new_root) => {
                self.root = Some(new_root);
                true
            }
            None => false,
        }
    }

    /// Delete `count` characters starting at `offset`
    pub fn delete(&mut self, offset: usize, count: usize, buffers: &[Arc<StringBuffer>]) {
        let Some(root) = &self.root else {
            return;
        };
        if count == 0 || offset >= root.chars() {
            return;
        }
        let (before, rest) = Self::split(root, offset, buffers);
        let after = rest.and_then(|rest| Self::split(&rest, count, buffers).1);
        self.root = Self::join(before, after);
    }

    pub fn total_chars(&self) -> usize {
        self.root.as_ref().map_or(0, |r| r.chars())
    }

    pub fn line_feed_count(&self) -> usize {
        self.root.as_ref().map_or(0, |r| r.line_feeds())
    }

    /// Number of lines (always at least one)
    pub fn line_count(&self) -> usize {
        self.line_feed_count() + 1
    }

    /// Find the piece at the given offset
    pub fn find_by_offset(&self, offset: usize) -> Option<PieceInfo> {
        self.root.as_ref()?.find_by_offset(offset)
    }

    /// Number of newlines strictly before `offset`, i.e. the line containing it
    pub fn line_of_offset(&self, offset: usize, buffers: &[Arc<StringBuffer>]) -> usize {
        self.root
            .as_ref()
            .map_or(0, |r| r.line_feeds_before(offset.min(r.chars()), buffers))
    }

    /// Offset where `line` starts, or None past the last line
    pub fn line_start(&self, line: usize, buffers: &[Arc<StringBuffer>]) -> Option<usize> {
        if line == 0 {
            return Some(0);
        }
        self.root.as_ref()?.offset_after_newline(line, buffers)
    }

    /// Pieces overlapping `[start, end)`, clipped to it, in document order
    pub fn iter_pieces_in_range(&self, start: usize, end: usize) -> PieceRangeIter {
        let mut pieces = Vec::new();
        if let Some(root) = &self.root {
            root.collect_range(0, start, end, &mut pieces);
        }
        PieceRangeIter {
            pieces: pieces.into_iter(),
        }
    }

    pub fn get_leaves(&self) -> Vec<LeafData> {
        let mut leaves = Vec::new();
        if let Some(root) = &self.root {
            root.collect_leaves(&mut leaves);
        }
        leaves
    }

    pub fn stats(&self) -> TreeStats {
        TreeStats {
            total_chars: self.total_chars(),
            depth: self.root.as_ref().map_or(0, |r| r.height() as usize),
            leaf_count: self.root.as_ref().map_or(0, |r| r.leaves()),
            line_feed_count: self.line_feed_count(),
        }
    }
}

/// Iterator over pieces in a range
pub struct PieceRangeIter {
    pieces: std::vec::IntoIter<PieceView>,
}

impl Iterator for PieceRangeIter {
    type Item = PieceView;

    fn next(&mut self) -> Option<Self::Item> {
        self.pieces.next()
    }
}
