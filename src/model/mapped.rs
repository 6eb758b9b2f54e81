//! Read-only document over a memory-mapped file.
//!
//! Used for files too large to load into a [`DocumentBuffer`]. Line queries go through a
//! sparse [`LineIndex`]; bulk text comes from the [`ChunkCache`].

use crate::cancel::CancellationFlag;
use crate::config::LargeFileConfig;
use crate::error::{CoreError, Result};
use crate::model::backing::{BackingSource, MmapSource};
use crate::model::buffer::DocumentBuffer;
use crate::model::chunk_cache::{ChunkCache, ChunkCacheStats};
use crate::model::encoding::Encoding;
use crate::model::line_index::{LineBreaks, LineIndex};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug)]
pub struct MappedDocument {
    source: Arc<dyn BackingSource>,
    line_index: LineIndex,
    chunks: ChunkCache,
    encoding: Encoding,
}

impl MappedDocument {
    /// Map `path` and build its line index
    pub fn open(
        path: impl AsRef<Path>,
        config: &LargeFileConfig,
        cancel: &CancellationFlag,
        progress: impl FnMut(f64),
    ) -> Result<Self> {
        let source: Arc<dyn BackingSource> = Arc::new(MmapSource::open(path)?);
        Self::from_source(source, config, cancel, progress)
    }

    /// Index an already opened source. A cancelled index build fails with `Cancelled`.
    pub fn from_source(
        source: Arc<dyn BackingSource>,
        config: &LargeFileConfig,
        cancel: &CancellationFlag,
        progress: impl FnMut(f64),
    ) -> Result<Self> {
        let chunks = ChunkCache::new(source.clone(), config.chunk_options())?;
        // Lines split where the normalized text has its `\n`s
        let breaks = if config.normalize_line_endings {
            LineBreaks::Any
        } else {
            LineBreaks::Lf
        };
        let line_index = LineIndex::build_with(
            source.clone(),
            config.encoding,
            breaks,
            config.line_sample_interval,
            cancel,
            progress,
        )?;
        if !line_index.is_complete() {
            return Err(CoreError::Cancelled);
        }
        Ok(MappedDocument {
            source,
            line_index,
            chunks,
            encoding: config.encoding,
        })
    }

    pub fn byte_len(&self) -> usize {
        self.line_index.source_len()
    }

    pub fn line_count(&self) -> usize {
        self.line_index.total_lines()
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn line_index(&self) -> &LineIndex {
        &self.line_index
    }

    /// Text of one line, without its terminator
    pub fn line(&self, line: usize) -> Result<String> {
        let (mut start, end) = self.line_index.line_range(line)?;
        if start == 0 {
            let bom = self.encoding.bom_bytes();
            let mut head = vec![0u8; bom.len().min(end)];
            self.source.read_at(0, &mut head)?;
            if !bom.is_empty() && head == bom {
                start = bom.len();
            }
        }
        let mut bytes = vec![0u8; end - start];
        self.source.read_at(start, &mut bytes)?;
        Ok(self.encoding.decode(&bytes))
    }

    /// `count` consecutive lines starting at `start_line`
    pub fn lines(&self, start_line: usize, count: usize) -> Result<Vec<String>> {
        let end = start_line
            .checked_add(count)
            .filter(|&end| end <= self.line_count())
            .ok_or_else(|| {
                CoreError::out_of_range("line", start_line.saturating_add(count), self.line_count())
            })?;
        (start_line..end).map(|line| self.line(line)).collect()
    }

    /// Line containing byte `offset`
    pub fn line_of_offset(&self, offset: usize) -> Result<usize> {
        self.line_index.line_of_offset(offset)
    }

    /// Decoded chunk containing byte `offset`
    pub fn chunk(&self, offset: usize) -> Result<Arc<str>> {
        self.chunks.get_chunk(offset)
    }

    pub fn chunk_stats(&self) -> ChunkCacheStats {
        self.chunks.stats()
    }

    /// Decode the whole source through the chunk cache
    pub fn read_all(&self) -> Result<String> {
        self.chunks.read_text(0..self.byte_len())
    }

    /// Load the whole document into an editable buffer
    pub fn to_buffer(&self) -> Result<DocumentBuffer> {
        Ok(DocumentBuffer::from_text(&self.read_all()?))
    }

    /// Release the mapping; later reads fail with `Disposed`
    pub fn close(&self) {
        self.chunks.clear();
        self.source.close();
    }
}
