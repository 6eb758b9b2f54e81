//! LRU cache of decoded text chunks read from a backing source.
//!
//! Chunks are keyed by their aligned byte offset. Each one is decoded independently, so
//! two seams need care:
//! - a `\r\n` pair split across chunks must produce one `\n`: the earlier chunk turns its
//!   trailing `\r` into `\n` and the later chunk drops its leading `\n`;
//! - a multi-byte character split across chunks belongs to the chunk where it starts: that
//!   chunk reads a few bytes past its end and the next one skips them.

use crate::error::{CoreError, Result};
use crate::model::backing::BackingSource;
use crate::model::encoding::{normalize_line_endings, Encoding};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Decoding parameters for a [`ChunkCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCacheOptions {
    pub chunk_size: usize,
    pub max_chunks: usize,
    pub encoding: Encoding,
    pub normalize_line_endings: bool,
}

impl Default for ChunkCacheOptions {
    fn default() -> Self {
        ChunkCacheOptions {
            chunk_size: 64 * 1024,
            max_chunks: 64,
            encoding: Encoding::Utf8,
            normalize_line_endings: true,
        }
    }
}

/// Counters describing cache behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub resident: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ChunkCache {
    source: Arc<dyn BackingSource>,
    options: ChunkCacheOptions,
    entries: Mutex<LruCache<usize, Arc<str>>>,
    /// One lock per chunk being decoded, so a missing chunk is decoded once while
    /// misses on other chunks proceed
    in_flight: Mutex<HashMap<usize, Arc<Mutex<()>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for ChunkCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCache")
            .field("options", &self.options)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ChunkCache {
    pub fn new(source: Arc<dyn BackingSource>, options: ChunkCacheOptions) -> Result<Self> {
        let capacity = NonZeroUsize::new(options.max_chunks)
            .ok_or_else(|| CoreError::Config("max_chunks must be at least 1".to_string()))?;
        let unit = options.encoding.unit_size();
        if options.chunk_size == 0 || options.chunk_size % unit != 0 {
            return Err(CoreError::Config(format!(
                "chunk_size {} must be a positive multiple of {} for {}",
                options.chunk_size,
                unit,
                options.encoding.display_name()
            )));
        }
        Ok(ChunkCache {
            source,
            options,
            entries: Mutex::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    pub fn options(&self) -> &ChunkCacheOptions {
        &self.options
    }

    /// Aligned offset of the chunk containing `byte_offset`
    pub fn align(&self, byte_offset: usize) -> usize {
        byte_offset - byte_offset % self.options.chunk_size
    }

    /// Decoded text of the chunk containing `byte_offset`
    pub fn get_chunk(&self, byte_offset: usize) -> Result<Arc<str>> {
        if self.source.is_closed() {
            return Err(CoreError::Disposed);
        }
        let len = self.source.len()?;
        if byte_offset >= len && !(len == 0 && byte_offset == 0) {
            return Err(CoreError::out_of_range("byte offset", byte_offset, len));
        }
        let aligned = self.align(byte_offset);

        if let Some(text) = lock(&self.entries).get(&aligned) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(text.clone());
        }

        let gate = lock(&self.in_flight).entry(aligned).or_default().clone();
        let _decoding = lock(&gate);
        // Another reader may have decoded it while we waited
        if let Some(text) = lock(&self.entries).get(&aligned) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(text.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let decoded = self.decode(aligned, len).map(|text| {
            let text: Arc<str> = Arc::from(text);
            tracing::trace!(aligned, chars = text.chars().count(), "decoded chunk");
            if let Some((evicted, _)) = lock(&self.entries).push(aligned, text.clone()) {
                if evicted != aligned {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(evicted, "evicted chunk");
                }
            }
            text
        });
        // Waiters still holding this gate find the entry in the cache
        lock(&self.in_flight).remove(&aligned);
        decoded
    }

    fn decode(&self, aligned: usize, len: usize) -> Result<String> {
        let encoding = self.options.encoding;
        let end = (aligned + self.options.chunk_size).min(len);
        let mut bytes = vec![0u8; end - aligned];
        let read = self.source.read_at(aligned, &mut bytes)?;
        bytes.truncate(read);

        if end < len {
            let extra = encoding.trailing_partial(&bytes);
            if extra > 0 {
                let mut tail = vec![0u8; extra.min(len - end)];
                let read = self.source.read_at(end, &mut tail)?;
                bytes.extend_from_slice(&tail[..read]);
            }
        }

        let skip = if aligned == 0 {
            let bom = encoding.bom_bytes();
            if !bom.is_empty() && bytes.starts_with(bom) {
                bom.len()
            } else {
                0
            }
        } else {
            encoding.leading_partial(&bytes)
        };

        let text = encoding.decode(&bytes[skip..]);
        if !self.options.normalize_line_endings {
            return Ok(text);
        }

        let text = match text.strip_prefix('\n') {
            Some(rest) if skip == 0 && self.preceded_by_cr(aligned)? => rest,
            _ => text.as_str(),
        };
        Ok(normalize_line_endings(text))
    }

    fn preceded_by_cr(&self, aligned: usize) -> Result<bool> {
        let cr = self.options.encoding.carriage_return();
        if aligned < cr.len() {
            return Ok(false);
        }
        let mut prev = [0u8; 2];
        let prev = &mut prev[..cr.len()];
        self.source.read_at(aligned - cr.len(), prev)?;
        Ok(prev == cr)
    }

    /// Concatenated text of every chunk overlapping `range`.
    ///
    /// Chunk-granular: the result starts at the aligned chunk containing `range.start`
    /// and runs to the end of the chunk containing the last byte.
    pub fn read_text(&self, range: Range<usize>) -> Result<String> {
        let mut out = String::new();
        let mut offset = self.align(range.start);
        while offset < range.end {
            out.push_str(&self.get_chunk(offset)?);
            offset += self.options.chunk_size;
        }
        Ok(out)
    }

    /// Drop every cached chunk
    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    pub fn stats(&self) -> ChunkCacheStats {
        ChunkCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            resident: lock(&self.entries).len(),
        }
    }
}
