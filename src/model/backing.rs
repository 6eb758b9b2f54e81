//! Byte sources behind large read-only documents.
//!
//! A source can be closed while caches built on it are still alive; every read after that
//! fails with [`CoreError::Disposed`] instead of touching released memory.

use crate::error::{CoreError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};

/// Random-access bytes shared between the line index and the chunk cache
pub trait BackingSource: Send + Sync {
    /// Total size in bytes
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Single byte at `offset`; `OutOfRange` past the end
    fn byte_at(&self, offset: usize) -> Result<u8>;

    /// Copy bytes starting at `offset` into `buf`, returning how many were copied
    /// (fewer than `buf.len()` only at the end of the source)
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize>;

    /// Release the underlying resource; later reads fail with `Disposed`
    fn close(&self);

    fn is_closed(&self) -> bool;
}

impl std::fmt::Debug for dyn BackingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackingSource")
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn copy_from(bytes: &[u8], offset: usize, buf: &mut [u8]) -> Result<usize> {
    if offset > bytes.len() {
        return Err(CoreError::out_of_range("byte offset", offset, bytes.len()));
    }
    let n = buf.len().min(bytes.len() - offset);
    buf[..n].copy_from_slice(&bytes[offset..offset + n]);
    Ok(n)
}

fn byte_from(bytes: &[u8], offset: usize) -> Result<u8> {
    bytes
        .get(offset)
        .copied()
        .ok_or_else(|| CoreError::out_of_range("byte offset", offset, bytes.len()))
}

/// Read lock that survives poisoning; the guarded data is never left half-written
fn read_guard<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mapping state; a zero-length file has nothing to map but is still open
#[derive(Debug)]
enum MapState {
    Mapped(Mmap),
    Empty,
    Closed,
}

/// A read-only memory-mapped file
#[derive(Debug)]
pub struct MmapSource {
    path: PathBuf,
    map: RwLock<MapState>,
}

impl MmapSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        // Mapping a zero-length file fails on some platforms
        let state = if len == 0 {
            MapState::Empty
        } else {
            // SAFETY: the map is read-only; truncating the file while it is mapped is
            // undefined, as with any mmap-backed viewer.
            MapState::Mapped(unsafe { Mmap::map(&file)? })
        };
        tracing::debug!(path = %path.display(), bytes = len, "mapped file");
        Ok(MmapSource {
            path,
            map: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_bytes<T>(&self, f: impl FnOnce(&[u8]) -> Result<T>) -> Result<T> {
        match &*read_guard(&self.map) {
            MapState::Mapped(map) => f(map),
            MapState::Empty => f(&[]),
            MapState::Closed => Err(CoreError::Disposed),
        }
    }
}

impl BackingSource for MmapSource {
    fn len(&self) -> Result<usize> {
        self.with_bytes(|b| Ok(b.len()))
    }

    fn byte_at(&self, offset: usize) -> Result<u8> {
        self.with_bytes(|b| byte_from(b, offset))
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        self.with_bytes(|b| copy_from(b, offset, buf))
    }

    fn close(&self) {
        let mut guard = self
            .map
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !matches!(*guard, MapState::Closed) {
            *guard = MapState::Closed;
            tracing::debug!(path = %self.path.display(), "unmapped file");
        }
    }

    fn is_closed(&self) -> bool {
        matches!(*read_guard(&self.map), MapState::Closed)
    }
}

/// An in-memory byte source, used for small inputs and tests
#[derive(Debug)]
pub struct MemorySource {
    bytes: RwLock<Option<Vec<u8>>>,
}

impl MemorySource {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        MemorySource {
            bytes: RwLock::new(Some(bytes.into())),
        }
    }

    fn with_bytes<T>(&self, f: impl FnOnce(&[u8]) -> Result<T>) -> Result<T> {
        match read_guard(&self.bytes).as_deref() {
            Some(bytes) => f(bytes),
            None => Err(CoreError::Disposed),
        }
    }
}

impl BackingSource for MemorySource {
    fn len(&self) -> Result<usize> {
        self.with_bytes(|b| Ok(b.len()))
    }

    fn byte_at(&self, offset: usize) -> Result<u8> {
        self.with_bytes(|b| byte_from(b, offset))
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        self.with_bytes(|b| copy_from(b, offset, buf))
    }

    fn close(&self) {
        self.bytes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    fn is_closed(&self) -> bool {
        read_guard(&self.bytes).is_none()
    }
}
