#![allow(unsafe_code)]
//! Backing memory for a record buffer.
//!
//! A [`Region`] is a contiguous, word-aligned byte range that holds the cursor header
//! followed by the payload. Three kinds exist:
//!
//! - [`HeapRegion`]: process-local memory, mainly for tests and in-process pipelines.
//! - [`MappedRegion`]: a memory-mapped file another process can map to read records.
//! - [`ExternalRegion`]: memory handed over by an embedding host (FFI).

use super::layout::{HEADER_SIZE, MAX_SHARED_CAPACITY, MIN_CAPACITY, REGION_ALIGN};
use crate::error::{RingError, RingResult};
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;

/// Memory that can back a record buffer.
///
/// # Safety
/// Implementors guarantee that [`Region::base`] points to [`Region::len`] bytes that
/// stay valid for reads and writes (through shared references) for as long as the
/// region is alive, that the pointer never changes, and that it is aligned to
/// [`REGION_ALIGN`].
pub unsafe trait Region: Send + Sync {
    /// Base address of the region.
    fn base(&self) -> NonNull<u8>;

    /// Total length in bytes, header included.
    fn len(&self) -> usize;

    /// Payload capacity (total length minus the cursor header).
    fn capacity(&self) -> usize {
        self.len().saturating_sub(HEADER_SIZE)
    }

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

/// Process-local, zero-initialised region.
pub struct HeapRegion {
    // Words rather than bytes so the base is aligned for the cursor atomics.
    words: Box<[AtomicU32]>,
    len: usize,
}

impl HeapRegion {
    /// Allocate a zeroed region of `len` bytes (both cursors start at 0).
    pub fn new(len: usize) -> Self {
        let word_count = len.div_ceil(4);
        let words = (0..word_count).map(|_| AtomicU32::new(0)).collect();
        Self { words, len }
    }
}

impl std::fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapRegion").field("len", &self.len).finish()
    }
}

// SAFETY: the boxed slice is never reallocated, AtomicU32 provides interior
// mutability, and the allocation is 4-byte aligned.
unsafe impl Region for HeapRegion {
    fn base(&self) -> NonNull<u8> {
        // A boxed slice pointer is never null, even when empty.
        NonNull::from(&*self.words).cast()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn describe(&self) -> String {
        format!("heap ({} bytes)", self.len)
    }
}

/// File-backed shared mapping, readable by any process that maps the same file.
pub struct MappedRegion {
    path: PathBuf,
    // Kept alive for the lifetime of `base`.
    mmap: MmapMut,
    base: NonNull<u8>,
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("path", &self.path)
            .field("len", &self.mmap.len())
            .field("base", &format!("{:p}", self.base))
            .finish()
    }
}

// SAFETY: the mapping is owned by the region and unmapped only on drop. All access
// through `base` is coordinated by the record buffer's cursor protocol.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Create (or reuse) a shared buffer file with `capacity` payload bytes.
    ///
    /// The file is resized to `HEADER_SIZE + capacity` and both cursors are reset to
    /// zero, so any previous records become unreachable.
    pub fn create(path: &Path, capacity: usize) -> RingResult<Self> {
        check_shared_capacity(capacity)?;
        let total_size = HEADER_SIZE + capacity;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        // Resize in place: truncating to zero first would fault a reader still mapping
        // the old file.
        file.set_len(total_size as u64)?;

        // SAFETY: we just created and sized the file. Other processes may map it too;
        // they only ever touch it through the cursor protocol.
        let mut mmap = unsafe { MmapOptions::new().len(total_size).map_mut(&file)? };
        mmap[..HEADER_SIZE].fill(0);

        let region = Self::from_mmap(path, mmap)?;
        tracing::debug!(path = %path.display(), capacity, "created shared record buffer file");
        Ok(region)
    }

    /// Map an existing shared buffer file, keeping its cursors as found.
    pub fn open(path: &Path) -> RingResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        if len < HEADER_SIZE + MIN_CAPACITY {
            return Err(RingError::RegionTooSmall {
                len,
                min: HEADER_SIZE + MIN_CAPACITY,
            });
        }
        check_shared_capacity(len - HEADER_SIZE)?;

        // SAFETY: the file was sized by `create`; see above for the sharing contract.
        let mmap = unsafe { MmapOptions::new().len(len).map_mut(&file)? };
        Self::from_mmap(path, mmap)
    }

    fn from_mmap(path: &Path, mut mmap: MmapMut) -> RingResult<Self> {
        let base = NonNull::new(mmap.as_mut_ptr()).ok_or(RingError::RegionTooSmall {
            len: 0,
            min: HEADER_SIZE + MIN_CAPACITY,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            base,
        })
    }

    /// Path of the backing file, for readers in other processes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush dirty pages of the mapping to the backing file.
    pub fn flush(&self) -> RingResult<()> {
        self.mmap.flush()?;
        Ok(())
    }
}

// SAFETY: `base` comes from the owned mapping, which is page-aligned and lives as
// long as the region.
unsafe impl Region for MappedRegion {
    fn base(&self) -> NonNull<u8> {
        self.base
    }

    fn len(&self) -> usize {
        self.mmap.len()
    }

    fn describe(&self) -> String {
        format!("mapped {} ({} bytes)", self.path.display(), self.mmap.len())
    }
}

/// Memory owned by someone else, e.g. a host runtime that allocated it and passes the
/// address across an FFI boundary.
#[derive(Debug)]
pub struct ExternalRegion {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the creator of the region promised exclusive use through this handle and
// the cursor protocol coordinates the two roles.
unsafe impl Send for ExternalRegion {}
unsafe impl Sync for ExternalRegion {}

impl ExternalRegion {
    /// Bind to `len` bytes at `ptr`.
    ///
    /// When `reset_cursors` is true both cursors are zeroed; otherwise the header is
    /// adopted as found (and validated by the buffer that takes the region).
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as the
    /// returned region (and any buffer built on it) is alive, and no other code in this
    /// process may write to that memory.
    pub unsafe fn new(ptr: *mut u8, len: usize, reset_cursors: bool) -> RingResult<Self> {
        let base = NonNull::new(ptr).ok_or(RingError::RegionTooSmall {
            len: 0,
            min: HEADER_SIZE + MIN_CAPACITY,
        })?;
        if ptr as usize % REGION_ALIGN != 0 {
            return Err(RingError::Misaligned {
                addr: ptr as usize,
                align: REGION_ALIGN,
            });
        }
        if len < HEADER_SIZE + MIN_CAPACITY {
            return Err(RingError::RegionTooSmall {
                len,
                min: HEADER_SIZE + MIN_CAPACITY,
            });
        }
        check_shared_capacity(len - HEADER_SIZE)?;

        if reset_cursors {
            std::ptr::write_bytes(ptr, 0, HEADER_SIZE);
        }
        Ok(Self { base, len })
    }
}

// SAFETY: validity, stability and alignment are the caller's obligations in `new`.
unsafe impl Region for ExternalRegion {
    fn base(&self) -> NonNull<u8> {
        self.base
    }

    fn len(&self) -> usize {
        self.len
    }

    fn describe(&self) -> String {
        format!("external {:p} ({} bytes)", self.base, self.len)
    }
}

fn check_shared_capacity(capacity: usize) -> RingResult<()> {
    if !(MIN_CAPACITY..=MAX_SHARED_CAPACITY).contains(&capacity) {
        return Err(RingError::InvalidCapacity {
            capacity,
            min: MIN_CAPACITY,
            max: MAX_SHARED_CAPACITY,
        });
    }
    Ok(())
}
