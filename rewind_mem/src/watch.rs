//! Per-page write tracking over a bound region.
//!
//! The watcher answers one question: which pages of the region were
//! written since the last query? The answer comes back as a strictly
//! ascending list of page base addresses, and asking atomically clears
//! the set.
//!
//! # Mechanisms
//!
//! - **Windows**: the kernel write-watch facility. The bound region must
//!   have been allocated with `MEM_WRITE_WATCH` (see
//!   [`crate::TrackedRegion`]); `GetWriteWatch` with the reset flag is the
//!   whole implementation. The scratch buffer is sized for every page of
//!   the region so the kernel can never truncate the list.
//! - **Unix**: a 64-bit content hash per page. `take_dirty` rehashes the
//!   region and reports pages whose hash changed, updating the stored
//!   hashes as it goes. No faults, no signal handlers, O(region) per
//!   query. A write that leaves a page's bytes unchanged is invisible
//!   here, which is harmless: restoring such a page is a no-op.
//!
//! Either way the query is only meaningful while the region's mutator is
//! quiesced; the rollback engine calls it strictly between frames.

use crate::util::{is_aligned, page_size};

#[cfg(unix)]
use rustc_hash::FxHasher;
#[cfg(unix)]
use std::hash::Hasher;

/// Errors from binding or querying the write watch.
#[derive(Debug, Clone)]
pub enum WatchError {
    /// The region base or length is not a whole number of pages.
    BadAlignment {
        /// Region base address as passed to `bind`.
        base: usize,
        /// Region length as passed to `bind`.
        len: usize,
    },
    /// The host exposes no usable write-watch mechanism.
    UnsupportedHost,
    /// The host facility failed outright.
    WatchFailed(String),
    /// More pages were written during the frame than the caller can
    /// capture. The frame is uncapturable; treat as fatal.
    DirtyOverflow {
        /// Number of dirty pages the host reported.
        found: usize,
        /// The caller's capture capacity.
        capacity: usize,
    },
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchError::BadAlignment { base, len } => write!(
                f,
                "write-watch region must be page-aligned: base={:#x} len={:#x} page={:#x}",
                base,
                len,
                page_size()
            ),
            WatchError::UnsupportedHost => {
                write!(f, "no write-watch mechanism on this host")
            }
            WatchError::WatchFailed(msg) => write!(f, "write-watch query failed: {}", msg),
            WatchError::DirtyOverflow { found, capacity } => write!(
                f,
                "frame dirtied {} pages but capture capacity is {}",
                found, capacity
            ),
        }
    }
}

impl std::error::Error for WatchError {}

/// Write tracking for one bound region.
pub struct PageWatcher {
    base: usize,
    len: usize,
    /// Scratch for `GetWriteWatch`, one slot per page of the region.
    #[cfg(windows)]
    scratch: Vec<*mut core::ffi::c_void>,
    /// One content hash per page of the region.
    #[cfg(unix)]
    page_hashes: Box<[u64]>,
}

// Safety: the raw scratch pointers are only ever written by the kernel
// inside take_dirty; the watcher is owned and driven by one thread.
#[cfg(windows)]
unsafe impl Send for PageWatcher {}

impl PageWatcher {
    /// Bind a watcher to the region `[base, base + len)`.
    ///
    /// Fails with [`WatchError::BadAlignment`] when `base` or `len` is not
    /// a page multiple, and with [`WatchError::UnsupportedHost`] on
    /// targets with no mechanism. The current contents of the region
    /// become the clean baseline.
    pub fn bind(base: *mut u8, len: usize) -> Result<Self, WatchError> {
        let base = base as usize;
        if !is_aligned(base, page_size()) || !is_aligned(len, page_size()) || len == 0 {
            return Err(WatchError::BadAlignment { base, len });
        }
        Self::bind_checked(base, len)
    }

    /// Total pages in the bound region.
    #[inline]
    pub fn page_count(&self) -> usize {
        self.len / page_size()
    }

    /// Region base address.
    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Region length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True only for an unbound watcher, which cannot be constructed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    // =========================================================================
    // Windows: kernel write watch
    // =========================================================================

    #[cfg(windows)]
    fn bind_checked(base: usize, len: usize) -> Result<Self, WatchError> {
        let pages = len / page_size();
        Ok(PageWatcher {
            base,
            len,
            scratch: vec![std::ptr::null_mut(); pages],
        })
    }

    /// Clear the dirty set without reading it.
    #[cfg(windows)]
    pub fn reset(&mut self) {
        use windows_sys::Win32::System::Memory::ResetWriteWatch;
        unsafe {
            ResetWriteWatch(self.base as *const _, self.len);
        }
    }

    /// Read and clear the dirty-page set.
    ///
    /// On success, `out` holds the strictly ascending base addresses of
    /// every page written since the previous `take_dirty`/`reset`, and the
    /// host's set is empty. Returns the count. More than `capacity` dirty
    /// pages is [`WatchError::DirtyOverflow`]; the frame cannot be
    /// captured and `out` is left empty.
    #[cfg(windows)]
    pub fn take_dirty(&mut self, out: &mut Vec<usize>, capacity: usize) -> Result<usize, WatchError> {
        use windows_sys::Win32::System::Memory::{GetWriteWatch, WRITE_WATCH_FLAG_RESET};

        out.clear();
        let mut count = self.scratch.len();
        let mut granularity: u32 = 0;
        let rc = unsafe {
            GetWriteWatch(
                WRITE_WATCH_FLAG_RESET,
                self.base as *const _,
                self.len,
                self.scratch.as_mut_ptr(),
                &mut count as *mut usize,
                &mut granularity,
            )
        };
        if rc != 0 {
            return Err(WatchError::WatchFailed(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        if count > capacity {
            return Err(WatchError::DirtyOverflow {
                found: count,
                capacity,
            });
        }
        out.extend(self.scratch[..count].iter().map(|&p| p as usize));
        Ok(count)
    }

    // =========================================================================
    // Unix: per-page content hashing
    // =========================================================================

    #[cfg(unix)]
    fn bind_checked(base: usize, len: usize) -> Result<Self, WatchError> {
        let pages = len / page_size();
        let mut watcher = PageWatcher {
            base,
            len,
            page_hashes: vec![0u64; pages].into_boxed_slice(),
        };
        watcher.rehash_all();
        Ok(watcher)
    }

    /// Clear the dirty set without reading it.
    #[cfg(unix)]
    pub fn reset(&mut self) {
        self.rehash_all();
    }

    /// Read and clear the dirty-page set.
    ///
    /// On success, `out` holds the strictly ascending base addresses of
    /// every page whose contents changed since the previous
    /// `take_dirty`/`reset`, and the stored hashes match the current
    /// contents. Returns the count. More than `capacity` dirty pages is
    /// [`WatchError::DirtyOverflow`]; the frame cannot be captured and
    /// `out` is left empty.
    #[cfg(unix)]
    pub fn take_dirty(&mut self, out: &mut Vec<usize>, capacity: usize) -> Result<usize, WatchError> {
        out.clear();
        let page = page_size();
        let mut found = 0usize;
        for (idx, stored) in self.page_hashes.iter_mut().enumerate() {
            let addr = self.base + idx * page;
            let hash = hash_page(addr, page);
            if hash != *stored {
                *stored = hash;
                found += 1;
                if found <= capacity {
                    out.push(addr);
                }
            }
        }
        if found > capacity {
            out.clear();
            return Err(WatchError::DirtyOverflow {
                found,
                capacity,
            });
        }
        Ok(found)
    }

    #[cfg(unix)]
    fn rehash_all(&mut self) {
        let page = page_size();
        for (idx, stored) in self.page_hashes.iter_mut().enumerate() {
            *stored = hash_page(self.base + idx * page, page);
        }
    }

    // =========================================================================
    // Other hosts
    // =========================================================================

    #[cfg(not(any(unix, windows)))]
    fn bind_checked(_base: usize, _len: usize) -> Result<Self, WatchError> {
        Err(WatchError::UnsupportedHost)
    }

    /// Clear the dirty set without reading it.
    #[cfg(not(any(unix, windows)))]
    pub fn reset(&mut self) {}

    /// Read and clear the dirty-page set.
    #[cfg(not(any(unix, windows)))]
    pub fn take_dirty(
        &mut self,
        _out: &mut Vec<usize>,
        _capacity: usize,
    ) -> Result<usize, WatchError> {
        Err(WatchError::UnsupportedHost)
    }
}

/// Hash one page of memory.
#[cfg(unix)]
#[inline]
fn hash_page(addr: usize, page: usize) -> u64 {
    let bytes = unsafe { std::slice::from_raw_parts(addr as *const u8, page) };
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    hasher.finish()
}
