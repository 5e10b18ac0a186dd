//! Page-size query and alignment helpers.

use std::sync::OnceLock;

/// Alignment required by the wide-vector copy path (AVX2, 32 bytes).
///
/// Tracked regions and arena-backed page copies are both aligned to at
/// least this, so [`crate::fast_copy`] never sees a misaligned operand.
pub const VECTOR_ALIGN: usize = 32;

/// Cached OS page size.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// The host's virtual-memory page size in bytes, queried once and cached.
///
/// Expected to be 4096 on every host this engine targets.
#[inline]
pub fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(query_page_size)
}

#[cfg(unix)]
fn query_page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    assert!(size > 0, "sysconf(_SC_PAGESIZE) failed");
    size as usize
}

#[cfg(windows)]
fn query_page_size() -> usize {
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};
    unsafe {
        let mut info: SYSTEM_INFO = std::mem::zeroed();
        GetSystemInfo(&mut info);
        info.dwPageSize as usize
    }
}

#[cfg(not(any(unix, windows)))]
fn query_page_size() -> usize {
    4096
}

/// Round `value` up to the nearest multiple of `align`.
///
/// `align` must be a power of two.
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Check whether `value` (an address or a length) is a multiple of `align`.
///
/// `align` must be a power of two.
#[inline]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    debug_assert!(align.is_power_of_two());
    value & (align - 1) == 0
}

/// `n` mebibytes in bytes.
#[inline]
pub const fn mib(n: usize) -> usize {
    n * 1024 * 1024
}
