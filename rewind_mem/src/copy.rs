//! Non-temporal page copy with runtime CPU dispatch.
//!
//! Snapshot traffic has a very specific shape: page-sized blocks, both
//! operands 32-byte aligned, and the destination almost never read back
//! on the copying core. Streaming (non-temporal) stores fit exactly: they
//! bypass the cache hierarchy instead of evicting a page's worth of hot
//! lines on every copy.
//!
//! Dispatch follows the detected CPU level, cached once:
//!
//! - **AVX2**: 32-byte aligned loads + `_mm256_stream_si256`
//! - **SSE2** (x86-64 baseline): `_mm_stream_si128`
//! - **Scalar**: `ptr::copy_nonoverlapping` on other architectures
//!
//! The streaming paths end with an `sfence` so the write-combining
//! buffers are drained before the caller's next synchronization point.

use std::sync::OnceLock;

use crate::util::VECTOR_ALIGN;

/// Cached dispatch level.
static COPY_LEVEL: OnceLock<CopyLevel> = OnceLock::new();

/// Which copy implementation the current CPU gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum CopyLevel {
    /// `ptr::copy_nonoverlapping` fallback.
    Scalar = 0,
    /// 16-byte streaming stores (x86-64 baseline).
    Sse2 = 1,
    /// 32-byte streaming stores.
    Avx2 = 2,
}

impl CopyLevel {
    /// Detect the best level for the current CPU.
    #[cfg(target_arch = "x86_64")]
    fn detect() -> Self {
        if is_x86_feature_detected!("avx2") {
            CopyLevel::Avx2
        } else {
            // SSE2 is architecturally guaranteed on x86-64.
            CopyLevel::Sse2
        }
    }

    /// Non-x86 hosts copy through the portable path.
    #[cfg(not(target_arch = "x86_64"))]
    fn detect() -> Self {
        CopyLevel::Scalar
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            CopyLevel::Scalar => "scalar",
            CopyLevel::Sse2 => "SSE2",
            CopyLevel::Avx2 => "AVX2",
        }
    }
}

/// The copy level in use, detected once and cached.
#[inline]
pub fn copy_level() -> CopyLevel {
    *COPY_LEVEL.get_or_init(CopyLevel::detect)
}

/// Copy `nbytes` from `src` to `dst` with streaming stores.
///
/// # Safety
///
/// - `src` must be valid for reads and `dst` for writes of `nbytes`.
/// - The ranges must not overlap.
/// - Both pointers must be aligned to [`VECTOR_ALIGN`] and `nbytes` must
///   be a multiple of it (page-sized copies always qualify).
#[inline]
pub unsafe fn fast_copy(dst: *mut u8, src: *const u8, nbytes: usize) {
    debug_assert!(dst as usize % VECTOR_ALIGN == 0);
    debug_assert!(src as usize % VECTOR_ALIGN == 0);
    debug_assert!(nbytes % VECTOR_ALIGN == 0);

    match copy_level() {
        #[cfg(target_arch = "x86_64")]
        CopyLevel::Avx2 => unsafe { copy_avx2(dst, src, nbytes) },
        #[cfg(target_arch = "x86_64")]
        CopyLevel::Sse2 => unsafe { copy_sse2(dst, src, nbytes) },
        _ => unsafe { std::ptr::copy_nonoverlapping(src, dst, nbytes) },
    }
}

// =============================================================================
// x86-64 streaming implementations
// =============================================================================

/// AVX2 streaming copy, unrolled to one cache line pair per iteration.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn copy_avx2(dst: *mut u8, src: *const u8, nbytes: usize) {
    use std::arch::x86_64::{__m256i, _mm_sfence, _mm256_load_si256, _mm256_stream_si256};

    let mut offset = 0usize;
    unsafe {
        while offset + 128 <= nbytes {
            let a = _mm256_load_si256(src.add(offset) as *const __m256i);
            let b = _mm256_load_si256(src.add(offset + 32) as *const __m256i);
            let c = _mm256_load_si256(src.add(offset + 64) as *const __m256i);
            let d = _mm256_load_si256(src.add(offset + 96) as *const __m256i);
            _mm256_stream_si256(dst.add(offset) as *mut __m256i, a);
            _mm256_stream_si256(dst.add(offset + 32) as *mut __m256i, b);
            _mm256_stream_si256(dst.add(offset + 64) as *mut __m256i, c);
            _mm256_stream_si256(dst.add(offset + 96) as *mut __m256i, d);
            offset += 128;
        }
        while offset < nbytes {
            let v = _mm256_load_si256(src.add(offset) as *const __m256i);
            _mm256_stream_si256(dst.add(offset) as *mut __m256i, v);
            offset += 32;
        }
        _mm_sfence();
    }
}

/// SSE2 streaming copy.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn copy_sse2(dst: *mut u8, src: *const u8, nbytes: usize) {
    use std::arch::x86_64::{__m128i, _mm_load_si128, _mm_sfence, _mm_stream_si128};

    let mut offset = 0usize;
    unsafe {
        while offset + 64 <= nbytes {
            let a = _mm_load_si128(src.add(offset) as *const __m128i);
            let b = _mm_load_si128(src.add(offset + 16) as *const __m128i);
            let c = _mm_load_si128(src.add(offset + 32) as *const __m128i);
            let d = _mm_load_si128(src.add(offset + 48) as *const __m128i);
            _mm_stream_si128(dst.add(offset) as *mut __m128i, a);
            _mm_stream_si128(dst.add(offset + 16) as *mut __m128i, b);
            _mm_stream_si128(dst.add(offset + 32) as *mut __m128i, c);
            _mm_stream_si128(dst.add(offset + 48) as *mut __m128i, d);
            offset += 64;
        }
        while offset < nbytes {
            let v = _mm_load_si128(src.add(offset) as *const __m128i);
            _mm_stream_si128(dst.add(offset) as *mut __m128i, v);
            offset += 16;
        }
        _mm_sfence();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::PageArena;
    use crate::util::page_size;

    fn pattern_page(arena: &mut PageArena, seed: u8) -> *mut u8 {
        let page = page_size();
        let ptr = arena.alloc(page).expect("alloc").as_ptr();
        for i in 0..page {
            unsafe { *ptr.add(i) = (i as u8).wrapping_mul(31).wrapping_add(seed) };
        }
        ptr
    }

    fn check_copy(copy: impl Fn(*mut u8, *const u8, usize)) {
        let page = page_size();
        let mut arena = PageArena::new(page * 2, page);
        let src = pattern_page(&mut arena, 7);
        let dst = arena.alloc(page).expect("dst alloc").as_ptr();

        copy(dst, src, page);

        let src_bytes = unsafe { std::slice::from_raw_parts(src, page) };
        let dst_bytes = unsafe { std::slice::from_raw_parts(dst, page) };
        assert_eq!(src_bytes, dst_bytes);
    }

    #[test]
    fn test_fast_copy_page_exact() {
        check_copy(|dst, src, n| unsafe { fast_copy(dst, src, n) });
    }

    #[test]
    #[cfg(target_arch = "x86_64")]
    fn test_sse2_path_exact() {
        check_copy(|dst, src, n| unsafe { copy_sse2(dst, src, n) });
    }

    #[test]
    #[cfg(target_arch = "x86_64")]
    fn test_avx2_path_exact() {
        if is_x86_feature_detected!("avx2") {
            check_copy(|dst, src, n| unsafe { copy_avx2(dst, src, n) });
        }
    }

    #[test]
    fn test_copy_level_cached() {
        assert_eq!(copy_level(), copy_level());
        assert!(!copy_level().name().is_empty());
    }

    #[test]
    fn test_partial_page_multiple_of_vector() {
        // 96 bytes exercises the unrolled-loop tail on both SIMD paths.
        let page = page_size();
        let mut arena = PageArena::new(page * 2, page);
        let src = pattern_page(&mut arena, 42);
        let dst = arena.alloc(page).expect("dst alloc").as_ptr();
        unsafe { std::ptr::write_bytes(dst, 0, page) };

        unsafe { fast_copy(dst, src, 96) };

        let src_bytes = unsafe { std::slice::from_raw_parts(src, page) };
        let dst_bytes = unsafe { std::slice::from_raw_parts(dst, page) };
        assert_eq!(&src_bytes[..96], &dst_bytes[..96]);
        assert!(dst_bytes[96..].iter().all(|&b| b == 0));
    }
}
