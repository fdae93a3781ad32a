//! Large-allocation escape path: requests too big for the arena go straight
//! to the kernel via `mmap`, still wrapped in the same in-band header so
//! free/reallocate don't need to know which path a block came from.

use core::ptr::NonNull;

use crate::consts::{HUGE_PAGE_THRESHOLD_PLAIN, HUGE_PAGE_THRESHOLD_ZEROED, MAX_BLOCK_SIZE};
use crate::header::{BlockHeader, HEADER_SIZE, OriginMethod};
use crate::kernel;

/// Rounds `n` up to the next multiple of `align`. `align` must be a power of
/// two.
pub fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Whether a plain `allocate` request of `requested_bytes` (payload size)
/// should be hinted huge-page.
pub fn wants_huge_page_plain(requested_bytes: usize) -> bool {
    requested_bytes >= HUGE_PAGE_THRESHOLD_PLAIN
}

/// Whether a `zero_allocate` request should be hinted huge-page. Tested
/// against the *per-element* size, not `num * size`, and strictly greater
/// than the threshold (unlike the plain path's `>=`).
pub fn wants_huge_page_zeroed(element_size: usize) -> bool {
    element_size > HUGE_PAGE_THRESHOLD_ZEROED
}

/// Maps a fresh block of at least `payload_bytes` usable bytes, returns the
/// header. Never touches the arena; every large block is its own mapping.
///
/// When `huge` is set, the mapped length is rounded up to a multiple of the
/// system huge-page size rather than the regular page size, so the later
/// unmap covers exactly what was mapped.
pub fn map_block(payload_bytes: usize, origin: OriginMethod, huge: bool) -> Option<NonNull<BlockHeader>> {
    let align = if huge { kernel::huge_page_size() } else { kernel::page_size() };
    let total = align_up(payload_bytes + HEADER_SIZE, align);
    let base = kernel::map_pages(total, huge)?;
    let mut ptr = base.cast::<BlockHeader>();
    unsafe { BlockHeader::init(ptr, total, origin) };
    unsafe { ptr.as_mut().mark_busy() };
    Some(ptr)
}

/// Unmaps a large block previously produced by [`map_block`].
///
/// # Safety
///
/// `block` must be a live large allocation (its mapped size, as recorded in
/// its header, must match what was actually mapped).
pub unsafe fn unmap_block(block: NonNull<BlockHeader>) {
    let size = unsafe { block.as_ref().block_size() };
    unsafe { kernel::unmap_pages(block.cast::<u8>(), size) };
}

/// True if a request for this many payload bytes can never be satisfied by
/// the fixed-size arena and must route here instead.
pub fn exceeds_arena(payload_bytes: usize) -> bool {
    payload_bytes > MAX_BLOCK_SIZE - HEADER_SIZE
}
