//! `Heap`: ties the arena, the large-allocation path, and the counters
//! together behind the four public operations and the introspection
//! getters. Holds no lock of its own — single-threaded by contract, per
//! [`crate::global`]'s safety notes.

use core::ptr::NonNull;

use crate::arena::{order_of, Arena};
use crate::bootstrap;
use crate::consts::{MAX_BLOCK_SIZE, MAX_ORDER, MAX_SIZE};
use crate::counters::Counters;
use crate::header::{header_from_payload, BlockHeader, HEADER_SIZE, OriginMethod};
use crate::large;

pub struct Heap {
    arena: Arena,
    counters: Counters,
}

impl Heap {
    /// Reserves and bootstraps the arena. Must run exactly once.
    ///
    /// # Safety
    ///
    /// Must not run concurrently with any other break-moving call, and this
    /// `Heap` must not have been initialized before.
    pub unsafe fn bootstrap() -> Option<Heap> {
        let base = unsafe { bootstrap::reserve_arena()? };
        let mut arena = Arena::new(base);
        let mut counters = Counters::new();
        unsafe { arena.bootstrap(&mut counters) };
        Some(Heap { arena, counters })
    }

    fn request_order(payload_bytes: usize) -> usize {
        order_of((payload_bytes.max(1)) + HEADER_SIZE)
    }

    fn from_arena_block(&mut self, order: usize, origin: OriginMethod) -> NonNull<u8> {
        let mut block = self
            .arena
            .find_free(order, &mut self.counters)
            .expect("arena invariant: order <= MAX_ORDER must always be satisfiable");
        let payload = unsafe { block.as_ref().payload_size() };
        self.counters.free_transition(payload, false);
        unsafe {
            block.as_mut().mark_busy();
            block.as_mut().set_origin(origin);
        }
        unsafe { NonNull::new_unchecked(block.as_ref().payload_addr() as *mut u8) }
    }

    fn allocate_with_origin(&mut self, size: usize, origin: OriginMethod, huge: bool) -> Option<NonNull<u8>> {
        if size == 0 || size > MAX_SIZE {
            return None;
        }
        if large::exceeds_arena(size) {
            let block = large::map_block(size, origin, huge)?;
            let payload = unsafe { block.as_ref().payload_size() };
            self.counters.block_created(payload, false);
            return Some(unsafe { NonNull::new_unchecked(block.as_ref().payload_addr() as *mut u8) });
        }
        let order = Self::request_order(size);
        if order > MAX_ORDER {
            return None;
        }
        Some(self.from_arena_block(order, origin))
    }

    /// Allocates `size` payload bytes. `None` if `size` is zero or exceeds
    /// [`MAX_SIZE`], or if the kernel cannot back a large request.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let huge = large::wants_huge_page_plain(size);
        self.allocate_with_origin(size, OriginMethod::Plain, huge)
    }

    /// Allocates space for `num` elements of `elem_size` bytes each, zeroed.
    /// `None` on overflow of `num * elem_size`, or the same conditions as
    /// [`Self::allocate`].
    pub fn zero_allocate(&mut self, num: usize, elem_size: usize) -> Option<NonNull<u8>> {
        let total = num.checked_mul(elem_size)?;
        let huge = large::wants_huge_page_zeroed(elem_size);
        let payload = self.allocate_with_origin(total, OriginMethod::Zeroed, huge)?;
        unsafe { payload.as_ptr().write_bytes(0, total) };
        Some(payload)
    }

    /// Returns a previously-allocated block to the allocator, coalescing
    /// with free buddies as far as possible.
    ///
    /// # Safety
    ///
    /// `payload` must be a live payload pointer previously returned by this
    /// `Heap` and not already freed.
    pub unsafe fn free(&mut self, payload: NonNull<u8>) {
        let block = unsafe { header_from_payload(payload) };
        if unsafe { block.as_ref().block_size() } <= MAX_BLOCK_SIZE {
            if unsafe { block.as_ref().is_free() } {
                // Double free: weakly detected via the still-valid header,
                // silently ignored rather than corrupting the free lists.
                return;
            }
            let order = order_of(unsafe { block.as_ref().block_size() });
            let order = order.min(MAX_ORDER);
            let payload_size = unsafe { block.as_ref().payload_size() };
            let mut block = block;
            unsafe { block.as_mut().mark_free() };
            self.counters.free_transition(payload_size, true);
            let (joined, joined_order) = self.arena.coalesce_walk(block, order, &mut self.counters);
            self.arena.insert_free(joined_order, joined);
        } else {
            let payload_size = unsafe { block.as_ref().payload_size() };
            self.counters.block_destroyed(payload_size, false);
            unsafe { large::unmap_block(block) };
        }
    }

    /// Resizes a block in place when possible (shrink is always in place;
    /// grow tries coalescing with free buddies first), falling back to
    /// allocate-copy-free.
    ///
    /// # Safety
    ///
    /// `payload` must be a live payload pointer previously returned by this
    /// `Heap` and not already freed.
    pub unsafe fn reallocate(&mut self, payload: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        if new_size == 0 || new_size > MAX_SIZE {
            return None;
        }
        let block = unsafe { header_from_payload(payload) };
        let origin = unsafe { block.as_ref().origin() };

        if unsafe { block.as_ref().block_size() } > MAX_BLOCK_SIZE {
            return unsafe { self.reallocate_large(block, new_size, origin) };
        }

        let current_order = order_of(unsafe { block.as_ref().block_size() }).min(MAX_ORDER);
        let needed_order = Self::request_order(new_size);

        if needed_order <= current_order {
            return Some(payload);
        }
        if needed_order > MAX_ORDER {
            return unsafe { self.move_to_large(block, new_size, origin) };
        }

        match unsafe { self.try_grow_in_place(block, current_order, needed_order) } {
            Some(grown) => Some(unsafe { NonNull::new_unchecked(grown.as_ref().payload_addr() as *mut u8) }),
            None => unsafe { self.move_block(block, new_size, origin) },
        }
    }

    /// Attempts to grow a busy arena block to at least `needed_order` by
    /// joining with free buddies, stopping as soon as `needed_order` is
    /// reached rather than coalescing all the way up. Read-only look-ahead
    /// first, so a failing attempt never mutates anything.
    unsafe fn try_grow_in_place(
        &mut self,
        block: NonNull<BlockHeader>,
        current_order: usize,
        needed_order: usize,
    ) -> Option<NonNull<BlockHeader>> {
        let addr = block.as_ptr() as usize;
        if self.arena.coalesce_lookahead(addr, current_order) < needed_order {
            return None;
        }

        let old_payload_addr = unsafe { block.as_ref().payload_addr() };
        let old_payload_size = unsafe { block.as_ref().payload_size() };
        self.counters.free_transition(old_payload_size, true);

        let mut current = block;
        let mut order = current_order;
        while order < needed_order {
            current = unsafe { self.arena.try_join(current, order, &mut self.counters) }
                .expect("look-ahead guaranteed this join succeeds");
            order += 1;
        }

        let payload_after = unsafe { current.as_ref().payload_size() };
        self.counters.free_transition(payload_after, false);
        unsafe { current.as_mut().mark_busy() };

        // The joined parent's base is `min(original, buddy)`, which may not
        // be the original block's own address — when it isn't, the old
        // payload bytes now live partway into the new, larger block and
        // must be moved down to the new payload's base. The two ranges can
        // overlap, so this needs an overlap-safe move, not a plain copy.
        let new_payload_addr = unsafe { current.as_ref().payload_addr() };
        if new_payload_addr != old_payload_addr {
            unsafe {
                core::ptr::copy(
                    old_payload_addr as *const u8,
                    new_payload_addr as *mut u8,
                    old_payload_size,
                );
            }
        }
        Some(current)
    }

    unsafe fn move_block(
        &mut self,
        old_block: NonNull<BlockHeader>,
        new_size: usize,
        origin: OriginMethod,
    ) -> Option<NonNull<u8>> {
        let old_payload_size = unsafe { old_block.as_ref().payload_size() };
        let huge = match origin {
            OriginMethod::Plain => large::wants_huge_page_plain(new_size),
            OriginMethod::Zeroed => large::wants_huge_page_zeroed(new_size),
        };
        let new_payload = self.allocate_with_origin(new_size, origin, huge)?;
        let copy_len = old_payload_size.min(new_size);
        unsafe {
            let old_payload = old_block.as_ref().payload_addr() as *const u8;
            core::ptr::copy_nonoverlapping(old_payload, new_payload.as_ptr(), copy_len);
            self.free(NonNull::new_unchecked(old_payload as *mut u8));
        }
        Some(new_payload)
    }

    unsafe fn move_to_large(
        &mut self,
        old_block: NonNull<BlockHeader>,
        new_size: usize,
        origin: OriginMethod,
    ) -> Option<NonNull<u8>> {
        unsafe { self.move_block(old_block, new_size, origin) }
    }

    /// Large-to-large resize: returned unchanged only if the mapping already
    /// has exactly the requested payload capacity. Any other size, smaller
    /// or larger, gets a fresh mapping via [`Self::move_block`] — unlike the
    /// arena path, a large block's mapped size is fixed at creation and
    /// can't be trimmed or grown in place.
    unsafe fn reallocate_large(
        &mut self,
        block: NonNull<BlockHeader>,
        new_size: usize,
        origin: OriginMethod,
    ) -> Option<NonNull<u8>> {
        if new_size + HEADER_SIZE == unsafe { block.as_ref().block_size() } {
            return Some(unsafe { NonNull::new_unchecked(block.as_ref().payload_addr() as *mut u8) });
        }
        unsafe { self.move_block(block, new_size, origin) }
    }

    pub fn num_free_blocks(&self) -> usize {
        self.counters.free_blocks()
    }

    pub fn num_free_bytes(&self) -> usize {
        self.counters.free_bytes()
    }

    pub fn num_allocated_blocks(&self) -> usize {
        self.counters.allocated_blocks()
    }

    pub fn num_allocated_bytes(&self) -> usize {
        self.counters.allocated_bytes()
    }

    pub fn num_meta_data_bytes(&self) -> usize {
        self.counters.metadata_bytes()
    }

    pub fn size_meta_data(&self) -> usize {
        HEADER_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Each test bootstraps its own `Heap` via `sbrk`, which moves the one
    // program break shared by the whole process; run them one at a time so
    // concurrent `cargo test` threads don't race on it.
    static SERIAL: Mutex<()> = Mutex::new(());

    fn fresh_heap() -> Heap {
        unsafe { Heap::bootstrap().expect("bootstrap must succeed in test process") }
    }

    #[test]
    fn allocate_then_free_returns_block_to_pool() {
        let _guard = SERIAL.lock().unwrap();
        let mut heap = fresh_heap();
        let free_before = heap.num_free_bytes();
        let ptr = heap.allocate(64).expect("small allocation must succeed");
        assert!(heap.num_free_bytes() < free_before);
        unsafe { heap.free(ptr) };
        assert_eq!(heap.num_free_bytes(), free_before);
    }

    #[test]
    fn zero_allocate_zeroes_memory() {
        let _guard = SERIAL.lock().unwrap();
        let mut heap = fresh_heap();
        let ptr = heap.zero_allocate(16, 8).expect("zero_allocate must succeed");
        let slice = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), 128) };
        assert!(slice.iter().all(|&b| b == 0));
        unsafe { heap.free(ptr) };
    }

    #[test]
    fn reallocate_smaller_size_is_in_place() {
        let _guard = SERIAL.lock().unwrap();
        let mut heap = fresh_heap();
        let ptr = heap.allocate(1000).expect("allocation must succeed");
        let shrunk = unsafe { heap.reallocate(ptr, 10) }.expect("shrink must succeed");
        assert_eq!(ptr, shrunk);
        unsafe { heap.free(shrunk) };
    }

    #[test]
    fn reallocate_zero_size_fails() {
        let _guard = SERIAL.lock().unwrap();
        let mut heap = fresh_heap();
        let ptr = heap.allocate(100).expect("allocation must succeed");
        assert!(unsafe { heap.reallocate(ptr, 0) }.is_none());
        unsafe { heap.free(ptr) };
    }

    #[test]
    fn oversized_allocate_is_rejected() {
        let _guard = SERIAL.lock().unwrap();
        let mut heap = fresh_heap();
        assert!(heap.allocate(MAX_SIZE + 1).is_none());
    }

    #[test]
    fn zero_allocate_overflow_is_rejected() {
        let _guard = SERIAL.lock().unwrap();
        let mut heap = fresh_heap();
        assert!(heap.zero_allocate(usize::MAX, 2).is_none());
    }

    #[test]
    fn round_trip_restores_pristine_arena() {
        let _guard = SERIAL.lock().unwrap();
        let mut heap = fresh_heap();
        let allocated_before = heap.num_allocated_blocks();
        let free_before = heap.num_free_blocks();
        let ptr = heap.allocate(100).expect("allocation must succeed");
        unsafe { heap.free(ptr) };
        assert_eq!(heap.num_allocated_blocks(), allocated_before);
        assert_eq!(heap.num_free_blocks(), free_before);
        heap.arena.check_invariants();
    }

    #[test]
    fn coalescence_fixed_point_after_last_free() {
        let _guard = SERIAL.lock().unwrap();
        let mut heap = fresh_heap();
        let ptr = heap.allocate(1).expect("allocation must succeed");
        unsafe { heap.free(ptr) };
        // 32 blocks summing to exactly the arena size, with no block able
        // to exceed MAX_BLOCK_SIZE, forces every block back to top order.
        assert_eq!(heap.num_allocated_blocks(), 32);
        assert_eq!(heap.num_free_blocks(), 32);
        heap.arena.check_invariants();
    }

    #[test]
    fn arena_exhausts_after_32_max_size_allocations() {
        let _guard = SERIAL.lock().unwrap();
        let mut heap = fresh_heap();
        let max_payload = crate::consts::MAX_BLOCK_SIZE - HEADER_SIZE;

        let ptrs: Vec<_> = (0..32)
            .map(|_| heap.allocate(max_payload).expect("arena has exactly 32 top-order blocks"))
            .collect();
        assert!(heap.allocate(max_payload).is_none(), "a 33rd max-size allocation must fail");

        for ptr in ptrs {
            unsafe { heap.free(ptr) };
        }
        assert_eq!(heap.num_allocated_blocks(), 32);
        assert_eq!(heap.num_free_blocks(), 32);
        heap.arena.check_invariants();
    }

    #[test]
    fn invariants_hold_after_mixed_split_and_join_traffic() {
        let _guard = SERIAL.lock().unwrap();
        let mut heap = fresh_heap();
        let sizes = [32usize, 500, 4000, 64, 20000, 8];
        let ptrs: Vec<_> = sizes.iter().map(|&s| heap.allocate(s).expect("allocation must succeed")).collect();
        heap.arena.check_invariants();

        // Free every other allocation, leaving a checkerboard of busy/free
        // blocks at several orders, then free the rest.
        let mut kept = Vec::new();
        for (i, ptr) in ptrs.into_iter().enumerate() {
            if i % 2 == 0 {
                unsafe { heap.free(ptr) };
            } else {
                kept.push(ptr);
            }
        }
        heap.arena.check_invariants();

        for ptr in kept {
            unsafe { heap.free(ptr) };
        }
        heap.arena.check_invariants();
    }

    #[test]
    fn reallocate_large_shrink_remaps_rather_than_reusing_the_old_mapping() {
        let _guard = SERIAL.lock().unwrap();
        let mut heap = fresh_heap();
        let ptr = heap.allocate(9_000_000).expect("large allocation must succeed");
        let shrunk = unsafe { heap.reallocate(ptr, 8_000_000) }.expect("large shrink must succeed");
        // A mismatched size always gets a fresh mapping, even when smaller.
        assert_ne!(ptr, shrunk);
        unsafe { heap.free(shrunk) };
    }

    #[test]
    fn grow_reallocation_preserves_origin_method() {
        let _guard = SERIAL.lock().unwrap();
        let mut heap = fresh_heap();
        let ptr = heap.zero_allocate(4, 4).expect("zero_allocate must succeed");
        let grown = unsafe { heap.reallocate(ptr, 2048) }.expect("grow must succeed");
        let header = unsafe { header_from_payload(grown).as_ref() };
        assert_eq!(header.origin(), OriginMethod::Zeroed);
        unsafe { heap.free(grown) };
    }
}
