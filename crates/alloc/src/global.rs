//! Process-wide singleton [`Heap`] and the public free-function API built on
//! top of it.
//!
//! The allocator core carries no lock of its own: a single [`UnsafeCell`]
//! holds one `Heap`, guarded only by a one-shot initialization flag, not a
//! mutex. Callers that drive this crate from more than one thread are
//! responsible for their own external synchronization — see each function's
//! safety section.

use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::heap::Heap;

struct GlobalHeap {
    inner: UnsafeCell<Option<Heap>>,
}

// Safety contract lives with the caller, not the type: every public function
// below documents that concurrent callers must synchronize externally. This
// mirrors spec's choice not to pay for internal locking in a single-threaded
// allocator core.
unsafe impl Sync for GlobalHeap {}

static HEAP: GlobalHeap = GlobalHeap {
    inner: UnsafeCell::new(None),
};
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Runs bootstrap exactly once (subsequent calls are no-ops), then hands
/// back a mutable reference to the singleton `Heap`.
///
/// # Safety
///
/// Must not be called from more than one thread without external
/// synchronization; this crate performs none of its own.
unsafe fn with_heap<R>(f: impl FnOnce(&mut Heap) -> R) -> Option<R> {
    if !INITIALIZED.load(Ordering::Relaxed) {
        let heap = unsafe { Heap::bootstrap() }?;
        unsafe { *HEAP.inner.get() = Some(heap) };
        INITIALIZED.store(true, Ordering::Relaxed);
    }
    let slot = unsafe { &mut *HEAP.inner.get() };
    slot.as_mut().map(f)
}

/// Allocates `size` bytes. Returns a null pointer on failure (zero size,
/// oversized request, or kernel allocation failure), mirroring this
/// function's C heritage rather than the richer `Option` the library-level
/// [`Heap`] type exposes.
///
/// # Safety
///
/// Must not be called concurrently with any other function in this module
/// from a different thread without external synchronization.
pub unsafe fn allocate(size: usize) -> *mut u8 {
    unsafe { with_heap(|heap| heap.allocate(size)) }
        .flatten()
        .map_or(core::ptr::null_mut(), NonNull::as_ptr)
}

/// As [`allocate`], but for `num` zeroed elements of `elem_size` bytes each.
///
/// # Safety
///
/// Same as [`allocate`].
pub unsafe fn zero_allocate(num: usize, elem_size: usize) -> *mut u8 {
    unsafe { with_heap(|heap| heap.zero_allocate(num, elem_size)) }
        .flatten()
        .map_or(core::ptr::null_mut(), NonNull::as_ptr)
}

/// Frees a pointer previously returned by [`allocate`], [`zero_allocate`],
/// or [`reallocate`]. A null pointer is a no-op.
///
/// # Safety
///
/// `payload` must be null or a live pointer this module previously handed
/// out and not already freed. Must not be called concurrently with any
/// other function in this module from a different thread without external
/// synchronization.
pub unsafe fn free(payload: *mut u8) {
    let Some(ptr) = NonNull::new(payload) else {
        return;
    };
    unsafe {
        with_heap(|heap| heap.free(ptr));
    }
}

/// Resizes a previously-allocated block, as [`Heap::reallocate`]. Returns
/// null on failure, leaving the original block untouched.
///
/// # Safety
///
/// `payload` must be null or a live pointer this module previously handed
/// out and not already freed. Must not be called concurrently with any
/// other function in this module from a different thread without external
/// synchronization.
pub unsafe fn reallocate(payload: *mut u8, new_size: usize) -> *mut u8 {
    let Some(ptr) = NonNull::new(payload) else {
        return unsafe { allocate(new_size) };
    };
    unsafe { with_heap(|heap| heap.reallocate(ptr, new_size)) }
        .flatten()
        .map_or(core::ptr::null_mut(), NonNull::as_ptr)
}

// Reads one of `Heap`'s introspection counters through the singleton.
// Returns 0 before the first successful allocation, since the heap is only
// bootstrapped lazily, on first use.
//
// # Safety
//
// Must not be called concurrently with a mutating call in this module from
// a different thread without external synchronization.
macro_rules! introspection_getter {
    ($name:ident) => {
        pub unsafe fn $name() -> usize {
            unsafe { with_heap(|heap| heap.$name()) }.unwrap_or(0)
        }
    };
}

introspection_getter!(num_free_blocks);
introspection_getter!(num_free_bytes);
introspection_getter!(num_allocated_blocks);
introspection_getter!(num_allocated_bytes);
introspection_getter!(num_meta_data_bytes);
introspection_getter!(size_meta_data);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // These tests share the one process-wide `Heap`, so they must not run
    // concurrently with each other; a process-wide lock keeps the suite
    // single-threaded without depending on `cargo test`'s harness flags.
    static SERIAL: Mutex<()> = Mutex::new(());

    #[test]
    fn round_trips_through_raw_pointers() {
        let _guard = SERIAL.lock().unwrap();
        unsafe {
            let ptr = allocate(64);
            assert!(!ptr.is_null());
            ptr.write(42);
            assert_eq!(ptr.read(), 42);
            free(ptr);
        }
    }

    #[test]
    fn free_of_null_is_a_no_op() {
        let _guard = SERIAL.lock().unwrap();
        unsafe { free(core::ptr::null_mut()) };
    }

    #[test]
    fn reallocate_of_null_behaves_like_allocate() {
        let _guard = SERIAL.lock().unwrap();
        unsafe {
            let ptr = reallocate(core::ptr::null_mut(), 32);
            assert!(!ptr.is_null());
            free(ptr);
        }
    }

    #[test]
    fn oversized_allocate_returns_null() {
        let _guard = SERIAL.lock().unwrap();
        unsafe {
            let ptr = allocate(crate::consts::MAX_SIZE + 1);
            assert!(ptr.is_null());
        }
    }
}
