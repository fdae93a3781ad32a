//! Exercises the buddy allocator end to end: a mixed workload of small and
//! large allocations, zeroed allocations, growth and shrink reallocations,
//! and frees, with the introspection counters logged after each phase.

use alloc_buddy::heap::Heap;

fn log_counters(label: &str, heap: &Heap) {
    log::info!(
        "{label}: free_blocks={} free_bytes={} allocated_blocks={} allocated_bytes={} meta_bytes={}",
        heap.num_free_blocks(),
        heap.num_free_bytes(),
        heap.num_allocated_blocks(),
        heap.num_allocated_bytes(),
        heap.num_meta_data_bytes(),
    );
}

/// Number of small allocations to drive through the arena, read from the
/// first CLI argument if present (defaulting to 16).
fn small_allocation_count() -> usize {
    std::env::args().nth(1).and_then(|arg| arg.parse().ok()).unwrap_or(16)
}

fn main() {
    env_logger::init();

    let mut heap = unsafe { Heap::bootstrap().expect("arena bootstrap failed") };
    log_counters("after bootstrap", &heap);

    let count = small_allocation_count();
    let small: Vec<_> = (0..count)
        .map(|i| heap.allocate(64 + i * 8).expect("small allocation failed"))
        .collect();
    log_counters(&format!("after {count} small allocations"), &heap);

    let zeroed = heap.zero_allocate(256, 16).expect("zeroed allocation failed");
    let zeroed_bytes = unsafe { core::slice::from_raw_parts(zeroed.as_ptr(), 256 * 16) };
    assert!(zeroed_bytes.iter().all(|&b| b == 0), "zero_allocate must return zeroed memory");
    log_counters("after zeroed allocation", &heap);

    let mut small = small.into_iter();
    if let Some(first) = small.next() {
        let grown = unsafe { heap.reallocate(first, 4096) }.expect("grow reallocation failed");
        unsafe { heap.free(grown) };
        log_counters("after growing and freeing one allocation", &heap);
    }

    for ptr in small {
        unsafe { heap.free(ptr) };
    }
    unsafe { heap.free(zeroed) };
    log_counters("after freeing everything arena-resident", &heap);

    let large = heap.allocate(8 * 1024 * 1024).expect("large allocation failed");
    log_counters("after an 8 MiB allocation", &heap);
    unsafe { heap.free(large) };
    log_counters("after freeing the large allocation", &heap);
}
