//! Build-time constants fixing the shape of the arena.

/// Absolute cap on a single request, across all public entry points.
pub const MAX_SIZE: usize = 100_000_000;

/// Smallest block the arena hands out (order 0).
pub const MIN_BLOCK_SIZE: usize = 128;

/// Highest order the arena splits/joins at. Orders 0..=MAX_ORDER are real;
/// `MAX_ORDER + 1` is the sentinel meaning "route to the large path."
pub const MAX_ORDER: usize = 10;

/// Largest block the arena hands out: `MIN_BLOCK_SIZE << MAX_ORDER`.
pub const MAX_BLOCK_SIZE: usize = MIN_BLOCK_SIZE << MAX_ORDER;

/// Number of top-order blocks the arena is bootstrapped with.
pub const ARENA_BLOCKS: usize = 32;

/// Total size of the reserved arena region: `32 * MAX_BLOCK_SIZE`.
pub const ARENA_SIZE: usize = ARENA_BLOCKS * MAX_BLOCK_SIZE;

/// Sentinel order signalling "too large for the arena, route to large path."
pub const SENTINEL_ORDER: usize = MAX_ORDER + 1;

/// `allocate`'s huge-page hint threshold: requests at or above this size get
/// a huge-page-backed mapping.
pub const HUGE_PAGE_THRESHOLD_PLAIN: usize = 4 * 1024 * 1024;

/// `zero_allocate`'s huge-page hint threshold, tested against the
/// *per-element* size (strictly greater than), not the total.
pub const HUGE_PAGE_THRESHOLD_ZEROED: usize = 1024 * 1024;
