//! One-shot arena reservation: aligns the program break to an
//! [`ARENA_SIZE`]-sized boundary, then extends it by exactly one arena's
//! worth of bytes.
//!
//! Alignment matters because buddy addressing (`addr ^ block_size`) only
//! stays inside the arena if the arena's own base is a multiple of its size.

use crate::consts::ARENA_SIZE;
use crate::kernel;

/// Reserves and returns the base address of a fresh, `ARENA_SIZE`-aligned
/// arena. Must be called exactly once per process.
///
/// # Safety
///
/// Must not run concurrently with any other break-moving call, and must not
/// have run before in this process.
pub unsafe fn reserve_arena() -> Option<usize> {
    let current = kernel::current_break();
    let misalignment = current % ARENA_SIZE;
    let padding = if misalignment == 0 { 0 } else { ARENA_SIZE - misalignment };

    if padding > 0 {
        unsafe { kernel::extend_break(padding)? };
    }

    let base = unsafe { kernel::extend_break(ARENA_SIZE)? };
    let base_addr = base.as_ptr() as usize;
    debug_assert_eq!(base_addr % ARENA_SIZE, 0, "arena base must be arena-size aligned");
    Some(base_addr)
}
