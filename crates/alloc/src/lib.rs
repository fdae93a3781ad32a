//! A buddy-system user-space heap allocator.
//!
//! Carves a fixed 4 MiB arena, reserved once from the program break, into
//! power-of-two blocks tracked by in-band headers. Requests too large for
//! the arena route straight to the kernel via `mmap`. The allocator core is
//! single-threaded by contract: see [`global`] for the synchronization
//! precondition callers must uphold.

pub mod arena;
pub mod bootstrap;
pub mod consts;
pub mod counters;
pub mod freelist;
pub mod global;
pub mod header;
pub mod heap;
pub mod kernel;
pub mod large;

pub use header::OriginMethod;
pub use heap::Heap;
