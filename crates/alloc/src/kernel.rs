//! The kernel collaborator contract: the handful of syscalls the allocator
//! leans on to grow the arena and to back large allocations. Kept behind a
//! narrow interface so the rest of the crate never touches `libc` directly.

use core::ptr::NonNull;
use std::fs;
use std::sync::OnceLock;

/// Extends the program break by `increment` bytes, returning the previous
/// break (the base of the newly-available region), or `None` on failure.
///
/// # Safety
///
/// Must not be called concurrently with anything else that moves the break;
/// the allocator's single-threaded contract is what makes this sound.
pub unsafe fn extend_break(increment: usize) -> Option<NonNull<u8>> {
    // sbrk is deprecated upstream in favor of mmap-based allocators, but it's
    // exactly the primitive a bootstrap-time arena reservation wants: one
    // contiguous, alignable region obtained once.
    #[allow(deprecated)]
    let prev = unsafe { libc::sbrk(increment as libc::intptr_t) };
    if prev == usize::MAX as *mut libc::c_void {
        log::error!("sbrk({increment}) failed: {}", std::io::Error::last_os_error());
        return None;
    }
    NonNull::new(prev as *mut u8)
}

/// Current program break, without moving it.
pub fn current_break() -> usize {
    #[allow(deprecated)]
    let brk = unsafe { libc::sbrk(0) };
    brk as usize
}

/// Maps a fresh anonymous region of at least `len` bytes, optionally hinting
/// the kernel to back it with huge pages. A rejected huge-page hint is a
/// plain mapping failure here, same as any other: this collaborator does not
/// retry internally, so the failure surfaces as the faulted entry point's
/// null return, not a silently different mapping than what was asked for.
pub fn map_pages(len: usize, huge: bool) -> Option<NonNull<u8>> {
    let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    if huge {
        flags |= libc::MAP_HUGETLB;
    }
    let addr = unsafe {
        libc::mmap(
            core::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            -1,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        log::error!("mmap({len}, huge={huge}) failed: {}", std::io::Error::last_os_error());
        return None;
    }
    NonNull::new(addr as *mut u8)
}

/// Unmaps a region previously returned by [`map_pages`].
///
/// # Safety
///
/// `base` and `len` must exactly match a prior successful `map_pages` call,
/// with no intervening partial unmap of the same region.
pub unsafe fn unmap_pages(base: NonNull<u8>, len: usize) {
    let result = unsafe { libc::munmap(base.as_ptr() as *mut libc::c_void, len) };
    if result != 0 {
        log::error!("munmap({len}) failed: {}", std::io::Error::last_os_error());
    }
}

/// The system's regular page size, via `sysconf(_SC_PAGESIZE)`.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if n > 0 { n as usize } else { 4096 }
    })
}

/// The system's huge-page size, read once from `/proc/meminfo`'s `Hugepagesize`
/// line. Falls back to 2 MiB (the common x86_64 default) if the file is
/// absent or unparseable, e.g. in a container without hugetlbfs.
pub fn huge_page_size() -> usize {
    static HUGE_PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *HUGE_PAGE_SIZE.get_or_init(|| parse_huge_page_size().unwrap_or(2 * 1024 * 1024))
}

fn parse_huge_page_size() -> Option<usize> {
    let contents = fs::read_to_string("/proc/meminfo").ok()?;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("Hugepagesize:") {
            let kb: usize = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_a_power_of_two() {
        let size = page_size();
        assert!(size > 0 && size & (size - 1) == 0);
    }

    #[test]
    fn huge_page_size_has_a_fallback() {
        assert!(huge_page_size() > 0);
    }

    #[test]
    fn map_and_unmap_round_trips() {
        let len = page_size();
        let ptr = map_pages(len, false).expect("mmap should succeed for one page");
        unsafe {
            ptr.as_ptr().write(0xAB);
            assert_eq!(ptr.as_ptr().read(), 0xAB);
            unmap_pages(ptr, len);
        }
    }
}
