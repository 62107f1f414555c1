//! Zero-filled single-page allocator for thread control blocks.
//!
//! Per the thread creation design, a new thread's control block and its
//! stack share one page: the TCB lives at the low address, the stack grows
//! down from the high address. This keeps per-thread bookkeeping to a
//! single allocation and makes the stack-overflow canary meaningful (it
//! sits right where a stack overflow would first clobber the TCB).
//!
//! This module is the Rust expression of the "page allocator" external
//! collaborator from the external interfaces: `alloc_page(zero_fill)` /
//! `free_page`. A real kernel would back this with physical frame
//! allocation; here (and under `std-shim`) it is the process global
//! allocator, page-aligned.

use core::ptr::NonNull;
use portable_atomic::{AtomicUsize, Ordering};

extern crate alloc;
use alloc::alloc::{alloc, alloc_zeroed, dealloc, Layout};

/// Size of one page, and therefore of one thread's combined TCB + stack.
pub const PAGE_SIZE: usize = 4096;

fn page_layout() -> Layout {
    Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).expect("PAGE_SIZE is a valid alignment")
}

/// Statistics for the page allocator, exposed for diagnostics and tests.
#[derive(Debug, Default)]
pub struct PageAllocStats {
    allocated: AtomicUsize,
    freed: AtomicUsize,
}

impl PageAllocStats {
    /// Pages currently outstanding (allocated and not yet freed).
    pub fn live(&self) -> usize {
        self.allocated
            .load(Ordering::Acquire)
            .saturating_sub(self.freed.load(Ordering::Acquire))
    }
}

static STATS: PageAllocStats = PageAllocStats {
    allocated: AtomicUsize::new(0),
    freed: AtomicUsize::new(0),
};

/// Allocate one page, optionally zero-filled.
///
/// Returns `None` if the allocator is out of memory, mirroring
/// `alloc_page(zero_fill) -> ptr | null` from the external interfaces.
pub fn alloc_page(zero_fill: bool) -> Option<NonNull<u8>> {
    let layout = page_layout();
    let raw = unsafe {
        if zero_fill {
            alloc_zeroed(layout)
        } else {
            alloc(layout)
        }
    };

    let ptr = NonNull::new(raw)?;
    STATS.allocated.fetch_add(1, Ordering::AcqRel);
    Some(ptr)
}

/// Free a page previously returned by [`alloc_page`].
///
/// # Safety
///
/// `ptr` must have been returned by `alloc_page` and not already freed.
pub unsafe fn free_page(ptr: NonNull<u8>) {
    unsafe {
        dealloc(ptr.as_ptr(), page_layout());
    }
    STATS.freed.fetch_add(1, Ordering::AcqRel);
}

/// Current page-allocator statistics.
pub fn stats() -> &'static PageAllocStats {
    &STATS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_zeroed_is_actually_zero() {
        let page = alloc_page(true).unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(page.as_ptr(), PAGE_SIZE) };
        assert!(bytes.iter().all(|&b| b == 0));
        unsafe { free_page(page) };
    }

    #[test]
    fn alloc_is_page_aligned() {
        let page = alloc_page(true).unwrap();
        assert_eq!(page.as_ptr() as usize % PAGE_SIZE, 0);
        unsafe { free_page(page) };
    }

    #[test]
    fn live_count_tracks_alloc_and_free() {
        let before = stats().live();
        let page = alloc_page(true).unwrap();
        assert_eq!(stats().live(), before + 1);
        unsafe { free_page(page) };
        assert_eq!(stats().live(), before);
    }
}
