//! Lightweight atomic reference counting for no_std environments.
//!
//! This provides an Arc-like abstraction using portable atomics, used to
//! share a thread control block between its `Thread` handle, `JoinHandle`,
//! and the scheduler's global thread list without pulling in `alloc::sync`
//! (which needs `unstable` features for some of the intrusive tricks the
//! scheduler wants). Unlike `std::sync::Arc`, `try_inc` exposes manual
//! increment so intrusive wait lists can upgrade a raw reference back into
//! an owning one.

use core::alloc::Layout;
use core::ops::Deref;
use core::ptr::NonNull;
use portable_atomic::{AtomicUsize, Ordering};

extern crate alloc;
use alloc::alloc::{alloc, dealloc};

/// A lightweight atomic reference counter similar to `Arc` but with manual
/// increment/decrement control, useful for intrusive data structures.
pub struct ArcLite<T> {
    ptr: NonNull<ArcLiteInner<T>>,
}

struct ArcLiteInner<T> {
    count: AtomicUsize,
    data: T,
}

impl<T> ArcLite<T> {
    /// Create a new `ArcLite` with the given data and a reference count of 1.
    pub fn new(data: T) -> Self {
        let layout = Layout::new::<ArcLiteInner<T>>();
        let alloc_ptr = unsafe { alloc(layout) as *mut ArcLiteInner<T> };
        if alloc_ptr.is_null() {
            alloc::alloc::handle_alloc_error(layout);
        }

        unsafe {
            core::ptr::write(
                alloc_ptr,
                ArcLiteInner {
                    count: AtomicUsize::new(1),
                    data,
                },
            );
        }

        Self {
            ptr: unsafe { NonNull::new_unchecked(alloc_ptr) },
        }
    }

    /// Increment the reference count.
    ///
    /// Returns `false` if the object's count has already reached zero
    /// (which should never observably happen through safe `ArcLite` usage,
    /// but guards intrusive callers holding a stale raw pointer).
    pub fn try_inc(&self) -> bool {
        let inner = unsafe { self.ptr.as_ref() };
        let mut current = inner.count.load(Ordering::Acquire);

        loop {
            if current == 0 {
                return false;
            }

            match inner.count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Decrement the reference count, deallocating on the last reference.
    ///
    /// Returns the previous reference count.
    pub fn dec(&self) -> usize {
        let inner = unsafe { self.ptr.as_ref() };
        let prev_count = inner.count.fetch_sub(1, Ordering::AcqRel);

        if prev_count == 1 {
            unsafe {
                self.deallocate();
            }
        }

        prev_count
    }

    /// Get the current reference count.
    ///
    /// The value may change immediately after being read; this is a
    /// diagnostic, not a synchronization point.
    pub fn ref_count(&self) -> usize {
        let inner = unsafe { self.ptr.as_ref() };
        inner.count.load(Ordering::Acquire)
    }

    /// Deallocate the backing storage.
    ///
    /// # Safety
    ///
    /// Must only be called once the reference count has reached zero.
    unsafe fn deallocate(&self) {
        let layout = Layout::new::<ArcLiteInner<T>>();
        unsafe {
            core::ptr::drop_in_place(&mut self.ptr.as_ptr().as_mut().unwrap().data);
            dealloc(self.ptr.as_ptr() as *mut u8, layout);
        }
    }
}

impl<T> Clone for ArcLite<T> {
    fn clone(&self) -> Self {
        let inner = unsafe { self.ptr.as_ref() };
        inner.count.fetch_add(1, Ordering::AcqRel);
        Self { ptr: self.ptr }
    }
}

impl<T> Drop for ArcLite<T> {
    fn drop(&mut self) {
        self.dec();
    }
}

impl<T> Deref for ArcLite<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        let inner = unsafe { self.ptr.as_ref() };
        &inner.data
    }
}

unsafe impl<T: Send + Sync> Send for ArcLite<T> {}
unsafe impl<T: Send + Sync> Sync for ArcLite<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic() {
        let arc = ArcLite::new(42);
        assert_eq!(*arc, 42);
        assert_eq!(arc.ref_count(), 1);
    }

    #[test]
    fn clone_shares_count() {
        let arc1 = ArcLite::new(42);
        let arc2 = arc1.clone();

        assert_eq!(*arc1, 42);
        assert_eq!(*arc2, 42);
        assert_eq!(arc1.ref_count(), 2);
        assert_eq!(arc2.ref_count(), 2);
    }

    #[test]
    fn try_inc_and_dec() {
        let arc = ArcLite::new(42);
        assert_eq!(arc.ref_count(), 1);

        assert!(arc.try_inc());
        assert_eq!(arc.ref_count(), 2);

        arc.dec();
        assert_eq!(arc.ref_count(), 1);
    }
}
