//! Mesa-style condition variables.
//!
//! Grounded on the reference kernel's `cond_wait`/`cond_signal`/
//! `cond_broadcast`: each waiter parks on its own private single-slot
//! semaphore (a "semaphore element"), and `signal` wakes the single
//! waiter among those whose semaphore element carries the
//! highest-effective-priority thread — not FIFO order. Mesa semantics
//! mean a woken waiter only gets a chance to recheck its predicate; the
//! signaler does not hand off the associated lock atomically, so callers
//! must always re-test their condition in a loop.

use super::lock::Lock;
use super::semaphore::Semaphore;
use crate::arch::Arch;
use crate::mem::ArcLite;
use crate::sched;
use crate::thread::Thread;

extern crate alloc;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::marker::PhantomData;

struct WaiterSlot<A: Arch> {
    sema: Semaphore<A>,
    thread: ArcLite<Thread<A>>,
}

/// A Mesa-semantics condition variable, always used together with a
/// [`Lock`] the caller already holds.
pub struct Condvar<A: Arch> {
    waiters: spin::Mutex<VecDeque<Arc<WaiterSlot<A>>>>,
    _arch: PhantomData<A>,
}

impl<A: Arch + 'static> Condvar<A> {
    pub fn new() -> Self {
        Self {
            waiters: spin::Mutex::new(VecDeque::new()),
            _arch: PhantomData,
        }
    }

    /// `cond_wait`: atomically release `lock` and block, then reacquire
    /// `lock` before returning. The caller must recheck its predicate
    /// after this returns, since a wake is only a hint that the condition
    /// *may* now hold.
    pub fn wait(&self, lock: &Lock<A>) {
        debug_assert!(lock.is_held_by_current(), "cond_wait called without holding the lock");
        let cur = sched::current::<A>().expect("cond_wait called before start()");
        let slot = Arc::new(WaiterSlot {
            sema: Semaphore::new(0),
            thread: cur,
        });
        self.waiters.lock().push_back(slot.clone());

        lock.release();
        slot.sema.down();
        lock.acquire();
    }

    /// `cond_signal`: wake the single highest-effective-priority waiter,
    /// if any.
    pub fn signal(&self, lock: &Lock<A>) {
        debug_assert!(lock.is_held_by_current(), "cond_signal called without holding the lock");
        let woken = pop_highest_priority(&mut self.waiters.lock());
        if let Some(slot) = woken {
            slot.sema.up();
        }
    }

    /// `cond_broadcast`: wake every current waiter.
    pub fn broadcast(&self, lock: &Lock<A>) {
        debug_assert!(lock.is_held_by_current(), "cond_broadcast called without holding the lock");
        loop {
            let woken = pop_highest_priority(&mut self.waiters.lock());
            match woken {
                Some(slot) => slot.sema.up(),
                None => break,
            }
        }
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl<A: Arch + 'static> Default for Condvar<A> {
    fn default() -> Self {
        Self::new()
    }
}

fn pop_highest_priority<A: Arch>(waiters: &mut VecDeque<Arc<WaiterSlot<A>>>) -> Option<Arc<WaiterSlot<A>>> {
    if waiters.is_empty() {
        return None;
    }
    let mut best_idx = 0;
    let mut best_prio = waiters[0].thread.effective_priority();
    for (i, slot) in waiters.iter().enumerate().skip(1) {
        if slot.thread.effective_priority() > best_prio {
            best_prio = slot.thread.effective_priority();
            best_idx = i;
        }
    }
    waiters.remove(best_idx)
}

#[cfg(test)]
mod tests {
    extern crate alloc;

    use super::*;
    use crate::arch::NoOpArch;
    use crate::mem::page::alloc_page;
    use crate::sched::{self, test_support::exclusive, Policy};
    use alloc::boxed::Box;
    use alloc::string::String;

    #[test]
    fn signal_wakes_highest_priority_waiter_not_fifo() {
        exclusive(|| {
            sched::init::<NoOpArch>(Policy::Priority);
            let _ = sched::create::<NoOpArch>(String::from("runner"), 20, 0, Box::new(|| {}));
            sched::start::<NoOpArch>().unwrap();

            let cv = Condvar::<NoOpArch>::new();
            let low = Thread::<NoOpArch>::new(String::from("low"), 10, alloc_page(true).unwrap());
            let high = Thread::<NoOpArch>::new(String::from("high"), 40, alloc_page(true).unwrap());

            cv.waiters.lock().push_back(Arc::new(WaiterSlot {
                sema: Semaphore::new(0),
                thread: low.clone(),
            }));
            cv.waiters.lock().push_back(Arc::new(WaiterSlot {
                sema: Semaphore::new(0),
                thread: high.clone(),
            }));

            let woken = pop_highest_priority(&mut cv.waiters.lock()).unwrap();
            assert_eq!(woken.thread.id(), high.id());
            assert_eq!(cv.waiter_count(), 1);
        });
    }

    /// S4: three consumers (pri 20, 30, 25) wait on a condvar. Three
    /// `cond_signal`s must wake them in priority order: 30, 25, 20.
    #[test]
    fn scenario_s4_condvar_wakes_in_priority_order() {
        exclusive(|| {
            sched::init::<NoOpArch>(Policy::Priority);
            let _ = sched::create::<NoOpArch>(String::from("runner"), 20, 0, Box::new(|| {}));
            sched::start::<NoOpArch>().unwrap();

            let cv = Condvar::<NoOpArch>::new();
            let c20 = Thread::<NoOpArch>::new(String::from("c20"), 20, alloc_page(true).unwrap());
            let c30 = Thread::<NoOpArch>::new(String::from("c30"), 30, alloc_page(true).unwrap());
            let c25 = Thread::<NoOpArch>::new(String::from("c25"), 25, alloc_page(true).unwrap());

            for t in [&c20, &c30, &c25] {
                cv.waiters.lock().push_back(Arc::new(WaiterSlot {
                    sema: Semaphore::new(0),
                    thread: t.clone(),
                }));
            }

            let mut woken_order = alloc::vec::Vec::new();
            while let Some(slot) = pop_highest_priority(&mut cv.waiters.lock()) {
                woken_order.push(slot.thread.id());
            }

            assert_eq!(woken_order, alloc::vec![c30.id(), c25.id(), c20.id()]);
        });
    }

    /// Invariant 6: repeated broadcast on an empty waiter set is a no-op.
    #[test]
    fn broadcast_on_empty_waiters_is_noop() {
        exclusive(|| {
            sched::init::<NoOpArch>(Policy::Priority);
            let _ = sched::create::<NoOpArch>(String::from("runner"), 20, 0, Box::new(|| {}));
            sched::start::<NoOpArch>().unwrap();

            let lock = Lock::<NoOpArch>::new();
            let cv = Condvar::<NoOpArch>::new();
            assert!(lock.try_acquire());
            cv.broadcast(&lock);
            cv.broadcast(&lock);
            assert_eq!(cv.waiter_count(), 0);
        });
    }
}
