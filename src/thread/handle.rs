//! Join handles for spawned threads.

use super::{Thread, ThreadId, ThreadState};
use crate::arch::Arch;
use crate::mem::ArcLite;

/// A handle to a spawned thread, allowing the spawner to wait for it to
/// finish.
pub struct JoinHandle<A: Arch> {
    pub(crate) inner: ArcLite<Thread<A>>,
}

impl<A: Arch> JoinHandle<A> {
    pub(crate) fn new(inner: ArcLite<Thread<A>>) -> Self {
        Self { inner }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.inner.id()
    }

    pub fn is_alive(&self) -> bool {
        self.inner.state() != ThreadState::Dying
    }

    /// Block the calling thread (cooperatively) until the joined thread
    /// reaches `Dying`.
    pub fn join(self) {
        while self.is_alive() {
            crate::sched::yield_now::<A>();
        }
    }

    /// Non-blocking poll: `true` once the joined thread has finished.
    pub fn try_join(&self) -> bool {
        !self.is_alive()
    }
}

unsafe impl<A: Arch> Send for JoinHandle<A> {}
unsafe impl<A: Arch> Sync for JoinHandle<A> {}
