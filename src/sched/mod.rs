//! The single-CPU priority scheduler core.
//!
//! Holds one global ready list and drives it under two selectable
//! policies: strict priority with donation, or MLFQS. There is exactly one
//! logical CPU (no SMP, no per-CPU run queues, no work stealing); the
//! global list is protected by disabling interrupts for the duration of
//! any access, the same critical-section discipline the reference kernel
//! uses instead of a blocking lock (a scheduler cannot block waiting for
//! its own lock).
//!
//! The scheduler core manages thread control block bookkeeping only. It
//! does not itself invoke a spawned thread's entry closure — on real
//! hardware that happens in the architecture's first-run trampoline once
//! `context_switch` transfers control into a freshly created context. Under
//! `std-shim`, `context_switch` is a no-op, so tests drive scheduler state
//! the way a thread would drive it from the inside: by calling `block`,
//! `unblock`, and `exit` at the points a real thread body would.

pub mod mlfqs;

use crate::arch::{Arch, InterruptGuard};
use crate::errors::{MemoryError, ScheduleError, SpawnError, ThreadResult};
use crate::fixed_point::Fixed17_14;
use crate::mem::page::alloc_page;
use crate::mem::ArcLite;
use crate::thread::handle::JoinHandle;
use crate::thread::{Thread, ThreadId, ThreadState, NICE_DEFAULT, PRI_MAX, PRI_MIN};
use crate::time::TickCounter;
use portable_atomic::{AtomicBool, AtomicPtr, AtomicU8, Ordering};

extern crate alloc;
use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;

/// Scheduling policy selected at [`init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Strict priority scheduling with donation (the default).
    Priority,
    /// Multi-level feedback queue scheduling (`nice`/`recent_cpu`-driven).
    Mlfqs,
}

struct SchedCore<A: Arch> {
    all: spin::Mutex<Vec<ArcLite<Thread<A>>>>,
    ready: spin::Mutex<VecDeque<ArcLite<Thread<A>>>>,
    current: spin::Mutex<Option<ArcLite<Thread<A>>>>,
    idle: spin::Mutex<Option<ArcLite<Thread<A>>>>,
    pending_entries: spin::Mutex<BTreeMap<u64, Box<dyn FnOnce() + Send>>>,
    ticks: TickCounter,
    slice_used: portable_atomic::AtomicU64,
    policy: AtomicU8,
    load_avg: spin::Mutex<Fixed17_14>,
    started: AtomicBool,
}

const POLICY_PRIORITY: u8 = 0;
const POLICY_MLFQS: u8 = 1;

impl<A: Arch> SchedCore<A> {
    fn new(policy: Policy) -> Self {
        Self {
            all: spin::Mutex::new(Vec::new()),
            ready: spin::Mutex::new(VecDeque::new()),
            current: spin::Mutex::new(None),
            idle: spin::Mutex::new(None),
            pending_entries: spin::Mutex::new(BTreeMap::new()),
            ticks: TickCounter::new(),
            slice_used: portable_atomic::AtomicU64::new(0),
            policy: AtomicU8::new(match policy {
                Policy::Priority => POLICY_PRIORITY,
                Policy::Mlfqs => POLICY_MLFQS,
            }),
            load_avg: spin::Mutex::new(Fixed17_14::ZERO),
            started: AtomicBool::new(false),
        }
    }

    fn policy(&self) -> Policy {
        if self.policy.load(Ordering::Acquire) == POLICY_MLFQS {
            Policy::Mlfqs
        } else {
            Policy::Priority
        }
    }
}

static GLOBAL: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

fn global<A: Arch>() -> &'static SchedCore<A> {
    let ptr = GLOBAL.load(Ordering::Acquire) as *const SchedCore<A>;
    assert!(!ptr.is_null(), "scheduler not initialized: call sched::init() first");
    unsafe { &*ptr }
}

/// Initialize the global scheduler with the given policy. Must be called
/// exactly once, before any thread is created.
pub fn init<A: Arch + 'static>(policy: Policy) {
    let core = Box::leak(Box::new(SchedCore::<A>::new(policy)));
    let prev = GLOBAL.swap(core as *mut SchedCore<A> as *mut (), Ordering::AcqRel);
    assert!(prev.is_null(), "scheduler already initialized");

    let idle = Thread::<A>::new(String::from("idle"), PRI_MIN, alloc_page(true).expect("idle page"));
    idle.set_state(ThreadState::Blocked);
    {
        let mut ctx = idle.context.lock();
        A::init_context(&mut ctx, idle_loop::<A> as usize, idle.stack_top, 0);
    }
    *core.idle.lock() = Some(idle.clone());
    core.all.lock().push(idle);
}

/// The idle thread's body: enable interrupts and wait for one, forever.
/// Only ever entered on real hardware when no other thread is ready.
extern "C" fn idle_loop<A: Arch + 'static>(_arg: u64) -> ! {
    A::enable_interrupts();
    loop {
        core::hint::spin_loop();
    }
}

/// Start the scheduler: the highest-priority ready thread (or the idle
/// thread, if none) becomes current. Must be called exactly once, after
/// [`init`] and any initial [`create`] calls.
pub fn start<A: Arch + 'static>() -> ThreadResult<()> {
    let core = global::<A>();
    if core.started.swap(true, Ordering::AcqRel) {
        return Err(ScheduleError::AlreadyStarted.into());
    }

    let first = pop_highest_priority(&mut core.ready.lock())
        .unwrap_or_else(|| core.idle.lock().clone().expect("idle thread always present"));
    first.set_state(ThreadState::Running);
    let first_ctx_ptr = {
        let guard = first.context.lock();
        &*guard as *const A::SavedContext
    };
    *core.current.lock() = Some(first);

    // The caller's own stack is not a thread context worth preserving; the
    // switch discards `dummy` and never returns here on real hardware.
    let mut dummy = A::SavedContext::default();
    unsafe {
        A::context_switch(&mut dummy as *mut A::SavedContext, first_ctx_ptr);
    }
    Ok(())
}

/// Spawn a new thread. The entry closure is stored for the architecture's
/// first-run trampoline to invoke; the scheduler core never calls it
/// directly.
pub fn create<A: Arch + 'static>(
    name: String,
    priority: u8,
    nice: i32,
    entry: Box<dyn FnOnce() + Send>,
) -> ThreadResult<JoinHandle<A>> {
    if priority > PRI_MAX {
        return Err(SpawnError::InvalidPriority(priority).into());
    }
    let core = global::<A>();
    let page = alloc_page(true).ok_or(SpawnError::OutOfMemory)?;
    let thread = Thread::<A>::new(name, priority, page);
    thread.set_nice(nice);
    if core.policy() == Policy::Mlfqs {
        let parent_recent_cpu = current::<A>().map(|t| t.recent_cpu()).unwrap_or(Fixed17_14::ZERO);
        thread.set_recent_cpu(parent_recent_cpu);
        let p = mlfqs::priority_for(thread.recent_cpu(), thread.nice());
        thread.set_effective_priority(p);
        thread.set_base_priority(p);
    }

    core.pending_entries.lock().insert(thread.id().as_u64(), entry);
    core.all.lock().push(thread.clone());

    {
        let mut ctx = thread.context.lock();
        A::init_context(
            &mut ctx,
            thread_trampoline::<A> as usize,
            thread.stack_top,
            thread.id().as_u64() as usize,
        );
    }

    unblock::<A>(thread.clone());

    Ok(JoinHandle::new(thread))
}

/// The calling thread's entry closure, taken once so the architecture
/// trampoline can run it exactly once.
pub fn take_entry<A: Arch + 'static>(id: ThreadId) -> Option<Box<dyn FnOnce() + Send>> {
    global::<A>().pending_entries.lock().remove(&id.as_u64())
}

/// First-run shim for a freshly created thread. Lands here on the first
/// `context_switch` into a new context: enables interrupts, runs the
/// thread's entry closure exactly once, then exits. Never invoked by the
/// scheduler core directly — only reached by the architecture's own
/// restore-context sequence jumping to the program counter [`create`]
/// wrote into the thread's initial context.
extern "C" fn thread_trampoline<A: Arch + 'static>(id_raw: u64) -> ! {
    A::enable_interrupts();
    if let Some(entry) = take_entry::<A>(ThreadId::from_u64(id_raw)) {
        entry();
    }
    exit::<A>()
}

/// The currently running thread, or `None` before [`start`] has run.
///
/// Checks the thread's stack-overflow canary on every call: a descending
/// stack that has grown into its own TCB corrupts `magic` before anything
/// else live, so this is where that corruption is first observable.
pub fn current<A: Arch + 'static>() -> Option<ArcLite<Thread<A>>> {
    let cur = global::<A>().current.lock().clone();
    if let Some(t) = &cur {
        assert!(!t.check_stack_overflow(), "{}", MemoryError::StackOverflow);
    }
    cur
}

/// True if the currently running thread is the idle thread.
pub fn is_idle<A: Arch + 'static>() -> bool {
    let core = global::<A>();
    match (core.current.lock().as_ref(), core.idle.lock().as_ref()) {
        (Some(cur), Some(idle)) => cur.id() == idle.id(),
        _ => false,
    }
}

/// Visit every thread known to the scheduler (its `all_list`).
pub fn foreach<A: Arch + 'static, F: FnMut(&ArcLite<Thread<A>>)>(mut f: F) {
    for t in global::<A>().all.lock().iter() {
        f(t);
    }
}

fn pop_highest_priority<A: Arch>(ready: &mut VecDeque<ArcLite<Thread<A>>>) -> Option<ArcLite<Thread<A>>> {
    if ready.is_empty() {
        return None;
    }
    let mut best_idx = 0;
    let mut best_prio = ready[0].effective_priority();
    for (i, t) in ready.iter().enumerate().skip(1) {
        if t.effective_priority() > best_prio {
            best_prio = t.effective_priority();
            best_idx = i;
        }
    }
    ready.remove(best_idx)
}

/// Highest effective priority currently waiting in the ready list, without
/// removing anything. Used by donation/wake logic to decide whether to
/// preempt.
fn highest_ready_priority<A: Arch>(core: &SchedCore<A>) -> Option<u8> {
    core.ready.lock().iter().map(|t| t.effective_priority()).max()
}

/// If `candidate` (just made ready) outranks the current thread, yield:
/// immediately if not in interrupt context, deferred otherwise.
fn maybe_preempt<A: Arch>(candidate: &ArcLite<Thread<A>>) {
    let core = global::<A>();
    if !core.started.load(Ordering::Acquire) {
        return;
    }
    let outranks_current = core
        .current
        .lock()
        .as_ref()
        .map(|cur| candidate.effective_priority() > cur.effective_priority())
        .unwrap_or(false);
    if outranks_current {
        if A::in_interrupt_context() {
            A::yield_on_return();
        } else {
            yield_now::<A>();
        }
    }
}

/// Voluntarily give up the CPU. The calling thread stays `Ready` and is
/// re-queued at the back of its priority band.
pub fn yield_now<A: Arch + 'static>() {
    let core = global::<A>();
    let cur = match core.current.lock().clone() {
        Some(c) => c,
        None => return,
    };
    cur.set_state(ThreadState::Ready);
    {
        let _g = InterruptGuard::<A>::new();
        core.ready.lock().push_back(cur);
    }
    schedule::<A>();
}

/// Block the calling thread. The caller is responsible for having already
/// recorded *why* it is blocked (e.g. on a semaphore's waiter list) before
/// calling this — once it returns, the thread has been rescheduled in.
pub fn block_current<A: Arch + 'static>() {
    let core = global::<A>();
    let cur = match core.current.lock().clone() {
        Some(c) => c,
        None => return,
    };
    debug_assert!(cur.state() == ThreadState::Running, "block called on a thread that is not RUNNING");
    cur.set_state(ThreadState::Blocked);
    schedule::<A>();
}

/// Move a blocked thread back to the ready list. Does not itself yield;
/// callers decide whether the newly-ready thread should preempt.
pub fn unblock<A: Arch + 'static>(thread: ArcLite<Thread<A>>) {
    debug_assert!(thread.state() == ThreadState::Blocked, "unblock called on a thread that is not BLOCKED");
    let core = global::<A>();
    {
        let _g = InterruptGuard::<A>::new();
        thread.set_state(ThreadState::Ready);
        core.ready.lock().push_back(thread.clone());
    }
    maybe_preempt::<A>(&thread);
}

/// Terminate the calling thread. Never returns.
pub fn exit<A: Arch + 'static>() -> ! {
    let core = global::<A>();
    let cur = core.current.lock().clone().expect("exit called with no current thread");
    cur.set_state(ThreadState::Dying);
    core.all.lock().retain(|t| t.id() != cur.id());
    schedule::<A>();
    unreachable!("a dying thread must never be rescheduled")
}

/// Context-switch into the next thread to run, chosen by the active
/// policy. Assumes the current thread's state has already been updated by
/// the caller (`Ready`, `Blocked`, or `Dying`).
fn schedule<A: Arch + 'static>() {
    let core = global::<A>();
    let _g = InterruptGuard::<A>::new();

    let next = pop_highest_priority(&mut core.ready.lock())
        .unwrap_or_else(|| core.idle.lock().clone().expect("idle thread always present"));
    next.set_state(ThreadState::Running);

    let prev = core.current.lock().replace(next.clone());

    if let Some(prev) = prev {
        if prev.id() != next.id() {
            unsafe {
                let prev_ctx_ptr = {
                    let guard = prev.context.lock();
                    &*guard as *const A::SavedContext as *mut A::SavedContext
                };
                let next_ctx_ptr = {
                    let guard = next.context.lock();
                    &*guard as *const A::SavedContext
                };
                A::context_switch(prev_ctx_ptr, next_ctx_ptr);
            }
        }
    }
}

/// Advance the tick counter by one. Called from the timer interrupt
/// handler; `in_interrupt_context()` must already be `true` when this
/// runs. Recomputes MLFQS accounting on schedule and arms a deferred
/// yield if the current thread's quantum has expired or a higher-priority
/// ready thread now exists.
pub fn on_timer_tick<A: Arch + 'static>() {
    let core = global::<A>();
    if !core.started.load(Ordering::Acquire) {
        core.ticks.advance();
        return;
    }
    let ticks = core.ticks.advance();
    let used = core.slice_used.fetch_add(1, Ordering::AcqRel) + 1;

    if core.policy() == Policy::Mlfqs {
        mlfqs::on_tick(core, ticks);
    }

    let current_prio = core.current.lock().as_ref().map(|c| c.effective_priority());
    let should_preempt = match (current_prio, highest_ready_priority(core)) {
        (Some(cur), Some(best)) => best > cur || (best == cur && used >= crate::time::TIME_SLICE_TICKS),
        _ => false,
    };

    if should_preempt {
        core.slice_used.store(0, Ordering::Release);
        A::yield_on_return();
    }
}

/// Set the calling thread's base priority. Under strict priority
/// scheduling, if the thread is not currently donated-to, the effective
/// priority follows immediately; a lower new priority may cause an
/// immediate yield if a higher-priority thread is now ready.
pub fn set_priority<A: Arch + 'static>(priority: u8) {
    let core = global::<A>();
    let cur = current::<A>().expect("set_priority called before start()");
    cur.set_base_priority(priority);
    if !cur.is_donee() {
        cur.set_effective_priority(priority);
    }
    if let Some(best) = highest_ready_priority(core) {
        if best > cur.effective_priority() {
            yield_now::<A>();
        }
    }
}

pub fn get_priority<A: Arch + 'static>() -> u8 {
    current::<A>().map(|t| t.effective_priority()).unwrap_or(0)
}

pub fn set_nice<A: Arch + 'static>(nice: i32) {
    let cur = current::<A>().expect("set_nice called before start()");
    cur.set_nice(nice);
    let new_prio = mlfqs::priority_for(cur.recent_cpu(), cur.nice());
    cur.set_effective_priority(new_prio);
    cur.set_base_priority(new_prio);
    let core = global::<A>();
    if let Some(best) = highest_ready_priority(core) {
        if best > cur.effective_priority() {
            yield_now::<A>();
        }
    }
}

pub fn get_nice<A: Arch + 'static>() -> i32 {
    current::<A>().map(|t| t.nice()).unwrap_or(NICE_DEFAULT)
}

/// `100 * load_avg`, matching the reference kernel's reporting convention.
pub fn get_load_avg<A: Arch + 'static>() -> i32 {
    global::<A>().load_avg.lock().mul_int(100).to_int_round()
}

/// `100 * recent_cpu` for the calling thread.
pub fn get_recent_cpu<A: Arch + 'static>() -> i32 {
    current::<A>()
        .map(|t| t.recent_cpu().mul_int(100).to_int_round())
        .unwrap_or(0)
}

pub(crate) fn load_avg_cell<A: Arch>(core: &SchedCore<A>) -> &spin::Mutex<Fixed17_14> {
    &core.load_avg
}

pub(crate) fn all_threads<A: Arch>(core: &SchedCore<A>) -> Vec<ArcLite<Thread<A>>> {
    core.all.lock().clone()
}

pub(crate) fn ready_len<A: Arch>(core: &SchedCore<A>) -> usize {
    core.ready.lock().len()
}

/// Recheck whether `thread` now outranks the running thread after its
/// effective priority changed (donation or a nice change), without going
/// through the ready list.
pub(crate) fn preempt_if_outranked<A: Arch + 'static>(thread: &ArcLite<Thread<A>>) {
    maybe_preempt::<A>(thread);
}

/// Test-only support for exercising the global scheduler singleton.
///
/// `cargo test` runs `#[test]` functions concurrently on separate OS
/// threads within one process, but `GLOBAL` is a single process-wide
/// static, so any test touching the scheduler must run exclusively of
/// every other such test. `exclusive` holds a lock for the duration of
/// the closure and resets `GLOBAL` to uninitialized before running it.
#[cfg(test)]
pub(crate) mod test_support {
    use super::{Ordering, GLOBAL};

    static TEST_LOCK: spin::Mutex<()> = spin::Mutex::new(());

    pub fn exclusive<R>(f: impl FnOnce() -> R) -> R {
        let _guard = TEST_LOCK.lock();
        GLOBAL.store(core::ptr::null_mut(), Ordering::Release);
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::exclusive;
    use super::*;
    use crate::arch::NoOpArch;

    #[test]
    fn init_start_and_single_thread_runs() {
        exclusive(|| {
            init::<NoOpArch>(Policy::Priority);
            start::<NoOpArch>().unwrap();
            assert!(is_idle::<NoOpArch>());
        });
    }

    #[test]
    fn higher_priority_thread_runs_first() {
        exclusive(|| {
            init::<NoOpArch>(Policy::Priority);
            let low = create::<NoOpArch>(String::from("low"), 10, 0, Box::new(|| {})).unwrap();
            let high = create::<NoOpArch>(String::from("high"), 50, 0, Box::new(|| {})).unwrap();
            start::<NoOpArch>().unwrap();
            let cur = current::<NoOpArch>().unwrap();
            assert_eq!(cur.id(), high.thread_id());
            assert_ne!(cur.id(), low.thread_id());
        });
    }

    #[test]
    fn yield_requeues_at_back_of_same_priority_band() {
        exclusive(|| {
            init::<NoOpArch>(Policy::Priority);
            let a = create::<NoOpArch>(String::from("a"), 20, 0, Box::new(|| {})).unwrap();
            let _b = create::<NoOpArch>(String::from("b"), 20, 0, Box::new(|| {})).unwrap();
            start::<NoOpArch>().unwrap();
            let first = current::<NoOpArch>().unwrap().id();
            yield_now::<NoOpArch>();
            let second = current::<NoOpArch>().unwrap().id();
            assert_ne!(first, second);
            let _ = a;
        });
    }

    /// S1: threads A(31), B(32), C(30) created before `start()`; each
    /// "finishes" in turn (simulated by `block_current`, standing in for
    /// a thread that ran once and parked). Execution order must be B, A, C.
    #[test]
    fn scenario_s1_basic_priority_order() {
        exclusive(|| {
            init::<NoOpArch>(Policy::Priority);
            let _a = create::<NoOpArch>(String::from("A"), 31, 0, Box::new(|| {})).unwrap();
            let _b = create::<NoOpArch>(String::from("B"), 32, 0, Box::new(|| {})).unwrap();
            let _c = create::<NoOpArch>(String::from("C"), 30, 0, Box::new(|| {})).unwrap();
            start::<NoOpArch>().unwrap();

            let mut order = Vec::new();
            loop {
                if is_idle::<NoOpArch>() {
                    break;
                }
                order.push(String::from(current::<NoOpArch>().unwrap().name()));
                block_current::<NoOpArch>();
            }

            assert_eq!(order, alloc::vec![String::from("B"), String::from("A"), String::from("C")]);
        });
    }
}
