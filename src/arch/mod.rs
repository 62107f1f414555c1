//! Architecture abstraction layer for context switching and interrupt control.
//!
//! This module provides the unified interface the scheduler core drives:
//! an opaque context switch, and the interrupt-control primitives the
//! scheduler needs to build critical sections and to know whether it is
//! currently running on behalf of an interrupt.

pub mod barriers;
pub mod detection;

/// Architecture abstraction trait.
///
/// Implementations involve direct hardware manipulation and inline assembly.
/// All `unsafe` methods have preconditions that must be upheld by the caller.
pub trait Arch {
    /// Architecture-specific saved context type.
    ///
    /// Must contain all CPU registers and state needed to fully restore a
    /// thread's execution context. Treated as opaque by the scheduler core.
    type SavedContext: Send + Sync + Default;

    /// Switch from one thread context to another.
    ///
    /// # Safety
    ///
    /// - `prev` must point to a valid, properly aligned `SavedContext`
    /// - `next` must point to a valid, properly aligned `SavedContext`
    /// - Both pointers must remain valid for the duration of this call
    /// - Must be called with interrupts disabled
    /// - The `next` context must represent a valid execution state
    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext);

    /// Prepare a freshly allocated context so that the first
    /// [`Arch::context_switch`] into it lands in `entry_point` with `arg`
    /// in the architecture's first argument-passing register and the
    /// stack pointer set to `stack_top`. Used once, at thread creation.
    fn init_context(ctx: &mut Self::SavedContext, entry_point: usize, stack_top: usize, arg: usize);

    /// Enable interrupts on the current CPU.
    fn enable_interrupts();

    /// Disable interrupts on the current CPU.
    fn disable_interrupts();

    /// Check if interrupts are currently enabled.
    fn interrupts_enabled() -> bool;

    /// Disable interrupts and return the previous level, for nestable
    /// critical sections. Paired with [`Arch::set_level`].
    fn disable() -> bool {
        let prev = Self::interrupts_enabled();
        Self::disable_interrupts();
        prev
    }

    /// Restore an interrupt level previously returned by [`Arch::disable`].
    fn set_level(prev_enabled: bool) {
        if prev_enabled {
            Self::enable_interrupts();
        } else {
            Self::disable_interrupts();
        }
    }

    /// True if the caller is running in interrupt (timer/IRQ handler)
    /// context. The scheduler uses this to decide whether a blocking or
    /// yielding operation is legal (it is never legal from interrupt
    /// context) and whether `sema_up`'s trailing yield should be deferred.
    fn in_interrupt_context() -> bool {
        irq_state::depth() > 0
    }

    /// Arm a deferred yield to run once the current interrupt handler
    /// returns, instead of yielding immediately (which would be unsound
    /// from interrupt context).
    fn yield_on_return() {
        irq_state::request_yield();
    }
}

/// Interrupt-nesting and deferred-yield bookkeeping shared by every
/// architecture backend. This is pure accounting, not hardware state, so it
/// lives once here instead of being duplicated per backend.
pub mod irq_state {
    use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

    static DEPTH: AtomicUsize = AtomicUsize::new(0);
    static YIELD_PENDING: AtomicBool = AtomicBool::new(false);

    /// Called by an interrupt entry trampoline before running handler code.
    pub fn enter() {
        DEPTH.fetch_add(1, Ordering::AcqRel);
    }

    /// Called by an interrupt entry trampoline after handler code returns.
    /// Returns whether a deferred yield was requested during the handler.
    pub fn leave() -> bool {
        DEPTH.fetch_sub(1, Ordering::AcqRel);
        YIELD_PENDING.swap(false, Ordering::AcqRel)
    }

    /// Current interrupt nesting depth.
    pub fn depth() -> usize {
        DEPTH.load(Ordering::Acquire)
    }

    pub(crate) fn request_yield() {
        YIELD_PENDING.store(true, Ordering::Release);
    }
}

/// RAII interrupt-disable guard.
///
/// Disables interrupts on construction and restores whatever level was in
/// effect beforehand on drop, so nested guards compose correctly: an inner
/// guard's drop never re-enables interrupts an outer guard is still relying
/// on being off.
pub struct InterruptGuard<A: Arch> {
    prev_enabled: bool,
    _arch: core::marker::PhantomData<A>,
}

impl<A: Arch> InterruptGuard<A> {
    /// Disable interrupts, remembering the previous level.
    pub fn new() -> Self {
        Self {
            prev_enabled: A::disable(),
            _arch: core::marker::PhantomData,
        }
    }
}

impl<A: Arch> Default for InterruptGuard<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Arch> Drop for InterruptGuard<A> {
    fn drop(&mut self) {
        A::set_level(self.prev_enabled);
    }
}

/// A no-op architecture implementation for testing and fallback purposes.
pub struct NoOpArch;

impl Arch for NoOpArch {
    type SavedContext = ();

    unsafe fn context_switch(_prev: *mut Self::SavedContext, _next: *const Self::SavedContext) {}

    fn init_context(_ctx: &mut Self::SavedContext, _entry_point: usize, _stack_top: usize, _arg: usize) {}

    fn enable_interrupts() {}

    fn disable_interrupts() {}

    fn interrupts_enabled() -> bool {
        true
    }
}

// Raspberry Pi Zero 2 W - ARM64 only
#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(not(target_arch = "aarch64"))]
#[path = "aarch64_stub.rs"]
pub mod aarch64;

// RPi Zero 2 W specific hardware support
#[cfg(target_arch = "aarch64")]
pub mod aarch64_gic;
#[cfg(target_arch = "aarch64")]
pub mod aarch64_vectors;
#[cfg(target_arch = "aarch64")]
pub mod aarch64_boot;

// Always use AArch64 - single target (Raspberry Pi Zero 2 W)
#[cfg(target_arch = "aarch64")]
pub use aarch64::Aarch64Arch as DefaultArch;

// For testing/std-shim on non-aarch64 hosts
#[cfg(all(not(target_arch = "aarch64"), feature = "std-shim"))]
pub use aarch64::Aarch64Arch as DefaultArch;

// Compile error for unsupported configurations
#[cfg(all(not(target_arch = "aarch64"), not(feature = "std-shim")))]
compile_error!("This library only supports Raspberry Pi Zero 2 W (aarch64). Use --target aarch64-unknown-none or enable std-shim feature for testing.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_previously_disabled_level() {
        NoOpArch::disable_interrupts();
        {
            let _g = InterruptGuard::<NoOpArch>::new();
            assert!(!NoOpArch::interrupts_enabled());
        }
        NoOpArch::enable_interrupts();
    }

    #[test]
    fn irq_state_tracks_nesting_and_deferred_yield() {
        assert_eq!(irq_state::depth(), 0);
        irq_state::enter();
        assert_eq!(irq_state::depth(), 1);
        irq_state::request_yield();
        let pending = irq_state::leave();
        assert!(pending);
        assert_eq!(irq_state::depth(), 0);
    }
}
