//! Stub implementation of AArch64 context switching for non-ARM64 targets.
//!
//! This module provides type-compatible stubs for testing on non-ARM64 hosts
//! (e.g., x86_64 macOS/Linux) under the `std-shim` feature. No actual context
//! switch occurs; interrupt enable state is tracked in a plain atomic so the
//! cooperative test harness can exercise `InterruptGuard` and
//! `in_interrupt_context()` faithfully.

use super::Arch;
use portable_atomic::{AtomicBool, Ordering};

/// Saved thread context for AArch64 (stub version).
#[repr(C)]
pub struct Aarch64Context {
    /// General-purpose registers x0-x30
    pub x: [u64; 31],
    /// Stack pointer
    pub sp: u64,
    /// Program counter
    pub pc: u64,
    /// Processor state register
    pub pstate: u64,
}

impl Default for Aarch64Context {
    fn default() -> Self {
        Self {
            x: [0; 31],
            sp: 0,
            pc: 0,
            pstate: 0x3c5,
        }
    }
}

unsafe impl Send for Aarch64Context {}
unsafe impl Sync for Aarch64Context {}

/// Stub alias for SavedContext compatibility.
pub type SavedContext = Aarch64Context;

static INTERRUPTS_ENABLED: AtomicBool = AtomicBool::new(true);

/// AArch64 architecture implementation (stub for testing).
pub struct Aarch64Arch;

impl Arch for Aarch64Arch {
    type SavedContext = Aarch64Context;

    unsafe fn context_switch(_prev: *mut Self::SavedContext, _next: *const Self::SavedContext) {
        // Stub - no actual context switch on non-ARM64
    }

    fn init_context(ctx: &mut Self::SavedContext, entry_point: usize, stack_top: usize, arg: usize) {
        ctx.x = [0; 31];
        ctx.x[0] = arg as u64;
        ctx.sp = stack_top as u64;
        ctx.pc = entry_point as u64;
        ctx.pstate = 0x3c5;
    }

    fn enable_interrupts() {
        INTERRUPTS_ENABLED.store(true, Ordering::Release);
    }

    fn disable_interrupts() {
        INTERRUPTS_ENABLED.store(false, Ordering::Release);
    }

    fn interrupts_enabled() -> bool {
        INTERRUPTS_ENABLED.load(Ordering::Acquire)
    }
}

/// Setup preemption timer (stub).
pub unsafe fn setup_preemption_timer(_interval_us: u64) -> Result<(), &'static str> {
    Ok(())
}

/// Timer interrupt handler (stub).
///
/// Drives the scheduler's tick accounting the same way the real AArch64
/// timer IRQ entry does, so `std-shim` tests can simulate preemption by
/// calling this directly instead of waiting on a real timer.
pub unsafe fn timer_interrupt_handler() {
    super::irq_state::enter();
    crate::sched::on_timer_tick::<Aarch64Arch>();
    if super::irq_state::leave() {
        crate::sched::yield_now::<Aarch64Arch>();
    }
}
