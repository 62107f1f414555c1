//! Time: monotonic instants and the scheduler's tick counter.
//!
//! The scheduler does not use a CFS-style virtual runtime; it follows the
//! reference kernel's simpler model of a global tick counter advanced once
//! per timer interrupt, with `TIME_SLICE_TICKS` ticks per quantum
//! regardless of priority (priority decides *which* thread runs next, not
//! *how long* its slice is).

use portable_atomic::{AtomicU64, Ordering};

/// Timer interrupt frequency in Hz. The reference kernel's `TIMER_FREQ`.
pub const TIMER_FREQUENCY_HZ: u32 = 100;

/// Ticks per scheduling quantum before a round-robin peer of equal
/// priority preempts the running thread.
pub const TIME_SLICE_TICKS: u64 = 4;

/// Number of ticks between MLFQS `load_avg`/`recent_cpu` recomputation,
/// once per second of wall-clock time.
pub const LOAD_AVG_RECOMPUTE_TICKS: u64 = TIMER_FREQUENCY_HZ as u64;

/// Number of ticks between MLFQS priority recomputation for all threads.
pub const PRIORITY_RECOMPUTE_TICKS: u64 = 4;

/// The scheduler's global tick counter, advanced once per timer interrupt.
#[derive(Default)]
pub struct TickCounter {
    ticks: AtomicU64,
}

impl TickCounter {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
        }
    }

    /// Advance by one tick, returning the new value.
    pub fn advance(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn get(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }
}

/// Nanoseconds since some arbitrary epoch.
///
/// The actual epoch is implementation-defined and may vary between
/// architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(u64);

impl Instant {
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    /// Read the current instant.
    ///
    /// On AArch64 this reads the ARM Generic Timer; on other hosts (under
    /// `std-shim`) there is no wall clock to read, so callers should not
    /// depend on `now()` advancing and should drive timing through
    /// [`TickCounter`] instead.
    pub fn now() -> Self {
        #[cfg(target_arch = "aarch64")]
        {
            let cnt: u64;
            let freq: u64;
            unsafe {
                core::arch::asm!(
                    "mrs {}, cntpct_el0",
                    out(reg) cnt,
                    options(nostack, nomem, preserves_flags)
                );
                core::arch::asm!(
                    "mrs {}, cntfrq_el0",
                    out(reg) freq,
                    options(nostack, nomem, preserves_flags)
                );
            }
            let nanos = if freq > 0 {
                ((cnt as u128 * 1_000_000_000) / freq as u128) as u64
            } else {
                0
            };
            Self(nanos)
        }

        #[cfg(not(target_arch = "aarch64"))]
        {
            Self(0)
        }
    }

    /// Duration elapsed since `earlier`.
    ///
    /// # Panics
    ///
    /// Panics if `earlier` is after `self`.
    pub fn duration_since(self, earlier: Instant) -> Duration {
        Duration::from_nanos(self.0 - earlier.0)
    }
}

impl core::ops::Add<Duration> for Instant {
    type Output = Self;

    fn add(self, duration: Duration) -> Self {
        Self(self.0 + duration.as_nanos())
    }
}

/// A duration of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(u64);

impl Duration {
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn from_micros(micros: u64) -> Self {
        Self(micros * 1_000)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_micros(self) -> u64 {
        self.0 / 1_000
    }

    pub fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_counter_advances_monotonically() {
        let t = TickCounter::new();
        assert_eq!(t.get(), 0);
        assert_eq!(t.advance(), 1);
        assert_eq!(t.advance(), 2);
        assert_eq!(t.get(), 2);
    }
}
