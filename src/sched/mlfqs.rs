//! Multi-level feedback queue scheduling: `nice`/`recent_cpu`/`load_avg`
//! accounting, all done in 17.14 fixed point per the reference formulas.
//!
//! - `recent_cpu` advances by one fixed-point unit every tick the owning
//!   thread spends running, and decays once a second by a factor driven by
//!   system load.
//! - `load_avg` is itself a once-a-second exponentially weighted moving
//!   average of the ready-queue length (including the running thread,
//!   excluding the idle thread).
//! - `priority` is recomputed every four ticks from `recent_cpu` and
//!   `nice`: `PRI_MAX - (recent_cpu / 4) - (nice * 2)`, clamped to the
//!   legal priority range.

use super::SchedCore;
use crate::arch::Arch;
use crate::fixed_point::Fixed17_14;
use crate::thread::{ThreadState, PRI_MAX, PRI_MIN};
use crate::time::{LOAD_AVG_RECOMPUTE_TICKS, PRIORITY_RECOMPUTE_TICKS};

/// Compute the MLFQS priority for a given `recent_cpu`/`nice` pair.
pub fn priority_for(recent_cpu: Fixed17_14, nice: i32) -> u8 {
    let raw = Fixed17_14::from_int(PRI_MAX as i32) - recent_cpu.div_int(4) - Fixed17_14::from_int(nice * 2);
    raw.to_int_round().clamp(PRI_MIN as i32, PRI_MAX as i32) as u8
}

/// Run once per timer tick while MLFQS is the active policy.
pub(crate) fn on_tick<A: Arch + 'static>(core: &SchedCore<A>, ticks: u64) {
    if let Some(cur) = core.current.lock().as_ref() {
        let is_idle = core
            .idle
            .lock()
            .as_ref()
            .map(|idle| idle.id() == cur.id())
            .unwrap_or(false);
        if !is_idle {
            cur.set_recent_cpu(cur.recent_cpu() + Fixed17_14::from_int(1));
        }
    }

    if ticks % LOAD_AVG_RECOMPUTE_TICKS == 0 {
        recompute_load_avg(core);
        for t in core.all.lock().iter() {
            let new_cpu = recompute_recent_cpu(t.recent_cpu(), t.nice(), *core.load_avg.lock());
            t.set_recent_cpu(new_cpu);
        }
    }

    if ticks % PRIORITY_RECOMPUTE_TICKS == 0 {
        for t in core.all.lock().iter() {
            if t.state() == ThreadState::Dying {
                continue;
            }
            let p = priority_for(t.recent_cpu(), t.nice());
            t.set_base_priority(p);
            t.set_effective_priority(p);
        }
    }
}

fn recompute_load_avg<A: Arch>(core: &SchedCore<A>) {
    let ready_count = core.ready.lock().len();
    let current_counts = core
        .current
        .lock()
        .as_ref()
        .map(|cur| {
            let is_idle = core
                .idle
                .lock()
                .as_ref()
                .map(|idle| idle.id() == cur.id())
                .unwrap_or(false);
            !is_idle
        })
        .unwrap_or(false);
    let runnable = ready_count + if current_counts { 1 } else { 0 };

    let fifty_nine_sixtieths = Fixed17_14::from_int(59).div(Fixed17_14::from_int(60));
    let one_sixtieth = Fixed17_14::from_int(1).div(Fixed17_14::from_int(60));

    let mut load_avg = core.load_avg.lock();
    *load_avg = fifty_nine_sixtieths.mul(*load_avg) + one_sixtieth.mul_int(runnable as i32);
}

fn recompute_recent_cpu(recent_cpu: Fixed17_14, nice: i32, load_avg: Fixed17_14) -> Fixed17_14 {
    let two_load_avg = load_avg.mul_int(2);
    let coefficient = two_load_avg.div(two_load_avg + Fixed17_14::from_int(1));
    coefficient.mul(recent_cpu) + Fixed17_14::from_int(nice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_thread_priority_is_pri_max_at_zero_cpu_and_nice() {
        assert_eq!(priority_for(Fixed17_14::ZERO, 0), PRI_MAX);
    }

    #[test]
    fn higher_nice_lowers_priority() {
        let base = priority_for(Fixed17_14::ZERO, 0);
        let niced = priority_for(Fixed17_14::ZERO, 10);
        assert!(niced < base);
    }

    #[test]
    fn recent_cpu_decay_reduces_value_with_nonzero_load() {
        let recent_cpu = Fixed17_14::from_int(100);
        let load_avg = Fixed17_14::from_int(1);
        let decayed = recompute_recent_cpu(recent_cpu, 0, load_avg);
        assert!(decayed.to_int_trunc() < 100);
    }

    /// S5: a thread with `nice = +10` never outranks an otherwise-identical
    /// `nice = 0` thread, for any `recent_cpu` history the two might
    /// accumulate. Since the scheduler always runs the highest-priority
    /// ready thread, this is what guarantees the niced thread accumulates
    /// strictly less CPU over any busy window.
    #[test]
    fn niced_thread_never_outranks_default_nice_thread() {
        let mut cpu = Fixed17_14::ZERO;
        for _ in 0..200 {
            let base = priority_for(cpu, 0);
            let niced = priority_for(cpu, 10);
            assert!(niced <= base);
            cpu = cpu + Fixed17_14::from_int(1);
        }
    }

    /// S6: with one runnable thread every tick, `load_avg` rises toward 1.0
    /// under the `59/60` EWMA; with none, it decays back toward 0.
    #[test]
    fn load_avg_converges_toward_runnable_count() {
        let mut load_avg = Fixed17_14::ZERO;
        let fifty_nine_sixtieths = Fixed17_14::from_int(59).div(Fixed17_14::from_int(60));
        let one_sixtieth = Fixed17_14::from_int(1).div(Fixed17_14::from_int(60));

        for _ in 0..2000 {
            load_avg = fifty_nine_sixtieths.mul(load_avg) + one_sixtieth.mul_int(1);
        }
        let near_one = (load_avg - Fixed17_14::from_int(1)).to_int_trunc().abs();
        assert!(near_one <= 1, "load_avg should converge near 1.0, got {:?}", load_avg);

        for _ in 0..2000 {
            load_avg = fifty_nine_sixtieths.mul(load_avg) + one_sixtieth.mul_int(0);
        }
        assert!(load_avg.to_int_trunc() == 0, "load_avg should decay toward 0, got {:?}", load_avg);
    }
}
