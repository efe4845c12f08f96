//! Sleep/wakeup rendezvous (spec.md §4.1) — the primitive every other
//! component blocks and resumes on.
//!
//! `wakeup`/`wakeup_one` are pure table scans and are fully unit-testable
//! on their own; `sleep` additionally has to release an external lock and
//! yield to the scheduler, so it lives in `proc::scheduler` where the
//! `Platform`/`Cpu` plumbing it needs is in scope. Keeping the "which
//! sleepers match" logic here (instead of folding it into the scheduler)
//! mirrors the teacher's split between `proc::scheduler::{sleep, wakeup}`
//! free functions and the table scan `Process::kill`/`wait_for_child`
//! perform inline.

use crate::{
    platform::Channel,
    proc::task::{TaskControlBlock, TaskState},
    sync::SpinMutex,
};

/// Promote every task sleeping on `chan` to `Runnable`. Must be called
/// without holding the current task's own lock (spec.md §4.1/§5).
pub fn wakeup<P: Copy + Eq, F: Copy + Eq, I: Copy + Eq>(
    table: &[SpinMutex<TaskControlBlock<P, F, I>>],
    chan: Channel,
) {
    for slot in table {
        let mut t = slot.lock();
        if t.is_sleeping_on(chan) {
            t.state = TaskState::Runnable;
            t.chan = None;
        }
    }
}

/// Promote the first task sleeping on `chan`, in table order, and stop.
/// Returns whether a sleeper was found.
pub fn wakeup_one<P: Copy + Eq, F: Copy + Eq, I: Copy + Eq>(
    table: &[SpinMutex<TaskControlBlock<P, F, I>>],
    chan: Channel,
) -> bool {
    for slot in table {
        let mut t = slot.lock();
        if t.is_sleeping_on(chan) {
            t.state = TaskState::Runnable;
            t.chan = None;
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestTcb = TaskControlBlock<u64, u64, u64>;

    fn table_of(n: usize) -> std::vec::Vec<SpinMutex<TestTcb>> {
        let mut v = std::vec::Vec::new();
        for _ in 0..n {
            v.push(SpinMutex::new(TestTcb::new()));
        }
        v
    }

    #[test]
    fn wakeup_promotes_all_matching_sleepers() {
        let table = table_of(4);
        table[0].lock().state = TaskState::Sleeping;
        table[0].lock().chan = Some(42);
        table[1].lock().state = TaskState::Sleeping;
        table[1].lock().chan = Some(42);
        table[2].lock().state = TaskState::Sleeping;
        table[2].lock().chan = Some(7);

        wakeup(&table, 42);

        assert_eq!(table[0].lock().state, TaskState::Runnable);
        assert_eq!(table[1].lock().state, TaskState::Runnable);
        assert_eq!(table[2].lock().state, TaskState::Sleeping);
        assert_eq!(table[0].lock().chan, None);
    }

    #[test]
    fn wakeup_one_stops_at_first_match() {
        let table = table_of(3);
        table[0].lock().state = TaskState::Sleeping;
        table[0].lock().chan = Some(9);
        table[1].lock().state = TaskState::Sleeping;
        table[1].lock().chan = Some(9);

        assert!(wakeup_one(&table, 9));
        assert_eq!(table[0].lock().state, TaskState::Runnable);
        assert_eq!(table[1].lock().state, TaskState::Sleeping);
    }

    #[test]
    fn wakeup_on_unmatched_channel_is_a_no_op() {
        let table = table_of(2);
        table[0].lock().state = TaskState::Sleeping;
        table[0].lock().chan = Some(1);
        assert!(!wakeup_one(&table, 2));
        assert_eq!(table[0].lock().state, TaskState::Sleeping);
    }
}
