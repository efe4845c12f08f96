//! The priority-preemptive round-robin scheduler and the sleep/yield/sched
//! primitives every blocking call in this crate is built on (spec.md §4.2
//! "Scheduler"/"sched/yield", §4.1).
//!
//! Grounded in `proc::scheduler::{sched, sleep, r#yield}` in the teacher,
//! but adapted to a contract `Platform::swtch` states explicitly instead of
//! leaving it to convention: a real port's `swtch` must release the
//! dispatched task's own TCB lock before handing the CPU to another task
//! and must have it re-held by the time this call returns. The teacher's C
//! ancestor (and the teacher's own Rust port) achieve the same thing by a
//! lock/release relay between `scheduler()` and `sleep`/`yield` that spans
//! two different call stacks; stating it as part of the `swtch` contract
//! here keeps the Rust-visible lock discipline expressible with ordinary
//! `SpinMutexGuard`s instead of `mem::forget` tricks, at the cost of
//! pushing that relay into the `Platform` implementation.

use crate::{
    param::PRIORITY_CEILING,
    platform::{Channel, Platform},
    proc::{
        cpu::Cpu,
        table::{task_channel, ProcTable},
        task::TaskState,
    },
    sync::SpinMutex,
    KernelError,
};

/// `sched`: the single path from a task into the scheduler. Requires the
/// caller to already hold `tasks[idx]`'s lock, exactly one level of
/// `push_off`, and `state != Running` (spec.md §4.2 "sched/yield").
pub fn sched<Plat: Platform>(table: &ProcTable<Plat>, cpu: &mut Cpu, idx: usize, plat: &Plat) {
    assert_eq!(cpu.noff, 1, "sched: expected exactly one push_off");
    assert_ne!(
        table.tasks[idx].lock().state,
        TaskState::Running,
        "sched: task must not be Running on entry"
    );
    assert!(!cpu.interrupts_enabled(), "sched: interrupts must be disabled");

    // Safety: by convention every caller of `sched` (directly, or via
    // `sleep`/`r#yield`/`scheduler_loop`) already holds this slot's lock,
    // so no other code can observe or mutate `context` while `swtch` runs.
    let context_ptr = unsafe { table.tasks[idx].data_ptr() };
    unsafe { plat.swtch(&mut (*context_ptr).context, &mut cpu.context) };
}

/// `yield`: give up the CPU voluntarily, remaining Runnable.
pub fn r#yield<Plat: Platform>(table: &ProcTable<Plat>, cpu: &mut Cpu, idx: usize, plat: &Plat) {
    table.tasks[idx].lock().state = TaskState::Runnable;
    cpu.push_off();
    sched(table, cpu, idx, plat);
    cpu.pop_off();
}

/// `sleep(chan, external_lock)`: release `external_lock`, mark the caller
/// `Sleeping` on `chan`, and yield. `release_external` is called with this
/// slot's own lock already held, closing the window a concurrent
/// `wakeup(chan)` could otherwise run through (spec.md §4.1).
pub fn sleep<Plat: Platform, F: FnOnce()>(
    table: &ProcTable<Plat>,
    cpu: &mut Cpu,
    idx: usize,
    chan: Channel,
    release_external: F,
    plat: &Plat,
) {
    {
        let mut guard = table.tasks[idx].lock();
        release_external();
        guard.state = TaskState::Sleeping;
        guard.chan = Some(chan);
    }
    cpu.push_off();
    sched(table, cpu, idx, plat);
    cpu.pop_off();
    table.tasks[idx].lock().chan = None;
}

/// Pure priority-scan: the lowest-numbered priority among `Runnable` tasks,
/// and the first (in table order) task at that priority. A real dispatch
/// loop calls this once per pick; tested directly here since it needs no
/// `Platform` interaction at all.
pub fn pick_next<Plat: Platform>(table: &ProcTable<Plat>) -> Option<usize> {
    let min_priority = table
        .tasks
        .iter()
        .filter_map(|slot| {
            let t = slot.lock();
            (t.state == TaskState::Runnable).then_some(t.priority)
        })
        .min()?;
    debug_assert!(min_priority <= PRIORITY_CEILING, "chpri accepted a priority past the scan ceiling");
    table.tasks.iter().position(|slot| {
        let t = slot.lock();
        t.state == TaskState::Runnable && t.priority == min_priority
    })
}

/// Per-CPU, non-returning dispatch loop (spec.md §4.2 "Scheduler"). Not
/// exercised by host tests: it never returns and its dispatch step calls
/// through to `Platform::swtch`, which `MockPlatform` cannot honestly
/// simulate without a real kernel stack.
///
/// This is the scheduler→task half of the switch, the mirror image of
/// `sched`'s task→scheduler half: it hands the picked task's context to
/// `swtch` as the destination and `cpu.context` as the source, so it must
/// not route through `sched` (which switches the other way and asserts
/// preconditions — `noff == 1`, `state != Running` — that only hold for a
/// task already mid-dispatch, not for the scheduler picking its next one).
pub fn scheduler_loop<Plat: Platform>(table: &ProcTable<Plat>, cpu: &mut Cpu, plat: &Plat) -> ! {
    loop {
        if let Some(idx) = pick_next(table) {
            table.tasks[idx].lock().state = TaskState::Running;
            cpu.running = Some(idx);

            // Safety: this slot's lock is held across the switch by
            // convention (the same convention `sched`'s own doc states),
            // and released/re-acquired by the `Platform` side per `swtch`'s
            // contract.
            let context_ptr = unsafe { table.tasks[idx].data_ptr() };
            unsafe { plat.swtch(&mut cpu.context, &mut (*context_ptr).context) };

            cpu.running = None;
        }
    }
}

/// The scheduler slot this CPU is currently running, mirroring the
/// original's `getcpuid()` (spec.md §4.4 Supplement).
pub fn current_cpu_id(cpu: &Cpu) -> usize {
    cpu.id
}

/// `wait(status_out)`: retry loop around [`crate::proc::table::ProcTable::try_reap_child`]
/// (spec.md §4.2 "Wait").
pub fn wait<Plat: Platform>(
    table: &ProcTable<Plat>,
    mq: &crate::ipc::mq::MqTable,
    shm: &crate::ipc::shm::ShmTable,
    cpu: &mut Cpu,
    idx: usize,
    plat: &Plat,
) -> Result<(i32, i32), KernelError> {
    use crate::proc::table::ReapOutcome;
    loop {
        let wait_guard = table.wait_lock.lock();
        match table.try_reap_child(idx, mq, shm, plat) {
            ReapOutcome::Reaped { pid, xstate, .. } => return Ok((pid, xstate)),
            ReapOutcome::NoChildren => return Err(KernelError::NotFound),
            ReapOutcome::NoneReady => {
                if table.is_killed(idx) {
                    return Err(KernelError::Killed);
                }
                sleep(table, cpu, idx, task_channel(idx), move || drop(wait_guard), plat);
            }
        }
    }
}

/// Monotonic tick counter plus the channel every `sys_sleep` call shares
/// (spec.md §4.4 Supplement, grounded in `original_source/kernel/sysproc.c`'s
/// `sys_sleep`/`sys_uptime`). Advancing it is the host's job (normally a
/// timer-interrupt handler, out of scope here).
pub struct TicksClock {
    ticks: SpinMutex<u64>,
}
/// Shared channel every `sys_sleep` caller blocks on; the timer tick
/// broadcasts a wakeup here.
pub const TICKS_CHANNEL: Channel = 0x3000_0000;

impl TicksClock {
    pub const fn new() -> TicksClock {
        TicksClock {
            ticks: SpinMutex::new(0),
        }
    }

    pub fn tick(&self) {
        *self.ticks.lock() += 1;
    }

    pub fn uptime(&self) -> u64 {
        *self.ticks.lock()
    }
}
impl Default for TicksClock {
    fn default() -> Self {
        Self::new()
    }
}

/// `sys_sleep(n)`: block until `n` ticks have elapsed.
pub fn sleep_ticks<Plat: Platform>(
    table: &ProcTable<Plat>,
    clock: &TicksClock,
    cpu: &mut Cpu,
    idx: usize,
    ticks: u64,
    plat: &Plat,
) -> Result<(), KernelError> {
    let target = clock.uptime() + ticks;
    while clock.uptime() < target {
        if table.is_killed(idx) {
            return Err(KernelError::Killed);
        }
        sleep(table, cpu, idx, TICKS_CHANNEL, || {}, plat);
    }
    Ok(())
}
