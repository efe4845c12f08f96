//! Lightweight intra-process threads: `clone`/`join` (spec.md §4.3),
//! grounded in `proc::process::Process::{clone, join}` but reworked around
//! the shared `ProcTable` instead of a free-standing process list.

use crate::{
    arch::memlayout::{kstack, THREAD_TRAPFRAME},
    log::KernelLog,
    param::{DEFAULT_PRIORITY, PGSIZE, SLOT},
    platform::{perm, Platform},
    proc::{
        context::Context,
        scheduler,
        table::{forkret_trampoline, task_channel, ProcTable, ReapOutcome},
        task::{ParentLink, TaskState},
    },
    KernelError,
};

/// `clone(fn, user_stack, arg)`: allocate a TCB that shares the caller's
/// page table, with its own private trap frame mapped at the well-known
/// `THREAD_TRAPFRAME` address (spec.md §4.3). That address is fixed rather
/// than per-slot, matching the original exactly — a second concurrent
/// clone from the same process would collide on it, which is why the
/// testable scenario (spec.md §8 "Clone/join") only ever has one thread
/// outstanding per process at a time.
#[allow(clippy::too_many_arguments)]
pub fn clone<Plat: Platform>(
    table: &ProcTable<Plat>,
    caller_index: usize,
    fn_addr: u64,
    user_stack: u64,
    arg: u64,
    plat: &Plat,
    log: &dyn KernelLog,
) -> Result<i32, KernelError> {
    let (pagetable, mut trapframe, ofile, cwd, mqmask, shmkeymask, shmva, shm) = {
        let c = table.tasks[caller_index].lock();
        (
            c.pagetable.ok_or(KernelError::ArgumentInvalid)?,
            c.trapframe.ok_or(KernelError::ArgumentInvalid)?,
            c.ofile,
            c.cwd,
            c.mqmask,
            c.shmkeymask,
            c.shmva,
            c.shm,
        )
    };

    for (index, slot) in table.tasks.iter().enumerate() {
        let mut t = slot.lock();
        if t.state != TaskState::Unused {
            continue;
        }

        let trapframe_pa = plat.kalloc().ok_or(KernelError::ResourceExhausted)?;
        if plat
            .mappages(pagetable, THREAD_TRAPFRAME, PGSIZE as u64, trapframe_pa, perm::READ | perm::WRITE)
            .is_err()
        {
            plat.kfree(trapframe_pa);
            return Err(KernelError::ResourceExhausted);
        }

        t.reset();
        t.pid = table.alloc_pid();
        t.state = TaskState::Used;
        t.priority = DEFAULT_PRIORITY;
        t.slot = SLOT;
        t.pagetable = Some(pagetable);

        trapframe.sp = user_stack + PGSIZE as u64 - 8;
        trapframe.ra = fn_addr;
        trapframe.a0 = arg;
        t.trapframe = Some(trapframe);

        t.kstack = kstack(index) as u64;
        t.context = Context::new();
        t.context.ra = forkret_trampoline as u64;
        t.context.sp = t.kstack + PGSIZE as u64;

        t.ustack = user_stack;
        for (dst, src) in t.ofile.iter_mut().zip(ofile.iter()) {
            *dst = src.map(|f| plat.filedup(f));
        }
        t.cwd = cwd.map(|i| plat.idup(i));
        t.mqmask = mqmask;
        t.shmkeymask = shmkeymask;
        t.shmva = shmva;
        t.shm = shm;

        t.parent_link = ParentLink::Thread(caller_index);
        t.state = TaskState::Runnable;
        let tid = t.pid;

        log.log_info("clone: thread runnable");
        return Ok(tid);
    }
    Err(KernelError::ResourceExhausted)
}

/// One non-blocking scan for a zombie thread whose `thread_parent` is
/// `caller_index`. Mirrors [`crate::proc::table::ProcTable::try_reap_child`]
/// but needs no IPC tables: a thread's only private resources are its
/// trap-frame window, open files and cwd, all released by
/// `ProcTable::free`.
fn try_reap_thread<Plat: Platform>(table: &ProcTable<Plat>, caller_index: usize, plat: &Plat) -> ReapOutcome {
    let mut has_children = false;
    for (child_index, slot) in table.tasks.iter().enumerate() {
        let matches = {
            let c = slot.lock();
            c.parent_link == ParentLink::Thread(caller_index) && c.state != TaskState::Unused
        };
        if !matches {
            continue;
        }
        has_children = true;

        let is_zombie = slot.lock().state == TaskState::Zombie;
        if !is_zombie {
            continue;
        }

        // Capture the tid before any teardown touches the slot (spec.md
        // Design Notes §9 — the original reads `pid` after zeroing it).
        let (tid, xstate) = {
            let c = slot.lock();
            (c.pid, c.xstate)
        };
        table.free(child_index, plat);
        return ReapOutcome::Reaped { child_index, pid: tid, xstate };
    }
    if has_children {
        ReapOutcome::NoneReady
    } else {
        ReapOutcome::NoChildren
    }
}

/// `join()`: block for any zombie thread of the caller, returning its tid.
/// Returns [`KernelError::NotFound`] immediately if the caller has no
/// thread children, and [`KernelError::Killed`] if woken by a kill instead
/// of a thread exit (spec.md §4.3).
pub fn join<Plat: Platform>(
    table: &ProcTable<Plat>,
    cpu: &mut crate::proc::cpu::Cpu,
    caller_index: usize,
    plat: &Plat,
) -> Result<i32, KernelError> {
    loop {
        let wait_guard = table.wait_lock.lock();
        match try_reap_thread(table, caller_index, plat) {
            ReapOutcome::Reaped { pid, .. } => return Ok(pid),
            ReapOutcome::NoChildren => return Err(KernelError::NotFound),
            ReapOutcome::NoneReady => {
                if table.is_killed(caller_index) {
                    return Err(KernelError::Killed);
                }
                scheduler::sleep(table, cpu, caller_index, task_channel(caller_index), move || drop(wait_guard), plat);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{log::NullLog, mock_platform::MockPlatform};

    fn table() -> ProcTable<MockPlatform> {
        ProcTable::new()
    }

    #[test]
    fn clone_shares_pagetable_and_sets_entry_registers() {
        let t = table();
        let plat = MockPlatform::new();
        let parent = t.alloc(&plat, &NullLog).unwrap();
        let parent_pt = t.tasks[parent].lock().pagetable.unwrap();

        let tid = clone(&t, parent, 0x1000, 0x2000, 0x42, &plat, &NullLog).unwrap();
        let child_index = t.tasks.iter().position(|s| s.lock().pid == tid).unwrap();
        let child = t.tasks[child_index].lock();

        assert_eq!(child.pagetable, Some(parent_pt));
        assert_eq!(child.parent_link, ParentLink::Thread(parent));
        assert_eq!(child.state, TaskState::Runnable);
        let tf = child.trapframe.unwrap();
        assert_eq!(tf.ra, 0x1000);
        assert_eq!(tf.a0, 0x42);
        assert_eq!(tf.sp, 0x2000 + PGSIZE as u64 - 8);
    }

    #[test]
    fn join_with_no_thread_children_is_not_found() {
        let t = table();
        let plat = MockPlatform::new();
        let parent = t.alloc(&plat, &NullLog).unwrap();
        assert_eq!(try_reap_thread(&t, parent, &plat), ReapOutcome::NoChildren);
    }

    #[test]
    fn join_reaps_zombie_thread_and_returns_its_tid() {
        let t = table();
        let plat = MockPlatform::new();
        let parent = t.alloc(&plat, &NullLog).unwrap();
        let tid = clone(&t, parent, 0x1000, 0x2000, 0, &plat, &NullLog).unwrap();
        let child_index = t.tasks.iter().position(|s| s.lock().pid == tid).unwrap();

        t.tasks[child_index].lock().xstate = 0;
        t.tasks[child_index].lock().state = TaskState::Zombie;

        match try_reap_thread(&t, parent, &plat) {
            ReapOutcome::Reaped { pid, .. } => assert_eq!(pid, tid),
            other => panic!("expected Reaped, got {:?}", other),
        }
        assert_eq!(t.tasks[child_index].lock().state, TaskState::Unused);
    }

    #[test]
    fn join_does_not_tear_down_the_parents_trapframe_mapping() {
        let t = table();
        let plat = MockPlatform::new();
        let parent = t.alloc(&plat, &NullLog).unwrap();
        let parent_pt = t.tasks[parent].lock().pagetable.unwrap();
        plat.poke_byte(parent_pt, crate::arch::memlayout::TRAPFRAME, 0x7);

        let tid = clone(&t, parent, 0x1000, 0x2000, 0, &plat, &NullLog).unwrap();
        let child_index = t.tasks.iter().position(|s| s.lock().pid == tid).unwrap();
        t.tasks[child_index].lock().state = TaskState::Zombie;

        try_reap_thread(&t, parent, &plat);

        // Only the thread's own THREAD_TRAPFRAME window is torn down by
        // `ProcTable::free`; the parent's own TRAPFRAME mapping (same
        // shared page table) must still be intact.
        assert_eq!(plat.peek_byte(parent_pt, crate::arch::memlayout::TRAPFRAME), Some(0x7));
    }
}
