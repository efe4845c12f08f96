//! The fixed-size task table and the fork/exit/wait/kill/chpri/growproc
//! lifecycle built on top of it (spec.md §4.2), grounded in
//! `proc::process::Process::{alloc, free, fork, reparent, exit,
//! wait_for_child, kill, grow_memory}` but parameterised over `Platform`
//! instead of calling straight through to `extern "C"` VM globals.

use core::array;

use crate::{
    arch::memlayout::{kstack, TRAMPOLINE, TRAPFRAME},
    log::KernelLog,
    param::{NOFILE, NPROC, PGSIZE, PRIORITY_CEILING, SLOT},
    platform::{perm, Platform},
    proc::{
        context::Context,
        rendezvous::{wakeup, wakeup_one},
        task::{ParentLink, TaskControlBlock, TaskState},
    },
    sync::SpinMutex,
    KernelError,
};

/// A task-table slot's [`TaskControlBlock`], specialised to one [`Platform`].
pub type Tcb<Plat> =
    TaskControlBlock<<Plat as Platform>::Pagetable, <Plat as Platform>::File, <Plat as Platform>::Inode>;

/// Stand-in for "the task's own TCB address" as a sleep/wakeup channel
/// (spec.md Design Notes §9 — explicit event-id instead of a raw pointer).
/// Every subsystem that sleeps "on itself", or wakes a specific other task
/// by its identity (parent on child exit, `thread_parent` on thread exit),
/// uses this same mapping, exactly as the original reuses one task's
/// pointer as the channel regardless of which subsystem put it to sleep.
pub fn task_channel(index: usize) -> crate::platform::Channel {
    index
}

/// The outcome of one non-blocking pass over the table looking for a dead
/// child, used to build the retrying `wait`/`join` loops in
/// [`crate::proc::scheduler`] without baking a sleep into this module.
#[derive(Debug, PartialEq, Eq)]
pub enum ReapOutcome {
    /// A zombie child was found, reaped, and its exit status captured.
    Reaped { child_index: usize, pid: i32, xstate: i32 },
    /// The caller has live (non-zombie) children but none have exited yet.
    NoneReady,
    /// The caller has no children matching the requested relation at all.
    NoChildren,
}

/// The global task table (`proc[NPROC]`, `pid_lock`, `wait_lock`).
pub struct ProcTable<Plat: Platform> {
    pub tasks: [SpinMutex<Tcb<Plat>>; NPROC],
    next_pid: SpinMutex<i32>,
    /// Serialises every parent/child relationship mutation (spec.md §5).
    pub wait_lock: SpinMutex<()>,
    init_index: SpinMutex<Option<usize>>,
}

impl<Plat: Platform> ProcTable<Plat> {
    pub fn new() -> Self {
        ProcTable {
            tasks: array::from_fn(|_| SpinMutex::new(Tcb::<Plat>::new())),
            next_pid: SpinMutex::new(1),
            wait_lock: SpinMutex::new(()),
            init_index: SpinMutex::new(None),
        }
    }

    /// Record which slot is `initproc`, the reparenting target for orphaned
    /// children (spec.md §4.2 "Exit").
    pub fn set_init_index(&self, index: usize) {
        *self.init_index.lock() = Some(index);
    }

    pub(crate) fn alloc_pid(&self) -> i32 {
        let mut next = self.next_pid.lock();
        let pid = *next;
        *next += 1;
        pid
    }

    /// `allocproc`: find an `Unused` slot, assign it a pid, and stage it for
    /// first resume.
    pub fn alloc(&self, plat: &Plat, log: &dyn KernelLog) -> Result<usize, KernelError> {
        for (index, slot) in self.tasks.iter().enumerate() {
            let mut t = slot.lock();
            if t.state != TaskState::Unused {
                continue;
            }

            let pagetable = plat.uvmcreate().ok_or(KernelError::ResourceExhausted)?;
            let trapframe_pa = match plat.kalloc() {
                Some(pa) => pa,
                None => {
                    plat.uvmfree(pagetable, 0);
                    return Err(KernelError::ResourceExhausted);
                }
            };
            if plat
                .mappages(pagetable, TRAPFRAME, PGSIZE as u64, trapframe_pa, perm::READ | perm::WRITE)
                .is_err()
            {
                plat.kfree(trapframe_pa);
                plat.uvmfree(pagetable, 0);
                return Err(KernelError::ResourceExhausted);
            }

            t.reset();
            t.pid = self.alloc_pid();
            t.state = TaskState::Used;
            t.priority = crate::param::DEFAULT_PRIORITY;
            t.slot = SLOT;
            t.pagetable = Some(pagetable);
            t.trapframe = Some(crate::proc::trapframe::TrapFrame::default());
            t.kstack = kstack(index) as u64;
            t.context = Context::new();
            t.context.ra = forkret_trampoline as u64;
            t.context.sp = t.kstack + PGSIZE as u64;
            t.shm = TaskControlBlock::<Plat::Pagetable, Plat::File, Plat::Inode>::shm_window_top(TRAPFRAME);

            log.log_info("allocproc: slot claimed");
            return Ok(index);
        }
        Err(KernelError::ResourceExhausted)
    }

    /// `freeproc`: release every `Platform` resource a slot owns and reset
    /// it to `Unused`. Caller must already hold no other lock on `index`.
    pub(crate) fn free(&self, index: usize, plat: &Plat) {
        let mut t = self.tasks[index].lock();
        if let Some(pt) = t.pagetable {
            // A cloned thread only owns its private trap-frame window
            // (mapped at THREAD_TRAPFRAME by `thread::clone`); the
            // process's own TRAPFRAME mapping and the shared page table
            // itself belong to the still-living owning process and must
            // not be touched here (spec.md §4.3 — "join... unmaps the
            // thread's private trap frame only").
            match t.parent_link {
                ParentLink::Thread(_) => {
                    plat.uvmunmap(pt, crate::arch::memlayout::THREAD_TRAPFRAME, 1, true);
                }
                _ => {
                    plat.uvmunmap(pt, TRAPFRAME, 1, true);
                    plat.uvmfree(pt, t.sz);
                }
            }
        }
        for file in t.ofile.iter_mut().flatten() {
            plat.fileclose(*file);
        }
        if let Some(cwd) = t.cwd {
            plat.iput(cwd);
        }
        t.reset();
    }

    /// `fork`: clone the calling task's address space and attachments into
    /// a freshly allocated child (spec.md §4.2).
    pub fn fork(
        &self,
        parent_index: usize,
        mq: &crate::ipc::mq::MqTable,
        shm: &crate::ipc::shm::ShmTable,
        plat: &Plat,
        log: &dyn KernelLog,
    ) -> Result<i32, KernelError> {
        let child_index = self.alloc(plat, log)?;

        let (parent_pt, parent_sz, parent_trapframe, parent_ofile, parent_cwd, parent_mqmask, parent_shmkeymask, parent_shmva) = {
            let p = self.tasks[parent_index].lock();
            (
                p.pagetable.expect("fork: parent has no pagetable"),
                p.sz,
                p.trapframe.expect("fork: parent has no trapframe"),
                p.ofile,
                p.cwd,
                p.mqmask,
                p.shmkeymask,
                p.shmva,
            )
        };

        let child_pagetable = {
            let c = self.tasks[child_index].lock();
            c.pagetable.expect("fork: child has no pagetable")
        };
        if plat.uvmcopy(parent_pt, child_pagetable, parent_sz).is_err() {
            self.free(child_index, plat);
            return Err(KernelError::ResourceExhausted);
        }

        let child_pid = {
            let mut c = self.tasks[child_index].lock();
            c.sz = parent_sz;
            let mut tf = parent_trapframe;
            tf.a0 = 0;
            c.trapframe = Some(tf);
            for (slot, parent_file) in c.ofile.iter_mut().zip(parent_ofile.iter()) {
                *slot = parent_file.map(|f| plat.filedup(f));
            }
            c.cwd = parent_cwd.map(|cwd| plat.idup(cwd));
            c.mqmask = parent_mqmask;
            c.shmkeymask = parent_shmkeymask;
            c.shmva = parent_shmva;
            c.pid
        };

        shm.lock().addcount(parent_shmkeymask);
        mq.lock().addcount(parent_mqmask);

        // Drop the child lock before taking wait_lock, then briefly
        // reacquire it, so no two TCB locks are ever held at once
        // (spec.md §4.2 "Fork" ordering).
        {
            let _guard = self.wait_lock.lock();
            self.tasks[child_index].lock().parent_link = ParentLink::Process(parent_index);
        }
        self.tasks[child_index].lock().state = TaskState::Runnable;

        log.log_info("fork: child runnable");
        Ok(child_pid)
    }

    /// Reparent every living child of `index` to `initproc`, waking it so
    /// it can reap them. Must be called with `wait_lock` held.
    fn reparent(&self, index: usize, plat: &Plat) {
        let Some(init_index) = *self.init_index.lock() else {
            return;
        };
        for (child_index, slot) in self.tasks.iter().enumerate() {
            let mut c = slot.lock();
            if c.parent_link == ParentLink::Process(index) {
                c.parent_link = ParentLink::Process(init_index);
                let _ = child_index;
            }
        }
        wakeup(&self.tasks, task_channel(init_index));
        let _ = plat;
    }

    /// `exit`: release resources, reparent children, wake the waiter, and
    /// transition to `Zombie`. Returns the channel the caller must now
    /// `sched()` away on (the scheduler glue lives in
    /// [`crate::proc::scheduler`]).
    pub fn exit(&self, index: usize, status: i32, plat: &Plat, log: &dyn KernelLog) {
        {
            let mut t = self.tasks[index].lock();
            for file in t.ofile.iter_mut() {
                if let Some(f) = file.take() {
                    plat.fileclose(f);
                }
            }
            if let Some(cwd) = t.cwd.take() {
                plat.iput(cwd);
            }
        }

        let _wait_guard = self.wait_lock.lock();
        self.reparent(index, plat);

        let waiter = self.tasks[index].lock().parent_link;
        match waiter {
            ParentLink::Process(parent_index) => wakeup(&self.tasks, task_channel(parent_index)),
            ParentLink::Thread(thread_parent_index) => wakeup(&self.tasks, task_channel(thread_parent_index)),
            ParentLink::None => {}
        }

        let mut t = self.tasks[index].lock();
        t.xstate = status;
        t.state = TaskState::Zombie;
        log.log_info("exit: zombie");
        // `_wait_guard` drops here; caller must still `sched()` away.
    }

    /// One non-blocking scan for a dead child of `parent_index`, reaping it
    /// if found. Must be called with `wait_lock` held; the sleep-and-retry
    /// loop lives in [`crate::proc::scheduler::wait`].
    pub fn try_reap_child(
        &self,
        parent_index: usize,
        mq: &crate::ipc::mq::MqTable,
        shm: &crate::ipc::shm::ShmTable,
        plat: &Plat,
    ) -> ReapOutcome {
        let mut has_children = false;
        for (child_index, slot) in self.tasks.iter().enumerate() {
            let matches_parent = {
                let c = slot.lock();
                c.parent_link == ParentLink::Process(parent_index) && c.state != TaskState::Unused
            };
            if !matches_parent {
                continue;
            }
            has_children = true;

            let is_zombie = slot.lock().state == TaskState::Zombie;
            if !is_zombie {
                continue;
            }

            let (pid, xstate, shmkeymask, mqmask) = {
                let c = slot.lock();
                (c.pid, c.xstate, c.shmkeymask, c.mqmask)
            };
            shm.lock().release_mask(shmkeymask, plat);
            mq.lock().releasemq2(mqmask, plat);
            self.free(child_index, plat);
            return ReapOutcome::Reaped { child_index, pid, xstate };
        }
        if has_children {
            ReapOutcome::NoneReady
        } else {
            ReapOutcome::NoChildren
        }
    }

    /// `kill(pid)`: set the target's kill flag and, if sleeping, force it
    /// runnable so it re-checks its blocking condition.
    pub fn kill(&self, pid: i32) -> Result<(), KernelError> {
        for slot in &self.tasks {
            let mut t = slot.lock();
            if t.pid == pid && t.state != TaskState::Unused {
                t.killed = true;
                if t.state == TaskState::Sleeping {
                    t.state = TaskState::Runnable;
                    t.chan = None;
                }
                return Ok(());
            }
        }
        Err(KernelError::NotFound)
    }

    pub fn is_killed(&self, index: usize) -> bool {
        self.tasks[index].lock().killed
    }

    /// `chpri(pid, prio)`: overwrite the target's priority. The scheduler's
    /// scan must use a ceiling at least [`PRIORITY_CEILING`] for this to be
    /// observed correctly (spec.md §4.2).
    pub fn chpri(&self, pid: i32, priority: i32) -> Result<i32, KernelError> {
        let _ = PRIORITY_CEILING; // the scheduler's scan, not chpri, enforces the ceiling
        for slot in &self.tasks {
            let mut t = slot.lock();
            if t.pid == pid && t.state != TaskState::Unused {
                t.priority = priority;
                return Ok(pid);
            }
        }
        Err(KernelError::NotFound)
    }

    /// `growproc(n)`: extend or shrink `[0, sz)`, refusing growth that would
    /// collide with the trampoline page.
    pub fn growproc(&self, index: usize, delta: i64, plat: &Plat) -> Result<(), KernelError> {
        let mut t = self.tasks[index].lock();
        let pt = t.pagetable.ok_or(KernelError::ArgumentInvalid)?;
        let old_sz = t.sz;
        if delta > 0 {
            let new_sz = old_sz + delta as u64;
            if new_sz >= TRAMPOLINE {
                return Err(KernelError::ArgumentInvalid);
            }
            t.sz = plat.uvmalloc(pt, old_sz, new_sz, perm::READ | perm::WRITE | perm::EXEC)?;
        } else if delta < 0 {
            let new_sz = old_sz.saturating_sub((-delta) as u64);
            t.sz = plat.uvmdealloc(pt, old_sz, new_sz);
        }
        Ok(())
    }

    /// `mygrowproc(n)`: first-fit allocate `n` bytes via the task's vma
    /// free-list, and back the new region through the VM layer.
    pub fn mygrowproc(&self, index: usize, n: u64, plat: &Plat) -> Result<u64, KernelError> {
        let mut t = self.tasks[index].lock();
        let pt = t.pagetable.ok_or(KernelError::ArgumentInvalid)?;
        let sz = t.sz;
        let address = t
            .vma
            .alloc(sz, n)
            .map_err(|_| KernelError::ResourceExhausted)?;
        if plat.uvmalloc(pt, address, address + n, perm::READ | perm::WRITE).is_err() {
            t.vma.free(address);
            return Err(KernelError::ResourceExhausted);
        }
        Ok(address)
    }

    /// `myreduceproc(addr)`: unmap and free a block previously returned by
    /// [`ProcTable::mygrowproc`].
    pub fn myreduceproc(&self, index: usize, address: u64, plat: &Plat) -> Result<(), KernelError> {
        let mut t = self.tasks[index].lock();
        let pt = t.pagetable.ok_or(KernelError::ArgumentInvalid)?;
        let length = t.vma.free(address).ok_or(KernelError::NotFound)?;
        let npages = (length as usize).div_ceil(PGSIZE).max(1);
        plat.uvmunmap(pt, address, npages, true);
        Ok(())
    }
}
impl<Plat: Platform> Default for ProcTable<Plat> {
    fn default() -> Self {
        Self::new()
    }
}

/// First-resume trampoline every allocated context stages `ra` at; releasing
/// the just-claimed TCB lock before returning to user mode is the real
/// kernel's job (out of scope — no trap return path here). Declared so
/// `context.ra` has a concrete, documented target instead of a raw `0`.
pub(crate) extern "C" fn forkret_trampoline() {}

// `wakeup_one` is re-exported for sibling modules (mq/shm/thread) that need
// a single targeted wakeup without pulling in `rendezvous` directly.
pub use crate::proc::rendezvous::wakeup_one as wakeup_one_sleeper;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_platform::MockPlatform;

    fn table() -> ProcTable<MockPlatform> {
        ProcTable::new()
    }

    #[test]
    fn alloc_assigns_increasing_pids_and_marks_used() {
        let t = table();
        let plat = MockPlatform::new();
        let a = t.alloc(&plat, &crate::log::NullLog).unwrap();
        let b = t.alloc(&plat, &crate::log::NullLog).unwrap();
        assert_ne!(a, b);
        assert!(t.tasks[a].lock().pid < t.tasks[b].lock().pid);
        assert_eq!(t.tasks[a].lock().state, TaskState::Used);
    }

    #[test]
    fn alloc_exhaustion_is_reported() {
        let t = table();
        let plat = MockPlatform::new();
        for _ in 0..NPROC {
            t.alloc(&plat, &crate::log::NullLog).unwrap();
        }
        assert_eq!(t.alloc(&plat, &crate::log::NullLog), Err(KernelError::ResourceExhausted));
    }

    fn ipc_tables() -> (crate::ipc::mq::MqTable, crate::ipc::shm::ShmTable) {
        (crate::ipc::mq::MqTable::new(), crate::ipc::shm::ShmTable::new())
    }

    #[test]
    fn fork_marks_child_runnable_with_parent_link() {
        let t = table();
        let plat = MockPlatform::new();
        let (mq, shm) = ipc_tables();
        let parent = t.alloc(&plat, &crate::log::NullLog).unwrap();
        t.tasks[parent].lock().state = TaskState::Running;

        let child_pid = t.fork(parent, &mq, &shm, &plat, &crate::log::NullLog).unwrap();
        let child_index = t
            .tasks
            .iter()
            .position(|s| s.lock().pid == child_pid)
            .unwrap();
        assert_eq!(t.tasks[child_index].lock().state, TaskState::Runnable);
        assert_eq!(t.tasks[child_index].lock().parent_link, ParentLink::Process(parent));
    }

    #[test]
    fn exit_then_wait_reaps_zombie_child_and_returns_status() {
        let t = table();
        let plat = MockPlatform::new();
        let (mq, shm) = ipc_tables();
        t.set_init_index(0);
        let parent = t.alloc(&plat, &crate::log::NullLog).unwrap();
        let child_pid = t.fork(parent, &mq, &shm, &plat, &crate::log::NullLog).unwrap();
        let child_index = t.tasks.iter().position(|s| s.lock().pid == child_pid).unwrap();

        t.exit(child_index, 7, &plat, &crate::log::NullLog);
        assert_eq!(t.tasks[child_index].lock().state, TaskState::Zombie);

        let _guard = t.wait_lock.lock();
        drop(_guard);
        match t.try_reap_child(parent, &mq, &shm, &plat) {
            ReapOutcome::Reaped { pid, xstate, .. } => {
                assert_eq!(pid, child_pid);
                assert_eq!(xstate, 7);
            }
            other => panic!("expected Reaped, got {:?}", other),
        }
        assert_eq!(t.tasks[child_index].lock().state, TaskState::Unused);
    }

    #[test]
    fn wait_with_no_children_is_reported_distinctly() {
        let t = table();
        let plat = MockPlatform::new();
        let (mq, shm) = ipc_tables();
        let parent = t.alloc(&plat, &crate::log::NullLog).unwrap();
        assert_eq!(t.try_reap_child(parent, &mq, &shm, &plat), ReapOutcome::NoChildren);
    }

    #[test]
    fn wait_with_live_child_reports_none_ready() {
        let t = table();
        let plat = MockPlatform::new();
        let (mq, shm) = ipc_tables();
        let parent = t.alloc(&plat, &crate::log::NullLog).unwrap();
        t.fork(parent, &mq, &shm, &plat, &crate::log::NullLog).unwrap();
        assert_eq!(t.try_reap_child(parent, &mq, &shm, &plat), ReapOutcome::NoneReady);
    }

    #[test]
    fn kill_on_sleeping_task_forces_runnable() {
        let t = table();
        let plat = MockPlatform::new();
        let idx = t.alloc(&plat, &crate::log::NullLog).unwrap();
        let pid = t.tasks[idx].lock().pid;
        t.tasks[idx].lock().state = TaskState::Sleeping;
        t.tasks[idx].lock().chan = Some(99);

        t.kill(pid).unwrap();

        let tcb = t.tasks[idx].lock();
        assert!(tcb.killed);
        assert_eq!(tcb.state, TaskState::Runnable);
    }

    #[test]
    fn kill_unknown_pid_is_not_found() {
        let t = table();
        assert_eq!(t.kill(99999), Err(KernelError::NotFound));
    }

    #[test]
    fn chpri_overwrites_priority_for_live_task() {
        let t = table();
        let plat = MockPlatform::new();
        let idx = t.alloc(&plat, &crate::log::NullLog).unwrap();
        let pid = t.tasks[idx].lock().pid;
        assert_eq!(t.chpri(pid, 5), Ok(pid));
        assert_eq!(t.tasks[idx].lock().priority, 5);
    }

    #[test]
    fn mygrowproc_then_myreduceproc_round_trips() {
        let t = table();
        let plat = MockPlatform::new();
        let idx = t.alloc(&plat, &crate::log::NullLog).unwrap();

        let addr = t.mygrowproc(idx, 64, &plat).unwrap();
        assert!(t.myreduceproc(idx, addr, &plat).is_ok());
        // Freeing an address not currently allocated is a NotFound, proving
        // the slot really was released.
        assert_eq!(t.myreduceproc(idx, addr, &plat), Err(KernelError::NotFound));
    }
}
