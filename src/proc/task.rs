//! The task control block (spec.md §3) and its `Unused → ... → Zombie`
//! lifecycle, grounded in `proc::process::Process`/`ProcessState` but with
//! every field the spec calls for: priority, slot, mqmask, shmkeymask +
//! shmva, the `shm` high-water mark, and the vma free list.

use crate::{
    param::{DEFAULT_PRIORITY, MAX_SHM_PGNUM, MQMAX, NOFILE, SHM_KEYS, SHM_WINDOW_PAGES, SLOT},
    platform::Channel,
    proc::{context::Context, trapframe::TrapFrame, vma::VmaTable},
};

/// `{pid, state, chan, ...}` lifecycle state (spec.md §3).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TaskState {
    #[default]
    Unused,
    Used,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

/// At most one of "has a parent process" or "has a thread-parent" is ever
/// true for a task (spec.md Design Notes §9); this replaces the original's
/// two raw pointers with one tagged link so "who wakes on exit" is total.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ParentLink {
    #[default]
    None,
    /// A full process's parent, set by `fork` (table index).
    Process(usize),
    /// A cloned thread's thread-parent, set by `clone` (table index).
    Thread(usize),
}

/// Per-task open-file slot. The file table itself is out of scope; this
/// only tracks the opaque handle so fork/clone/exit can dup/close it
/// through `Platform`.
pub type OpenFile<F> = Option<F>;

/// The mutable state one task-table slot owns, protected by that slot's
/// own `SpinMutex` (spec.md §5 — the per-entry lock).
pub struct TaskControlBlock<P: Copy + Eq, F: Copy + Eq, I: Copy + Eq> {
    pub pid: i32,
    pub state: TaskState,
    pub priority: i32,
    pub slot: i32,
    pub chan: Option<Channel>,
    pub killed: bool,
    pub xstate: i32,

    pub parent_link: ParentLink,

    pub kstack: u64,
    pub sz: u64,
    pub pagetable: Option<P>,
    pub trapframe: Option<TrapFrame>,
    pub context: Context,

    pub ofile: [OpenFile<F>; NOFILE],
    pub cwd: Option<I>,

    /// User-stack pointer recorded at `clone` time.
    pub ustack: u64,

    /// Bitmask of attached message-queue slots (spec.md §3).
    pub mqmask: u32,
    /// Bitmask of attached shared-memory keys.
    pub shmkeymask: u8,
    /// Per-key attachment virtual addresses.
    pub shmva: [u64; SHM_KEYS],
    /// Next free slot (descending) in the shared-memory address window.
    pub shm: u64,

    pub vma: VmaTable,
}

const _: () = assert!(MQMAX <= 32, "mqmask is a u32 bitmask");
const _: () = assert!(SHM_KEYS <= 8, "shmkeymask is a u8 bitmask");
const _: () = assert!(MAX_SHM_PGNUM > 0);

impl<P: Copy + Eq, F: Copy + Eq, I: Copy + Eq> TaskControlBlock<P, F, I> {
    pub const fn new() -> Self {
        TaskControlBlock {
            pid: 0,
            state: TaskState::Unused,
            priority: DEFAULT_PRIORITY,
            slot: SLOT,
            chan: None,
            killed: false,
            xstate: 0,
            parent_link: ParentLink::None,
            kstack: 0,
            sz: 0,
            pagetable: None,
            trapframe: None,
            context: Context::new(),
            ofile: [None; NOFILE],
            cwd: None,
            ustack: 0,
            mqmask: 0,
            shmkeymask: 0,
            shmva: [0; SHM_KEYS],
            shm: 0,
            vma: VmaTable::new(),
        }
    }

    /// Reset a slot to its just-booted `Unused` state. Does *not* touch
    /// `Platform` resources — callers (`free`) must release those first.
    pub fn reset(&mut self) {
        *self = TaskControlBlock::new();
    }

    pub fn is_sleeping_on(&self, chan: Channel) -> bool {
        self.state == TaskState::Sleeping && self.chan == Some(chan)
    }

    pub fn shm_window_top(trapframe_va: u64) -> u64 {
        trapframe_va - (SHM_WINDOW_PAGES as u64) * crate::param::PGSIZE as u64
    }
}
impl<P: Copy + Eq, F: Copy + Eq, I: Copy + Eq> Default for TaskControlBlock<P, F, I> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestTcb = TaskControlBlock<u64, u64, u64>;

    #[test]
    fn new_task_is_unused_with_default_priority() {
        let t = TestTcb::new();
        assert_eq!(t.state, TaskState::Unused);
        assert_eq!(t.priority, DEFAULT_PRIORITY);
        assert_eq!(t.parent_link, ParentLink::None);
    }

    #[test]
    fn state_chan_invariant() {
        let mut t = TestTcb::new();
        t.state = TaskState::Sleeping;
        t.chan = Some(5);
        assert!(t.is_sleeping_on(5));
        assert!(!t.is_sleeping_on(6));
    }
}
