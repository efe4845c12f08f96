//! Compile-time capacities for the kernel core.
//!
//! Mirrors the shape of the teacher kernel's `param.rs`: every fixed-size
//! table in the crate is sized from a constant here instead of a literal.

/// Maximum number of tasks (processes and cloned threads) live at once.
pub const NPROC: usize = 64;
/// Maximum number of CPUs the scheduler fans out across.
pub const NCPU: usize = 8;
/// Maximum number of open files per task. The file table itself is out of
/// scope; this only bounds the `ofile` array each TCB carries.
pub const NOFILE: usize = 16;

/// Number of bytes in one physical page, as handed out by `Platform::kalloc`.
pub const PGSIZE: usize = 4096;

/// Maximum number of keyed message queues live at once.
pub const MQMAX: usize = 16;
/// 32-byte header stride per resident message (`next`, `type`, `data-ptr`,
/// `size`), matching the original `messagequeue.c` layout.
pub const MSG_HEADER_SIZE: usize = 32;
/// Accounting value `cur_bytes` is initialized to when a queue is created
/// (the sentinel header), per spec.md §3/§8.
pub const MQ_SENTINEL_BYTES: usize = 16;
/// Largest payload one message may carry. The core has no allocator for
/// variable-length kernel buffers (`no_std`, no `alloc`), so `msgsnd`'s
/// copy-in and `msgrcv`'s copy-out both stage through a buffer of this
/// fixed size; this comfortably covers the 1000-byte messages in spec.md
/// §8 scenario 4.
pub const MAX_MSG_PAYLOAD: usize = 1024;

/// Number of keyed shared-memory slots.
pub const SHM_KEYS: usize = 8;
/// Maximum pages one shared-memory region may span.
pub const MAX_SHM_PGNUM: usize = 4;
/// Size, in pages, of the high-address window reserved for shared memory
/// in every task's address space (`TRAPFRAME - 128*PGSIZE`, spec.md §4.5).
pub const SHM_WINDOW_PAGES: usize = 128;

/// Default per-task time-slice budget (`slot`), assigned at `allocproc`.
pub const SLOT: i32 = 10;
/// Default task priority (lower is more urgent).
pub const DEFAULT_PRIORITY: i32 = 10;
/// Ceiling the scheduler's priority scan starts from; must exceed any
/// priority a caller is allowed to set via `chpri`, per spec.md §4.2.
pub const PRIORITY_CEILING: i32 = 19;

/// Number of vma free-list entries per task (one sentinel head + 9 usable
/// slots), matching `mygrowproc`/`myreduceproc` in the original source.
pub const NVMA: usize = 10;
