//! Stable syscall numbers this core's operations are bound to (spec.md
//! §6), documenting the intended binding. Argument marshalling and the
//! copy-in/out of user pointers belong to the user-space syscall shims,
//! which are out of scope; this module only names the numbers, the way
//! the teacher's `syscall.rs`/`sysproc.rs` and the original
//! `kernel/syscall.h` do.

pub const SYS_FORK: i32 = 1;
pub const SYS_EXIT: i32 = 2;
pub const SYS_WAIT: i32 = 3;
pub const SYS_KILL: i32 = 6;
pub const SYS_GETPID: i32 = 11;
pub const SYS_SBRK: i32 = 12;
pub const SYS_SLEEP: i32 = 13;
pub const SYS_UPTIME: i32 = 14;
pub const SYS_CHPRI: i32 = 22;
pub const SYS_SHMGETAT: i32 = 29;
pub const SYS_SHMREFCOUNT: i32 = 30;
pub const SYS_MQGET: i32 = 31;
pub const SYS_MSGSND: i32 = 32;
pub const SYS_MSGRCV: i32 = 33;
pub const SYS_CLONE: i32 = 34;
pub const SYS_JOIN: i32 = 35;
pub const SYS_MYALLOC: i32 = 36;
pub const SYS_MYFREE: i32 = 37;
pub const SYS_GETCPUID: i32 = 38;
