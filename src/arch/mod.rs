//! The one architecture-shaped detail this crate still bakes in directly:
//! the well-known virtual addresses `TRAPFRAME`/`TRAMPOLINE` live at, and
//! the per-task kernel-stack layout derived from them. Everything else
//! address-related goes through [`crate::platform::Platform`]; these few
//! constants are kept here (rather than behind the trait) because the
//! task table itself needs to name them when staging a new TCB, the same
//! way the teacher's `proc::process::Process::alloc_pagetable` reaches
//! into `arch::riscv::memlayout` directly instead of threading them
//! through a capability.

pub mod memlayout;
