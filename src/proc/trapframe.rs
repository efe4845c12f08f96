//! Saved user trap frame.
//!
//! Field layout belongs to the trap primitive (out of scope), but the
//! fields this crate's own operations read/write — `sp`, `epc`, `a0`
//! (first argument / return-value register) and `ra` — must exist on the
//! TCB per spec.md §3/§4.3 (`clone` sets `sp`, `ra`=`fcn`, `a0`=`arg`;
//! `fork` copies the whole frame and zeroes `a0` in the child). Kept as a
//! cut-down version of the teacher's `proc::trapframe::Trapframe`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// Saved user program counter / exception PC.
    pub epc: u64,
    /// Saved user stack pointer.
    pub sp: u64,
    /// Saved user return-address register.
    pub ra: u64,
    /// First argument / syscall return-value register.
    pub a0: u64,
    pub a1: u64,
    pub a2: u64,
    pub a3: u64,
    pub a4: u64,
    pub a5: u64,
    pub a6: u64,
    pub a7: u64,
}
