//! Saved kernel register context, handed to `Platform::swtch`.
//!
//! The field layout is architecture detail that belongs to the
//! trap/context-switch primitive (out of scope, spec.md §1); this crate
//! only needs a `Context` value it can own per task and pass by pointer to
//! `swtch`. Kept as the teacher's `proc::context::Context` layout
//! (`ra`, `sp`, 12 callee-saved registers) so a real riscv/loongarch
//! `swtch` can be dropped in without reshaping this struct.

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Context {
    pub ra: u64,
    pub sp: u64,

    // callee-saved
    pub s0: u64,
    pub s1: u64,
    pub s2: u64,
    pub s3: u64,
    pub s4: u64,
    pub s5: u64,
    pub s6: u64,
    pub s7: u64,
    pub s8: u64,
    pub s9: u64,
    pub s10: u64,
    pub s11: u64,
}
impl Context {
    pub const fn new() -> Context {
        Context {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }
}
