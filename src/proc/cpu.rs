//! Per-CPU scheduler record (spec.md §3 "Global State").
//!
//! Grounded in the teacher's `proc::cpu::Cpu`, minus the hardware
//! `cpuid()`/`r_tp()` register read used to find "this" CPU (arch detail,
//! out of scope): callers here are handed a `&mut Cpu` explicitly by
//! whoever owns the per-CPU array, instead of looking one up through a
//! global indexed by a hart-id register.

use super::context::Context;

/// Per-CPU scheduler state: which task (if any) is running, its saved
/// context to resume the scheduler loop, and the `push_off`/`pop_off`
/// nesting `sched()` checks (spec.md §4.2).
pub struct Cpu {
    pub id: usize,
    /// Index into the task table of the task currently `Running` here, if
    /// any.
    pub running: Option<usize>,
    /// `swtch()` here to enter this CPU's scheduler loop.
    pub context: Context,
    /// Depth of `push_off` nesting.
    pub noff: i32,
    /// Whether "interrupts" (bookkeeping only; the interrupt controller
    /// itself is out of scope) were enabled before the current
    /// `push_off` nest started.
    pub prev_interrupts_enabled: bool,
    interrupts_enabled: bool,
}
impl Cpu {
    pub const fn new(id: usize) -> Cpu {
        Cpu {
            id,
            running: None,
            context: Context::new(),
            noff: 0,
            prev_interrupts_enabled: false,
            interrupts_enabled: true,
        }
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    /// Logical analogue of the teacher's `push_off`: disable "interrupts"
    /// and remember whether they were enabled, nesting safely.
    pub fn push_off(&mut self) {
        let was_enabled = self.interrupts_enabled;
        self.interrupts_enabled = false;
        if self.noff == 0 {
            self.prev_interrupts_enabled = was_enabled;
        }
        self.noff += 1;
    }

    /// Logical analogue of the teacher's `pop_off`.
    pub fn pop_off(&mut self) {
        assert!(self.noff >= 1, "pop_off without matching push_off");
        self.noff -= 1;
        if self.noff == 0 && self.prev_interrupts_enabled {
            self.interrupts_enabled = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_restores_enabled_state() {
        let mut cpu = Cpu::new(0);
        assert!(cpu.interrupts_enabled());
        cpu.push_off();
        assert!(!cpu.interrupts_enabled());
        cpu.push_off();
        assert_eq!(cpu.noff, 2);
        cpu.pop_off();
        assert!(!cpu.interrupts_enabled());
        cpu.pop_off();
        assert!(cpu.interrupts_enabled());
        assert_eq!(cpu.noff, 0);
    }
}
