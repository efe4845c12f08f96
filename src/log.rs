//! A narrow logging trait standing in for the teacher's `uprintln!` over the
//! console UART (`console/printf.rs`). This crate has no console of its own
//! — the console is an out-of-scope external collaborator — so callers hand
//! in whatever implements [`KernelLog`], typically something that forwards
//! to their own `uprintln!`.

/// Sink for the core's diagnostic output. Every resource-exhaustion,
/// blocking-retry and kill-during-wait path logs at [`KernelLog::log_warn`];
/// every successful allocation/attach logs at [`KernelLog::log_info`].
pub trait KernelLog {
    fn log_info(&self, message: &str);
    fn log_warn(&self, message: &str);
}

/// Discards everything. Used by tests that don't care about log output and
/// by any host that hasn't wired up a console yet.
pub struct NullLog;
impl KernelLog for NullLog {
    fn log_info(&self, _message: &str) {}
    fn log_warn(&self, _message: &str) {}
}
