//! Core of a small multi-tasking kernel: task/thread table and priority
//! scheduler, System V-style message queues, keyed shared memory, and the
//! clone/join lightweight-thread mechanism, all built on one sleep/wakeup
//! rendezvous (see SPEC_FULL.md).
//!
//! The physical allocator, virtual-memory layer, trap/context-switch
//! primitive, filesystem and console are external collaborators
//! (`crate::platform::Platform`) referenced by capability only — this
//! crate never assumes a particular architecture or boot path.
#![cfg_attr(not(any(test, feature = "test-util")), no_std)]
#![allow(clippy::comparison_chain)]

#[cfg(any(test, feature = "test-util"))]
extern crate std;

pub mod abi;
pub mod arch;
pub mod ipc;
pub mod log;
pub mod param;
pub mod platform;
pub mod proc;
pub mod sync;

/// Error taxonomy shared across the core (spec.md §7). The syscall-shim
/// boundary (out of scope) is the only place these collapse to a signed
/// integer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KernelError {
    /// Negative or out-of-range pid/key/slot/num, or an oversize message.
    ArgumentInvalid,
    /// No free TCB, no free queue/shm slot, or a page allocation failed.
    ResourceExhausted,
    /// Caller lacks the mask bit required for this resource.
    NotAttached,
    /// No matching child/message-type/pid/key.
    NotFound,
    /// The blocking call was aborted because the caller was killed.
    Killed,
    /// A user-address copy faulted.
    CopyFailed,
}

impl From<platform::PlatformError> for KernelError {
    fn from(e: platform::PlatformError) -> Self {
        match e {
            platform::PlatformError::OutOfMemory => KernelError::ResourceExhausted,
            platform::PlatformError::BadAddress => KernelError::CopyFailed,
        }
    }
}

/// Convert a core `Result` to the syscall boundary's `0 | -1` / `slot | -1`
/// convention (spec.md §7), for hosts that want it. Detailed error kinds
/// are not distinguished across this boundary, matching the original.
pub fn to_syscall_result<T>(result: Result<T, KernelError>) -> i64
where
    T: Into<i64>,
{
    match result {
        Ok(v) => v.into(),
        Err(_) => -1,
    }
}

/// `std`-backed test double for [`platform::Platform`]. Built under ordinary
/// unit tests (`#[cfg(test)]`) and, via the `test-util` feature, exposed as
/// `pub` so the integration suite under `tests/` — which links this crate as
/// a normal external dependency rather than compiling into the unit-test
/// harness — can drive the same scenarios against it.
#[cfg(any(test, feature = "test-util"))]
pub mod mock_platform;
