//! The external collaborators this crate treats "by capability only"
//! (spec.md §1): the physical page allocator, the virtual-memory layer,
//! the trap/context-switch primitive, and the file/inode table.
//!
//! The teacher kernel reaches for these as bare `extern "C"` globals
//! (`mem::kalloc::{kalloc, kfree}`, `mem::virtual_memory::{mappages, ...}`,
//! `proc::process::Process` calling straight through to `swtch`). This
//! crate collects the same set of capabilities behind one trait so the
//! core logic can be driven from a host-supplied implementation — a real
//! arch backend in production, `MockPlatform` under test.

use crate::proc::context::Context;

/// Raw virtual address, in whatever address space `Pagetable` denotes.
pub type VirtAddr = u64;
/// Raw physical address, as returned by `Platform::kalloc`.
pub type PhysAddr = u64;

/// Opaque channel value used for sleep/wakeup rendezvous (spec.md §4.1).
/// The original kernel uses the address of some kernel object; per Design
/// Notes §9 ("Sleep-channel aliasing"), this crate uses an explicit numeric
/// event-id instead of a raw pointer so channels can be fabricated and
/// compared safely from test code. Any value works as long as it is
/// unique to the thing being waited on.
pub type Channel = usize;

/// Permission bits passed to `Platform::mappages`, matching the teacher's
/// `PTE_R`/`PTE_W`/`PTE_X` flags (`arch::riscv::{PTE_R, PTE_W, PTE_X}`).
pub mod perm {
    pub const READ: u32 = 1 << 0;
    pub const WRITE: u32 = 1 << 1;
    pub const EXEC: u32 = 1 << 2;
}

/// Errors a `Platform` implementation can report back to the core. These
/// collapse into `crate::KernelError::ResourceExhausted` /
/// `crate::KernelError::CopyFailed` at the call sites that use them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PlatformError {
    OutOfMemory,
    BadAddress,
}

/// Capability surface every task-table / IPC operation in this crate is
/// built on top of. A concrete port supplies one implementation backed by
/// its real allocator, page tables and context-switch trampoline; tests
/// supply `MockPlatform`.
pub trait Platform {
    /// A task's page table. Opaque to the core; cloned threads simply
    /// reuse their parent's handle (spec.md §4.3 — "it borrows the
    /// parent's").
    type Pagetable: Copy + Eq;
    /// An open-file handle. The file/fd table itself is out of scope; the
    /// core only needs to dup/close handles on fork/clone/exit.
    type File: Copy + Eq;
    /// A filesystem inode handle, for `cwd`. Out of scope beyond dup/put.
    type Inode: Copy + Eq;

    /// Allocate one zeroed physical page. `None` on exhaustion.
    fn kalloc(&self) -> Option<PhysAddr>;
    /// Free a page previously returned by `kalloc`.
    fn kfree(&self, page: PhysAddr);

    /// Create an empty page table (no user mappings).
    fn uvmcreate(&self) -> Option<Self::Pagetable>;
    /// Tear down a page table and the user memory below `sz` it maps.
    fn uvmfree(&self, pt: Self::Pagetable, sz: u64);
    /// Physically copy `sz` bytes of user memory from `src` to `dst`.
    fn uvmcopy(&self, src: Self::Pagetable, dst: Self::Pagetable, sz: u64) -> Result<(), PlatformError>;
    /// Grow user memory from `old_sz` to `new_sz`. Returns the new size.
    fn uvmalloc(&self, pt: Self::Pagetable, old_sz: u64, new_sz: u64, perm: u32) -> Result<u64, PlatformError>;
    /// Shrink user memory from `old_sz` to `new_sz`. Returns the new size.
    fn uvmdealloc(&self, pt: Self::Pagetable, old_sz: u64, new_sz: u64) -> u64;
    /// Unmap `npages` pages starting at `va`, optionally freeing the
    /// backing physical pages.
    fn uvmunmap(&self, pt: Self::Pagetable, va: VirtAddr, npages: usize, free: bool);
    /// Install a mapping for `size` bytes at `va`, backed by `pa`.
    fn mappages(&self, pt: Self::Pagetable, va: VirtAddr, size: u64, pa: PhysAddr, perm: u32) -> Result<(), PlatformError>;

    /// Copy `src` into the user address space at `dst`.
    fn copyout(&self, pt: Self::Pagetable, dst: VirtAddr, src: &[u8]) -> Result<(), PlatformError>;
    /// Copy `dst.len()` bytes from user address `src` into `dst`.
    fn copyin(&self, pt: Self::Pagetable, dst: &mut [u8], src: VirtAddr) -> Result<(), PlatformError>;
    /// Copy a NUL-terminated string of at most `max` bytes into user space.
    fn copyoutstr(&self, pt: Self::Pagetable, dst: VirtAddr, src: &[u8], max: usize) -> Result<(), PlatformError>;

    /// Increment a file handle's reference count and return it (`filedup`).
    fn filedup(&self, file: Self::File) -> Self::File;
    /// Drop a reference to a file handle (`fileclose`).
    fn fileclose(&self, file: Self::File);
    /// Increment an inode's reference count and return it (`idup`).
    fn idup(&self, inode: Self::Inode) -> Self::Inode;
    /// Drop a reference to an inode (`iput`).
    fn iput(&self, inode: Self::Inode);

    /// Switch kernel-stack context from `from` to `to`. Never returns until
    /// some later `swtch` switches back into `from`.
    ///
    /// # Safety
    /// Caller must hold exactly the locks the scheduler discipline
    /// (spec.md §5) requires and must have already updated `state`.
    unsafe fn swtch(&self, from: *mut Context, to: *mut Context);
}
