//! A `std`-backed stand-in for the real arch/VM/allocator backend, used
//! only by this crate's own `#[cfg(test)]` modules. Grounded in the same
//! contract the teacher exposes as `extern "C"` globals
//! (`mem::kalloc::{kalloc, kfree}`, `mem::virtual_memory::*`), but backed
//! by ordinary `std` collections instead of real physical memory so the
//! task-table, IPC and shared-memory logic can be exercised deterministically
//! on the host.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::platform::{Platform, PlatformError};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MockPagetable(pub u64);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MockFile(pub u64);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MockInode(pub u64);

#[derive(Default)]
struct Inner {
    next_phys: u64,
    next_pt: u64,
    next_file: u64,
    free_pages: Vec<u64>,
    /// pagetable -> (va -> bytes written), a trivial simulation of user
    /// address spaces good enough to round-trip copyin/copyout and to
    /// let two distinct pagetables "see" a shared physical page when the
    /// same physical address is mapped into both (shared-memory test
    /// scenario 3 in spec.md §8).
    mappings: HashMap<u64, HashMap<u64, u64>>,
    /// physical address -> page contents, shared across every pagetable
    /// that maps it (models one real page of RAM).
    pages: HashMap<u64, [u8; 4096]>,
    file_refs: HashMap<u64, u32>,
    inode_refs: HashMap<u64, u32>,
}

/// Mock implementation of [`Platform`] for unit and scenario tests.
pub struct MockPlatform {
    inner: RefCell<Inner>,
}
impl MockPlatform {
    pub fn new() -> MockPlatform {
        MockPlatform {
            inner: RefCell::new(Inner::default()),
        }
    }

    /// Test helper: read back one byte at `va` in `pt`'s address space, by
    /// way of whatever physical page backs it.
    pub fn peek_byte(&self, pt: MockPagetable, va: u64) -> Option<u8> {
        let inner = self.inner.borrow();
        let page_va = va & !0xFFF;
        let offset = (va & 0xFFF) as usize;
        let pa = *inner.mappings.get(&pt.0)?.get(&page_va)?;
        inner.pages.get(&pa).map(|p| p[offset])
    }

    /// Test helper: write one byte at `va` in `pt`'s address space.
    pub fn poke_byte(&self, pt: MockPagetable, va: u64, value: u8) {
        let mut inner = self.inner.borrow_mut();
        let page_va = va & !0xFFF;
        let offset = (va & 0xFFF) as usize;
        let pa = *inner
            .mappings
            .get(&pt.0)
            .and_then(|m| m.get(&page_va))
            .expect("poke_byte: unmapped address");
        inner.pages.get_mut(&pa).unwrap()[offset] = value;
    }
}
impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for MockPlatform {
    type Pagetable = MockPagetable;
    type File = MockFile;
    type Inode = MockInode;

    fn kalloc(&self) -> Option<u64> {
        let mut inner = self.inner.borrow_mut();
        let pa = if let Some(reused) = inner.free_pages.pop() {
            reused
        } else {
            inner.next_phys += 4096;
            inner.next_phys
        };
        inner.pages.insert(pa, [0u8; 4096]);
        Some(pa)
    }

    fn kfree(&self, page: u64) {
        let mut inner = self.inner.borrow_mut();
        inner.pages.remove(&page);
        inner.free_pages.push(page);
    }

    fn uvmcreate(&self) -> Option<MockPagetable> {
        let mut inner = self.inner.borrow_mut();
        inner.next_pt += 1;
        let id = inner.next_pt;
        inner.mappings.insert(id, HashMap::new());
        Some(MockPagetable(id))
    }

    fn uvmfree(&self, pt: MockPagetable, _sz: u64) {
        self.inner.borrow_mut().mappings.remove(&pt.0);
    }

    fn uvmcopy(&self, src: MockPagetable, dst: MockPagetable, sz: u64) -> Result<(), PlatformError> {
        let mut inner = self.inner.borrow_mut();
        let src_map = inner.mappings.get(&src.0).cloned().unwrap_or_default();
        let mut copied = Vec::new();
        for (va, pa) in src_map.iter() {
            if *va >= sz {
                continue;
            }
            let new_pa = {
                let p = *inner.pages.get(pa).unwrap_or(&[0u8; 4096]);
                inner.next_phys += 4096;
                let new_pa = inner.next_phys;
                inner.pages.insert(new_pa, p);
                new_pa
            };
            copied.push((*va, new_pa));
        }
        let dst_map = inner.mappings.entry(dst.0).or_default();
        for (va, pa) in copied {
            dst_map.insert(va, pa);
        }
        Ok(())
    }

    fn uvmalloc(&self, pt: MockPagetable, _old_sz: u64, new_sz: u64, _perm: u32) -> Result<u64, PlatformError> {
        let page = self.kalloc().ok_or(PlatformError::OutOfMemory)?;
        let mut inner = self.inner.borrow_mut();
        let page_va = (new_sz.saturating_sub(1)) & !0xFFF;
        inner.mappings.entry(pt.0).or_default().insert(page_va, page);
        Ok(new_sz)
    }

    fn uvmdealloc(&self, _pt: MockPagetable, _old_sz: u64, new_sz: u64) -> u64 {
        new_sz
    }

    fn uvmunmap(&self, pt: MockPagetable, va: u64, npages: usize, free: bool) {
        let mut inner = self.inner.borrow_mut();
        if let Some(map) = inner.mappings.get_mut(&pt.0) {
            for i in 0..npages {
                let page_va = va + (i as u64) * 4096;
                if let Some(pa) = map.remove(&page_va) {
                    if free {
                        inner.pages.remove(&pa);
                    }
                }
            }
        }
    }

    fn mappages(&self, pt: MockPagetable, va: u64, size: u64, pa: u64, _perm: u32) -> Result<(), PlatformError> {
        let mut inner = self.inner.borrow_mut();
        let map = inner.mappings.entry(pt.0).or_default();
        let pages = size.div_ceil(4096).max(1);
        for i in 0..pages {
            map.insert(va + i * 4096, pa + i * 4096);
        }
        Ok(())
    }

    fn copyout(&self, pt: MockPagetable, dst: u64, src: &[u8]) -> Result<(), PlatformError> {
        for (i, byte) in src.iter().enumerate() {
            self.write_one(pt, dst + i as u64, *byte)?;
        }
        Ok(())
    }

    fn copyin(&self, pt: MockPagetable, dst: &mut [u8], src: u64) -> Result<(), PlatformError> {
        for (i, slot) in dst.iter_mut().enumerate() {
            *slot = self.read_one(pt, src + i as u64)?;
        }
        Ok(())
    }

    fn copyoutstr(&self, pt: MockPagetable, dst: u64, src: &[u8], max: usize) -> Result<(), PlatformError> {
        let n = src.len().min(max.saturating_sub(1));
        self.copyout(pt, dst, &src[..n])?;
        self.write_one(pt, dst + n as u64, 0)
    }

    fn filedup(&self, file: MockFile) -> MockFile {
        *self.inner.borrow_mut().file_refs.entry(file.0).or_insert(0) += 1;
        file
    }

    fn fileclose(&self, file: MockFile) {
        let mut inner = self.inner.borrow_mut();
        if let Some(r) = inner.file_refs.get_mut(&file.0) {
            *r = r.saturating_sub(1);
        }
    }

    fn idup(&self, inode: MockInode) -> MockInode {
        *self.inner.borrow_mut().inode_refs.entry(inode.0).or_insert(0) += 1;
        inode
    }

    fn iput(&self, inode: MockInode) {
        let mut inner = self.inner.borrow_mut();
        if let Some(r) = inner.inode_refs.get_mut(&inode.0) {
            *r = r.saturating_sub(1);
        }
    }

    unsafe fn swtch(&self, _from: *mut crate::proc::context::Context, _to: *mut crate::proc::context::Context) {
        // There is no real kernel stack to switch to under test: the
        // scheduler loop itself is exercised only through its pure
        // selection logic (`proc::scheduler::pick_next`), never by
        // actually calling `swtch`, so this is intentionally unreachable.
        unreachable!("MockPlatform::swtch is not exercised by host-side tests")
    }
}

impl MockPlatform {
    fn write_one(&self, pt: MockPagetable, va: u64, value: u8) -> Result<(), PlatformError> {
        let mut inner = self.inner.borrow_mut();
        let page_va = va & !0xFFF;
        let offset = (va & 0xFFF) as usize;
        let pa = *inner
            .mappings
            .get(&pt.0)
            .and_then(|m| m.get(&page_va))
            .ok_or(PlatformError::BadAddress)?;
        inner
            .pages
            .get_mut(&pa)
            .ok_or(PlatformError::BadAddress)?[offset] = value;
        Ok(())
    }

    fn read_one(&self, pt: MockPagetable, va: u64) -> Result<u8, PlatformError> {
        let inner = self.inner.borrow();
        let page_va = va & !0xFFF;
        let offset = (va & 0xFFF) as usize;
        let pa = *inner
            .mappings
            .get(&pt.0)
            .and_then(|m| m.get(&page_va))
            .ok_or(PlatformError::BadAddress)?;
        Ok(inner.pages.get(&pa).ok_or(PlatformError::BadAddress)?[offset])
    }
}
