//! Keyed shared memory (spec.md §4.5), grounded in
//! `original_source/kernel/sharemem.c`'s `sharemem`/`shmtab` and
//! `shmgetat`/`shmaddcount`/`shmrelease` operations.

use crate::{
    param::{MAX_SHM_PGNUM, PGSIZE, SHM_KEYS, SHM_WINDOW_PAGES},
    platform::{perm, Platform, VirtAddr},
    arch::memlayout::TRAPFRAME,
    proc::table::ProcTable,
    sync::{SpinMutex, SpinMutexGuard},
    KernelError,
};

/// One keyed shared-memory slot (spec.md §3 "Shared-Memory Descriptor").
#[derive(Copy, Clone)]
struct SharedRegion {
    refcount: u32,
    pagenum: u32,
    physaddr: [u64; MAX_SHM_PGNUM],
}
impl SharedRegion {
    const fn empty() -> SharedRegion {
        SharedRegion {
            refcount: 0,
            pagenum: 0,
            physaddr: [0; MAX_SHM_PGNUM],
        }
    }
}

/// `shm[8]` plus `shmlock` (spec.md §3 "Global State").
pub struct ShmInner {
    regions: [SharedRegion; SHM_KEYS],
}
impl ShmInner {
    const fn new() -> ShmInner {
        ShmInner {
            regions: [SharedRegion::empty(); SHM_KEYS],
        }
    }

    pub fn refcount(&self, key: usize) -> Result<u32, KernelError> {
        if key >= SHM_KEYS {
            return Err(KernelError::ArgumentInvalid);
        }
        Ok(self.regions[key].refcount)
    }

    /// `shmaddcount(mask)`: bump refcounts for every key in `mask`, used on
    /// fork to keep a forked child attached to its parent's regions.
    pub fn addcount(&mut self, mask: u8) {
        for key in 0..SHM_KEYS {
            if mask & (1 << key) != 0 {
                self.regions[key].refcount += 1;
            }
        }
    }

    fn release_key(&mut self, key: usize, plat: &impl Platform) {
        let region = &mut self.regions[key];
        if region.refcount == 0 {
            return;
        }
        region.refcount -= 1;
        if region.refcount == 0 {
            for pa in region.physaddr.iter_mut().take(region.pagenum as usize) {
                plat.kfree(*pa);
                *pa = 0;
            }
            region.pagenum = 0;
        }
    }

    /// `shmrelease(mask)`'s key-table half: decrement refcounts, freeing
    /// physical pages that drop to zero. Unmapping the caller's address
    /// window is the caller's job (it needs the caller's pagetable, which
    /// this table doesn't have), done by [`shmrelease`] below.
    pub fn release_mask(&mut self, mask: u8, plat: &impl Platform) {
        for key in 0..SHM_KEYS {
            if mask & (1 << key) != 0 {
                self.release_key(key, plat);
            }
        }
    }
}

/// Owns `shmlock` and everything it protects.
pub struct ShmTable {
    inner: SpinMutex<ShmInner>,
}
impl ShmTable {
    pub fn new() -> ShmTable {
        ShmTable {
            inner: SpinMutex::new(ShmInner::new()),
        }
    }
    pub fn lock(&self) -> SpinMutexGuard<'_, ShmInner> {
        self.inner.lock()
    }
}
impl Default for ShmTable {
    fn default() -> Self {
        Self::new()
    }
}

/// `shmgetat(key, num)`: attach the caller to the keyed region, creating it
/// with `num` pages on first use (spec.md §4.5).
pub fn shmgetat<Plat: Platform>(
    table: &ProcTable<Plat>,
    shm: &ShmTable,
    idx: usize,
    key: usize,
    num: usize,
    plat: &Plat,
) -> Result<VirtAddr, KernelError> {
    if key >= SHM_KEYS || num == 0 || num > MAX_SHM_PGNUM {
        return Err(KernelError::ArgumentInvalid);
    }

    {
        let t = table.tasks[idx].lock();
        if t.shmkeymask & (1 << key) != 0 {
            return Ok(t.shmva[key]);
        }
    }

    let mut guard = shm.lock();
    let region = guard.regions[key];

    let pagetable = table.tasks[idx].lock().pagetable.ok_or(KernelError::ArgumentInvalid)?;

    if region.refcount == 0 {
        let mut physaddr = [0u64; MAX_SHM_PGNUM];
        for slot in physaddr.iter_mut().take(num) {
            *slot = plat.kalloc().ok_or(KernelError::ResourceExhausted)?;
        }
        let va = {
            let mut t = table.tasks[idx].lock();
            let top = t.shm;
            let base = top - (num as u64) * PGSIZE as u64;
            for (i, pa) in physaddr.iter().take(num).enumerate() {
                plat.mappages(
                    pagetable,
                    base + (i as u64) * PGSIZE as u64,
                    PGSIZE as u64,
                    *pa,
                    perm::READ | perm::WRITE,
                )?;
            }
            t.shm = base;
            t.shmkeymask |= 1 << key;
            t.shmva[key] = base;
            base
        };
        guard.regions[key] = SharedRegion {
            refcount: 1,
            pagenum: num as u32,
            physaddr,
        };
        Ok(va)
    } else {
        // Key is live; the caller's requested `num` is ignored in favour of
        // the slot's established size (spec.md §4.5).
        let established = region.pagenum as usize;
        let va = {
            let mut t = table.tasks[idx].lock();
            let top = t.shm;
            let base = top - (established as u64) * PGSIZE as u64;
            for (i, pa) in region.physaddr.iter().take(established).enumerate() {
                plat.mappages(
                    pagetable,
                    base + (i as u64) * PGSIZE as u64,
                    PGSIZE as u64,
                    *pa,
                    perm::READ | perm::WRITE,
                )?;
            }
            t.shm = base;
            t.shmkeymask |= 1 << key;
            t.shmva[key] = base;
            base
        };
        guard.regions[key].refcount += 1;
        Ok(va)
    }
}

/// `shmrefcount(key)`.
pub fn shmrefcount(shm: &ShmTable, key: usize) -> Result<u32, KernelError> {
    shm.lock().refcount(key)
}

/// `shmrelease(pt, shm_top, mask)`: unmap the caller's shared-memory window
/// and drop its refcount on every key in `mask`.
pub fn shmrelease<Plat: Platform>(
    shm: &ShmTable,
    plat: &Plat,
    pagetable: Plat::Pagetable,
    shm_top: VirtAddr,
    mask: u8,
) {
    let window_base = TRAPFRAME - (SHM_WINDOW_PAGES as u64) * PGSIZE as u64;
    if window_base > shm_top {
        let npages = ((window_base - shm_top) / PGSIZE as u64) as usize;
        plat.uvmunmap(pagetable, shm_top, npages, false);
    }
    shm.lock().release_mask(mask, plat);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{log::NullLog, mock_platform::MockPlatform, proc::table::ProcTable};

    fn setup() -> (ProcTable<MockPlatform>, ShmTable, MockPlatform) {
        (ProcTable::new(), ShmTable::new(), MockPlatform::new())
    }

    #[test]
    fn shmgetat_twice_from_same_task_returns_same_va_regardless_of_num() {
        let (table, shm, plat) = setup();
        let idx = table.alloc(&plat, &NullLog).unwrap();

        let va1 = shmgetat(&table, &shm, idx, 0, 1, &plat).unwrap();
        let va2 = shmgetat(&table, &shm, idx, 0, 3, &plat).unwrap();
        assert_eq!(va1, va2);
        assert_eq!(shm.lock().refcount(0).unwrap(), 1);
    }

    #[test]
    fn two_tasks_see_shared_writes_through_same_key() {
        let (table, shm, plat) = setup();
        let a = table.alloc(&plat, &NullLog).unwrap();
        let b = table.alloc(&plat, &NullLog).unwrap();

        let va_a = shmgetat(&table, &shm, a, 0, 1, &plat).unwrap();
        let va_b = shmgetat(&table, &shm, b, 0, 1, &plat).unwrap();
        assert_eq!(shm.lock().refcount(0).unwrap(), 2);

        let pt_a = table.tasks[a].lock().pagetable.unwrap();
        let pt_b = table.tasks[b].lock().pagetable.unwrap();
        plat.poke_byte(pt_a, va_a, 0xA5);
        assert_eq!(plat.peek_byte(pt_b, va_b), Some(0xA5));
    }

    #[test]
    fn invalid_key_or_pagecount_is_rejected() {
        let (table, shm, plat) = setup();
        let idx = table.alloc(&plat, &NullLog).unwrap();
        assert_eq!(shmgetat(&table, &shm, idx, SHM_KEYS, 1, &plat), Err(KernelError::ArgumentInvalid));
        assert_eq!(shmgetat(&table, &shm, idx, 0, MAX_SHM_PGNUM + 1, &plat), Err(KernelError::ArgumentInvalid));
    }

    #[test]
    fn shmrelease_frees_pages_once_refcount_hits_zero() {
        let (table, shm, plat) = setup();
        let idx = table.alloc(&plat, &NullLog).unwrap();
        shmgetat(&table, &shm, idx, 2, 1, &plat).unwrap();
        let pt = table.tasks[idx].lock().pagetable.unwrap();
        let shm_top = table.tasks[idx].lock().shm;

        shmrelease(&shm, &plat, pt, shm_top, 1 << 2);
        assert_eq!(shm.lock().refcount(2).unwrap(), 0);
    }
}
