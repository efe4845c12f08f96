//! Keyed message queues (spec.md §4.4), grounded in
//! `original_source/kernel/messagequeue.c`'s `mq`/`msg` structures and
//! `mqget`/`msgsnd`/`msgrcv`/`reloc`/`releasemq` operations.
//!
//! The original stores `next` and `data-ptr` as absolute addresses into the
//! backing page and rewrites them on every `reloc`. Per spec.md Design
//! Notes §9 ("Raw pointers inside message pages"), nodes here are addressed
//! by offset within the page instead, which makes `reloc` overlap-safe by
//! construction without changing any externally observable behaviour
//! (message order, sizes, FIFO-within-type).
//!
//! The original also maintains one *global* FIFO array of blocked sender
//! TCB pointers and one of blocked receivers, shared across every queue,
//! and a successful receive/send walks that array waking each recorded
//! waiter by its own identity. A `wakeup(chan)` table scan is already this
//! crate's general broadcast primitive, so instead of a separate FIFO array
//! this module gives every queue its own sender/receiver channel (derived
//! from its slot) and lets `wakeup` do the broadcasting — same externally
//! observed effect ("every blocked sender/receiver is woken, each
//! re-checks its own condition"), one fewer bespoke data structure.

use arrayvec::ArrayVec;

use crate::{
    log::KernelLog,
    param::{MAX_MSG_PAYLOAD, MQMAX, MQ_SENTINEL_BYTES, PGSIZE},
    platform::{Channel, Platform, VirtAddr},
    proc::{
        rendezvous::wakeup,
        scheduler,
        table::ProcTable,
    },
    sync::{SpinMutex, SpinMutexGuard},
    KernelError,
};

const MSG_HEADER_SIZE: usize = 32;
/// Upper bound on resident messages `reloc` ever has to shuffle in one
/// pass: one queue's page can hold at most this many header-only (size 0)
/// messages.
const MAX_RESIDENT: usize = PGSIZE / MSG_HEADER_SIZE;

/// Derives a channel every sender blocked on `slot` sleeps on; a
/// successful receive broadcasts a wakeup here.
pub fn sender_channel(slot: usize) -> Channel {
    0x1000_0000 + slot
}
/// Derives a channel every receiver blocked on `slot` sleeps on; a
/// successful send broadcasts a wakeup here.
pub fn receiver_channel(slot: usize) -> Channel {
    0x2000_0000 + slot
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Full,
}
#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Holds the number of bytes written into the caller's buffer.
    Received(usize),
    NoMatch,
}

/// One keyed message queue: a header-and-payload arena occupying one
/// physical page, addressed by offset (spec.md §3 "Message Queue").
#[derive(Copy, Clone)]
struct MessageQueue {
    key: i32,
    in_use: bool,
    head_offset: Option<u32>,
    cur_bytes: u32,
    max_bytes: u32,
    refcount: u32,
    arena_page: Option<u64>,
    arena: [u8; PGSIZE],
}
impl MessageQueue {
    const fn empty() -> MessageQueue {
        MessageQueue {
            key: 0,
            in_use: false,
            head_offset: None,
            cur_bytes: 0,
            max_bytes: PGSIZE as u32,
            refcount: 0,
            arena_page: None,
            arena: [0u8; PGSIZE],
        }
    }

    fn open(&mut self, key: i32, page: u64) {
        self.key = key;
        self.in_use = true;
        self.head_offset = None;
        self.cur_bytes = MQ_SENTINEL_BYTES as u32;
        self.max_bytes = PGSIZE as u32;
        self.refcount = 1;
        self.arena_page = Some(page);
    }

    fn write_header(&mut self, offset: u32, next: u64, msg_type: i64, data_offset: u64, size: u64) {
        let o = offset as usize;
        self.arena[o..o + 8].copy_from_slice(&next.to_le_bytes());
        self.arena[o + 8..o + 16].copy_from_slice(&msg_type.to_le_bytes());
        self.arena[o + 16..o + 24].copy_from_slice(&data_offset.to_le_bytes());
        self.arena[o + 24..o + 32].copy_from_slice(&size.to_le_bytes());
    }

    fn read_header(&self, offset: u32) -> (u64, i64, u64, u64) {
        let o = offset as usize;
        let next = u64::from_le_bytes(self.arena[o..o + 8].try_into().unwrap());
        let msg_type = i64::from_le_bytes(self.arena[o + 8..o + 16].try_into().unwrap());
        let data_offset = u64::from_le_bytes(self.arena[o + 16..o + 24].try_into().unwrap());
        let size = u64::from_le_bytes(self.arena[o + 24..o + 32].try_into().unwrap());
        (next, msg_type, data_offset, size)
    }

    /// `msgsnd`'s core check-and-append, without the blocking loop.
    fn try_send(&mut self, msg_type: i64, payload: &[u8]) -> Result<SendOutcome, KernelError> {
        let size = payload.len() as u32;
        if size as u64 + MSG_HEADER_SIZE as u64 > self.max_bytes as u64 - MQ_SENTINEL_BYTES as u64 {
            // Rejected rather than left to block forever (spec.md Design
            // Notes §9, Open Question #1).
            return Err(KernelError::ArgumentInvalid);
        }
        if self.cur_bytes + size + MSG_HEADER_SIZE as u32 > self.max_bytes {
            return Ok(SendOutcome::Full);
        }

        let new_offset = match self.head_offset {
            None => 0,
            Some(head) => {
                let mut cur = head;
                loop {
                    let (next, _, _, cur_size) = self.read_header(cur);
                    if next == 0 {
                        break cur + MSG_HEADER_SIZE as u32 + cur_size as u32;
                    }
                    cur = next as u32;
                }
            }
        };

        let data_offset = new_offset + MSG_HEADER_SIZE as u32;
        self.write_header(new_offset, 0, msg_type, data_offset as u64, size as u64);
        self.arena[data_offset as usize..data_offset as usize + payload.len()].copy_from_slice(payload);

        if new_offset != 0 {
            let mut cur = self.head_offset.expect("appended past head without one");
            loop {
                let (next, _, _, _) = self.read_header(cur);
                if next == 0 {
                    let (_, t, d, s) = self.read_header(cur);
                    self.write_header(cur, new_offset as u64, t, d, s);
                    break;
                }
                cur = next as u32;
            }
        } else {
            self.head_offset = Some(0);
        }

        self.cur_bytes += size + MSG_HEADER_SIZE as u32;
        Ok(SendOutcome::Sent)
    }

    /// `msgrcv`'s core scan-unlink-compact, without the blocking loop.
    fn try_receive(&mut self, msg_type: i64, out: &mut [u8]) -> ReceiveOutcome {
        let mut prev: Option<u32> = None;
        let mut cur = self.head_offset;
        while let Some(offset) = cur {
            let (next, m_type, data_offset, size) = self.read_header(offset);
            if m_type == msg_type {
                let n = (size as usize).min(out.len());
                out[..n].copy_from_slice(&self.arena[data_offset as usize..data_offset as usize + n]);

                match prev {
                    None => self.head_offset = if next == 0 { None } else { Some(next as u32) },
                    Some(p) => {
                        let (_, pt, pd, ps) = self.read_header(p);
                        self.write_header(p, next, pt, pd, ps);
                    }
                }
                self.cur_bytes -= size as u32 + MSG_HEADER_SIZE as u32;
                self.reloc();
                return ReceiveOutcome::Received(n);
            }
            prev = Some(offset);
            cur = if next == 0 { None } else { Some(next as u32) };
        }
        ReceiveOutcome::NoMatch
    }

    /// Compact every resident message to the front of the arena in list
    /// order, rewriting only addresses (spec.md §4.4 "reloc" / §8
    /// round-trip law).
    fn reloc(&mut self) {
        let mut offsets: ArrayVec<u32, MAX_RESIDENT> = ArrayVec::new();
        let mut cur = self.head_offset;
        while let Some(o) = cur {
            let (next, _, _, _) = self.read_header(o);
            offsets.push(o);
            cur = if next == 0 { None } else { Some(next as u32) };
        }

        let mut write_offset = 0u32;
        let n = offsets.len();
        for (i, &read_offset) in offsets.iter().enumerate() {
            let (_, msg_type, _, size) = self.read_header(read_offset);
            let block_len = MSG_HEADER_SIZE as u32 + size as u32;
            if write_offset != read_offset {
                self.arena.copy_within(
                    read_offset as usize..read_offset as usize + block_len as usize,
                    write_offset as usize,
                );
            }
            let data_offset = write_offset + MSG_HEADER_SIZE as u32;
            let next = if i + 1 == n { 0 } else { write_offset + block_len };
            self.write_header(write_offset, next, msg_type, data_offset as u64, size as u64);
            write_offset += block_len;
        }
        self.head_offset = if n == 0 { None } else { Some(0) };
    }
}

/// `mq[MQMAX]` plus `mqlock` (spec.md §3 "Global State").
pub struct MqInner {
    queues: [MessageQueue; MQMAX],
}
impl MqInner {
    const fn new() -> MqInner {
        MqInner {
            queues: [MessageQueue::empty(); MQMAX],
        }
    }

    fn slot_by_key(&self, key: i32) -> Option<usize> {
        self.queues.iter().position(|q| q.in_use && q.key == key)
    }

    /// `shmaddcount`'s sibling for message queues: bump refcounts for every
    /// attached slot in `mask`, used to keep a forked child's queues alive.
    pub fn addcount(&mut self, mask: u32) {
        for slot in 0..MQMAX {
            if mask & (1 << slot) != 0 {
                self.queues[slot].refcount += 1;
            }
        }
    }

    fn release_slot(&mut self, slot: usize, plat: &impl Platform) {
        let q = &mut self.queues[slot];
        if !q.in_use || q.refcount == 0 {
            return;
        }
        q.refcount -= 1;
        if q.refcount == 0 {
            if let Some(page) = q.arena_page.take() {
                plat.kfree(page);
            }
            *q = MessageQueue::empty();
        }
    }

    /// `releasemq(key)`.
    pub fn releasemq(&mut self, key: i32, plat: &impl Platform) -> Result<(), KernelError> {
        let slot = self.slot_by_key(key).ok_or(KernelError::NotFound)?;
        self.release_slot(slot, plat);
        Ok(())
    }

    /// `releasemq2(mask)`.
    pub fn releasemq2(&mut self, mask: u32, plat: &impl Platform) {
        for slot in 0..MQMAX {
            if mask & (1 << slot) != 0 {
                self.release_slot(slot, plat);
            }
        }
    }
}

/// Owns `mqlock` and everything it protects.
pub struct MqTable {
    inner: SpinMutex<MqInner>,
}
impl MqTable {
    pub fn new() -> MqTable {
        MqTable {
            inner: SpinMutex::new(MqInner::new()),
        }
    }
    pub fn lock(&self) -> SpinMutexGuard<'_, MqInner> {
        self.inner.lock()
    }
}
impl Default for MqTable {
    fn default() -> Self {
        Self::new()
    }
}

/// `mqget(key)`: attach the caller to the named queue, creating it on first
/// use (spec.md §4.4 "Attachment").
pub fn mqget<Plat: Platform>(
    table: &ProcTable<Plat>,
    mq: &MqTable,
    idx: usize,
    key: i32,
    plat: &Plat,
    log: &dyn KernelLog,
) -> Result<usize, KernelError> {
    let mut guard = mq.lock();
    if let Some(slot) = guard.slot_by_key(key) {
        let mut t = table.tasks[idx].lock();
        if t.mqmask & (1 << slot) == 0 {
            t.mqmask |= 1 << slot;
            guard.queues[slot].refcount += 1;
        }
        log.log_info("mqget: attached existing queue");
        return Ok(slot);
    }

    let slot = guard
        .queues
        .iter()
        .position(|q| !q.in_use)
        .ok_or(KernelError::ResourceExhausted)?;
    let page = match plat.kalloc() {
        Some(p) => p,
        None => return Err(KernelError::ResourceExhausted),
    };
    guard.queues[slot].open(key, page);

    let mut t = table.tasks[idx].lock();
    t.mqmask |= 1 << slot;
    log.log_info("mqget: created new queue");
    Ok(slot)
}

fn check_attached<Plat: Platform>(table: &ProcTable<Plat>, idx: usize, slot: usize) -> Result<(), KernelError> {
    if slot >= MQMAX {
        return Err(KernelError::ArgumentInvalid);
    }
    if table.tasks[idx].lock().mqmask & (1 << slot) == 0 {
        return Err(KernelError::NotAttached);
    }
    Ok(())
}

/// `msgsnd(slot, type, size, data)`: copy the caller's buffer into the
/// kernel, then append it to the queue, blocking while full.
#[allow(clippy::too_many_arguments)]
pub fn msgsnd<Plat: Platform>(
    table: &ProcTable<Plat>,
    mq: &MqTable,
    idx: usize,
    cpu: &mut crate::proc::cpu::Cpu,
    slot: usize,
    msg_type: i64,
    size: usize,
    user_ptr: VirtAddr,
    plat: &Plat,
    log: &dyn KernelLog,
) -> Result<(), KernelError> {
    check_attached(table, idx, slot)?;
    if size > MAX_MSG_PAYLOAD {
        return Err(KernelError::ArgumentInvalid);
    }

    let pagetable = table.tasks[idx].lock().pagetable.ok_or(KernelError::ArgumentInvalid)?;
    let mut buf = [0u8; MAX_MSG_PAYLOAD];
    plat.copyin(pagetable, &mut buf[..size], user_ptr)?;

    loop {
        if table.is_killed(idx) {
            return Err(KernelError::Killed);
        }
        let mut guard = mq.lock();
        match guard.queues[slot].try_send(msg_type, &buf[..size])? {
            SendOutcome::Sent => {
                drop(guard);
                wakeup(&table.tasks, receiver_channel(slot));
                log.log_info("msgsnd: delivered");
                return Ok(());
            }
            SendOutcome::Full => {
                log.log_warn("msgsnd: queue full, blocking");
                scheduler::sleep(table, cpu, idx, sender_channel(slot), move || drop(guard), plat);
            }
        }
    }
}

/// `msgrcv(slot, type, size, user_buf)`: wait for a matching message, copy
/// it out, and compact the arena.
#[allow(clippy::too_many_arguments)]
pub fn msgrcv<Plat: Platform>(
    table: &ProcTable<Plat>,
    mq: &MqTable,
    idx: usize,
    cpu: &mut crate::proc::cpu::Cpu,
    slot: usize,
    msg_type: i64,
    size: usize,
    user_ptr: VirtAddr,
    plat: &Plat,
    log: &dyn KernelLog,
) -> Result<usize, KernelError> {
    check_attached(table, idx, slot)?;
    if size > MAX_MSG_PAYLOAD {
        return Err(KernelError::ArgumentInvalid);
    }

    loop {
        if table.is_killed(idx) {
            return Err(KernelError::Killed);
        }
        let mut guard = mq.lock();
        let mut out = [0u8; MAX_MSG_PAYLOAD];
        match guard.queues[slot].try_receive(msg_type, &mut out[..size]) {
            ReceiveOutcome::Received(n) => {
                drop(guard);
                let pagetable = table.tasks[idx].lock().pagetable.ok_or(KernelError::ArgumentInvalid)?;
                plat.copyout(pagetable, user_ptr, &out[..n])?;
                wakeup(&table.tasks, sender_channel(slot));
                log.log_info("msgrcv: received");
                return Ok(n);
            }
            ReceiveOutcome::NoMatch => {
                log.log_warn("msgrcv: no match, blocking");
                scheduler::sleep(table, cpu, idx, receiver_channel(slot), move || drop(guard), plat);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{log::NullLog, mock_platform::MockPlatform, proc::cpu::Cpu, proc::table::ProcTable};

    fn setup() -> (ProcTable<MockPlatform>, MqTable, MockPlatform) {
        (ProcTable::new(), MqTable::new(), MockPlatform::new())
    }

    #[test]
    fn mqget_twice_returns_same_slot_and_increments_refcount_once() {
        let (table, mq, plat) = setup();
        let idx = table.alloc(&plat, &NullLog).unwrap();

        let s1 = mqget(&table, &mq, idx, 42, &plat, &NullLog).unwrap();
        let s2 = mqget(&table, &mq, idx, 42, &plat, &NullLog).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(mq.lock().queues[s1].refcount, 1);
    }

    #[test]
    fn send_then_receive_round_trips_payload() {
        let (table, mq, plat) = setup();
        let idx = table.alloc(&plat, &NullLog).unwrap();
        let mut cpu = Cpu::new(0);
        let slot = mqget(&table, &mq, idx, 7, &plat, &NullLog).unwrap();

        let pt = table.tasks[idx].lock().pagetable.unwrap();
        plat.mappages(pt, 0x2000, 4096, plat.kalloc().unwrap(), crate::platform::perm::READ | crate::platform::perm::WRITE).unwrap();
        for (i, b) in b"hello".iter().enumerate() {
            plat.poke_byte(pt, 0x2000 + i as u64, *b);
        }

        msgsnd(&table, &mq, idx, &mut cpu, slot, 1, 5, 0x2000, &plat, &NullLog).unwrap();
        assert_eq!(mq.lock().queues[slot].cur_bytes as usize, MQ_SENTINEL_BYTES + 32 + 5);

        let n = msgrcv(&table, &mq, idx, &mut cpu, slot, 1, 5, 0x2100, &plat, &NullLog).unwrap();
        assert_eq!(n, 5);
        let mut out = [0u8; 5];
        for (i, b) in out.iter_mut().enumerate() {
            *b = plat.peek_byte(pt, 0x2100 + i as u64).unwrap();
        }
        assert_eq!(&out, b"hello");
        assert_eq!(mq.lock().queues[slot].cur_bytes as usize, MQ_SENTINEL_BYTES);
    }

    #[test]
    fn oversize_send_is_rejected_not_blocked() {
        let (table, mq, plat) = setup();
        let idx = table.alloc(&plat, &NullLog).unwrap();
        let mut cpu = Cpu::new(0);
        let slot = mqget(&table, &mq, idx, 1, &plat, &NullLog).unwrap();
        let pt = table.tasks[idx].lock().pagetable.unwrap();
        plat.mappages(pt, 0x3000, 4096, plat.kalloc().unwrap(), crate::platform::perm::READ).unwrap();

        let result = msgsnd(&table, &mq, idx, &mut cpu, slot, 1, MAX_MSG_PAYLOAD, 0x3000, &plat, &NullLog);
        assert_eq!(result, Err(KernelError::ArgumentInvalid));
    }

    #[test]
    fn releasemq2_drops_refcount_to_zero_and_frees_page() {
        let (table, mq, plat) = setup();
        let idx = table.alloc(&plat, &NullLog).unwrap();
        let slot = mqget(&table, &mq, idx, 3, &plat, &NullLog).unwrap();
        let mask = 1u32 << slot;

        mq.lock().releasemq2(mask, &plat);
        assert!(!mq.lock().queues[slot].in_use);
    }

    #[test]
    fn reloc_preserves_order_and_total_bytes_after_middle_delete() {
        let (table, mq, plat) = setup();
        let idx = table.alloc(&plat, &NullLog).unwrap();
        let mut cpu = Cpu::new(0);
        let slot = mqget(&table, &mq, idx, 9, &plat, &NullLog).unwrap();
        let pt = table.tasks[idx].lock().pagetable.unwrap();
        plat.mappages(pt, 0x4000, 4096, plat.kalloc().unwrap(), crate::platform::perm::READ | crate::platform::perm::WRITE).unwrap();
        for i in 0..4u8 {
            plat.poke_byte(pt, 0x4000 + i as u64, i);
        }

        msgsnd(&table, &mq, idx, &mut cpu, slot, 1, 4, 0x4000, &plat, &NullLog).unwrap();
        msgsnd(&table, &mq, idx, &mut cpu, slot, 2, 4, 0x4000, &plat, &NullLog).unwrap();
        msgsnd(&table, &mq, idx, &mut cpu, slot, 3, 4, 0x4000, &plat, &NullLog).unwrap();

        // Remove the middle (type 2) message; reloc then runs automatically.
        msgrcv(&table, &mq, idx, &mut cpu, slot, 2, 4, 0x4100, &plat, &NullLog).unwrap();

        let before = mq.lock().queues[slot].cur_bytes;
        // type 1 then type 3 should still come out in that order.
        msgrcv(&table, &mq, idx, &mut cpu, slot, 1, 4, 0x4100, &plat, &NullLog).unwrap();
        msgrcv(&table, &mq, idx, &mut cpu, slot, 3, 4, 0x4100, &plat, &NullLog).unwrap();
        assert_eq!(before, (MQ_SENTINEL_BYTES + 2 * 36) as u32);
    }
}
