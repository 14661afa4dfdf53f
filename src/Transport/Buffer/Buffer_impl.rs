use std::mem::size_of;
use std::ptr;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::atomic::{fence, AtomicU32, AtomicU64};
use std::time::Duration;

use crossbeam_utils::CachePadded;

use super::layout::{RingHeader, SlotHeader, FLAG_KEEP_LAST, RING_MAGIC, RING_VERSION};
use super::Buffer::{RingBuffer, SLOT_ALIGN};
use crate::Core::futex::{futex_wait_timeout, futex_wake_all};

impl RingBuffer {
    /// Size in bytes of one slot stride in memory.
    #[inline]
    pub fn slot_stride(slot_size: usize) -> usize {
        (size_of::<SlotHeader>() + slot_size + SLOT_ALIGN - 1) & !(SLOT_ALIGN - 1)
    }

    /// Size of the control block; slots start right after it.
    #[inline]
    pub fn header_size() -> usize {
        size_of::<RingHeader>()
    }

    /// Bytes a segment needs to hold a ring of this geometry.
    pub fn region_size(capacity: usize, slot_size: usize) -> usize {
        Self::header_size() + capacity * Self::slot_stride(slot_size)
    }

    /// Write a fresh control block and empty slots, then publish the magic.
    /// This should ONLY be called by the creator of the segment.
    ///
    /// # Safety
    /// `base` must be valid and writable for `region_size(capacity, slot_size)`
    /// bytes and aligned to 128.
    pub unsafe fn init(base: *mut u8, capacity: usize, slot_size: usize, flags: u32) -> Self {
        let header = base as *mut RingHeader;
        ptr::write(
            header,
            RingHeader {
                magic: AtomicU64::new(0),
                version: RING_VERSION,
                flags,
                capacity: capacity as u64,
                slot_size: slot_size as u64,
                signal: AtomicU32::new(0),
                closed: AtomicU32::new(0),
                evicted: AtomicU64::new(0),
                tail: CachePadded::new(AtomicU64::new(0)),
                head: CachePadded::new(AtomicU64::new(0)),
            },
        );

        let ring = Self::view(base, capacity, slot_size);
        for k in 0..capacity as u64 {
            ptr::write(
                ring.slot_header(k),
                SlotHeader {
                    len: 0,
                    stamp: AtomicU64::new(0),
                },
            );
        }

        (*header).magic.store(RING_MAGIC, Release);
        ring
    }

    /// View an existing ring. Returns None if the segment has not been
    /// initialised yet or its geometry does not fit in `len` bytes.
    ///
    /// # Safety
    /// `base` must be valid for reads and writes of `len` bytes.
    pub unsafe fn attach(base: *mut u8, len: usize) -> Option<Self> {
        if len < Self::header_size() {
            return None;
        }
        let header = &*(base as *const RingHeader);
        if header.magic.load(Acquire) != RING_MAGIC || header.version != RING_VERSION {
            return None;
        }
        let capacity = header.capacity as usize;
        let slot_size = header.slot_size as usize;
        if capacity == 0 || Self::region_size(capacity, slot_size) > len {
            return None;
        }
        Some(Self::view(base, capacity, slot_size))
    }

    unsafe fn view(base: *mut u8, capacity: usize, slot_size: usize) -> Self {
        Self {
            header: base as *const RingHeader,
            slots: base.add(Self::header_size()),
            capacity: capacity as u64,
            slot_size,
            stride: Self::slot_stride(slot_size),
        }
    }

    #[inline]
    fn header(&self) -> &RingHeader {
        // Safety: the view only exists while the mapping is alive
        unsafe { &*self.header }
    }

    #[inline]
    unsafe fn slot_header(&self, seq: u64) -> *mut SlotHeader {
        let index = (seq % self.capacity) as usize;
        self.slots.add(index * self.stride) as *mut SlotHeader
    }

    #[inline]
    unsafe fn slot_data(&self, seq: u64) -> *mut u8 {
        (self.slot_header(seq) as *mut u8).add(size_of::<SlotHeader>())
    }

    unsafe fn write_slot(&self, seq: u64, bytes: &[u8]) {
        let slot = self.slot_header(seq);
        ptr::write_volatile(ptr::addr_of_mut!((*slot).len), bytes.len() as u64);
        ptr::copy_nonoverlapping(bytes.as_ptr(), self.slot_data(seq), bytes.len());
    }

    unsafe fn read_slot(&self, seq: u64) -> Vec<u8> {
        let slot = self.slot_header(seq);
        let len = (ptr::read_volatile(ptr::addr_of!((*slot).len)) as usize).min(self.slot_size);
        let mut out = vec![0u8; len];
        ptr::copy_nonoverlapping(self.slot_data(seq), out.as_mut_ptr(), len);
        out
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Largest encoded message one slot accepts
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn is_keep_last(&self) -> bool {
        self.header().flags & FLAG_KEEP_LAST != 0
    }

    /// Messages published and not yet consumed
    pub fn len(&self) -> usize {
        let h = self.header();
        let head = h.head.load(Acquire);
        let tail = h.tail.load(Acquire);
        tail.saturating_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples dropped by keep-last eviction so far
    pub fn evicted(&self) -> u64 {
        self.header().evicted.load(Relaxed)
    }

    // ---------------------------------------------------------------------
    // SPSC mode
    // ---------------------------------------------------------------------

    /// Publish one message. Returns false if the ring is full.
    pub fn try_push(&self, bytes: &[u8]) -> bool {
        self.try_push_batch(&[bytes])
    }

    /// Publish all messages or none of them.
    /// Returns false if the ring does not have room for the whole batch.
    pub fn try_push_batch(&self, messages: &[&[u8]]) -> bool {
        if messages.iter().any(|m| m.len() > self.slot_size) {
            return false;
        }
        let h = self.header();
        // Only the sender stores tail
        let tail = h.tail.load(Relaxed);
        // Pairs with the receiver's Release on head: the slot is no longer being read
        let head = h.head.load(Acquire);
        let used = tail.saturating_sub(head);
        if used + messages.len() as u64 > self.capacity {
            return false;
        }

        for (i, bytes) in messages.iter().enumerate() {
            unsafe { self.write_slot(tail + i as u64, bytes) };
        }

        // Publish: slot contents happen-before the cursor advance
        h.tail.store(tail + messages.len() as u64, Release);
        true
    }

    /// Take the oldest message, or None if the ring is empty.
    pub fn try_pop(&self) -> Option<Vec<u8>> {
        let h = self.header();
        let head = h.head.load(Relaxed);
        let tail = h.tail.load(Acquire);
        if head >= tail {
            return None;
        }
        let bytes = unsafe { self.read_slot(head) };
        // free slot for the sender
        h.head.store(head + 1, Release);
        Some(bytes)
    }

    /// Copy the oldest message without consuming it.
    pub fn peek(&self) -> Option<Vec<u8>> {
        self.peek_at(0)
    }

    /// Copy the message `offset` places behind the oldest one.
    pub fn peek_at(&self, offset: usize) -> Option<Vec<u8>> {
        let h = self.header();
        let seq = h.head.load(Relaxed) + offset as u64;
        let tail = h.tail.load(Acquire);
        if seq >= tail {
            return None;
        }
        Some(unsafe { self.read_slot(seq) })
    }

    // ---------------------------------------------------------------------
    // Keep-last mode
    // ---------------------------------------------------------------------

    /// Publish, evicting the oldest unconsumed sample if the ring is full.
    /// Returns true if a sample was evicted.
    pub fn publish_evicting(&self, bytes: &[u8]) -> bool {
        let h = self.header();
        let tail = h.tail.load(Relaxed);
        let mut evicted = false;
        loop {
            let head = h.head.load(Acquire);
            if tail.saturating_sub(head) < self.capacity {
                break;
            }
            if h
                .head
                .compare_exchange(head, head + 1, AcqRel, Acquire)
                .is_ok()
            {
                h.evicted.fetch_add(1, Relaxed);
                evicted = true;
                break;
            }
            // reader consumed concurrently; re-check
        }

        unsafe {
            let slot = self.slot_header(tail);
            (*slot).stamp.store(2 * tail + 1, Relaxed);
            fence(Release);
            self.write_slot(tail, bytes);
            (*slot).stamp.store(2 * tail + 2, Release);
        }
        h.tail.store(tail + 1, Release);
        evicted
    }

    /// Take the oldest retained sample.
    pub fn take_history(&self) -> Option<Vec<u8>> {
        self.read_history(true, 0)
    }

    /// Copy the retained sample `offset` places behind the oldest one
    /// without consuming anything.
    pub fn peek_history(&self, offset: usize) -> Option<Vec<u8>> {
        self.read_history(false, offset)
    }

    fn read_history(&self, consume: bool, offset: usize) -> Option<Vec<u8>> {
        let h = self.header();
        loop {
            let head = h.head.load(Acquire);
            let tail = h.tail.load(Acquire);
            let seq = head + offset as u64;
            if seq >= tail {
                return None;
            }
            let expected = 2 * seq + 2;
            let slot = unsafe { self.slot_header(seq) };
            let before = unsafe { (*slot).stamp.load(Acquire) };
            if before != expected {
                // evicted and being overwritten; head has moved on
                std::hint::spin_loop();
                continue;
            }
            let bytes = unsafe { self.read_slot(seq) };
            fence(Acquire);
            let after = unsafe { (*slot).stamp.load(Relaxed) };
            if after != expected {
                continue;
            }
            if consume
                && h
                    .head
                    .compare_exchange(head, head + 1, AcqRel, Acquire)
                    .is_err()
            {
                continue;
            }
            return Some(bytes);
        }
    }

    // ---------------------------------------------------------------------
    // Close and wakeup
    // ---------------------------------------------------------------------

    /// Mark one side as gone and wake any blocked receiver.
    pub fn close(&self, side: u32) {
        self.header().closed.fetch_or(side, AcqRel);
        self.signal_consumer();
    }

    pub fn closed_by(&self, side: u32) -> bool {
        self.header().closed.load(Acquire) & side != 0
    }

    pub fn closed_bits(&self) -> u32 {
        self.header().closed.load(Acquire)
    }

    /// Current signal value; read before checking for data so a publish in
    /// between is not missed by `wait_for_data`.
    pub fn signal_seen(&self) -> u32 {
        self.header().signal.load(Acquire)
    }

    /// Signal consumers that new data is available
    pub fn signal_consumer(&self) {
        let signal = &self.header().signal;
        signal.fetch_add(1, Release);
        futex_wake_all(signal);
    }

    /// Wait for new data, at most `timeout`
    pub fn wait_for_data(&self, seen: u32, timeout: Duration) {
        futex_wait_timeout(&self.header().signal, seen, timeout);
    }
}
