// Ring buffer view over one channel's shared-memory segment

use super::layout::RingHeader;

/// Slot stride alignment in bytes
pub const SLOT_ALIGN: usize = 64;

/// A transient view over a ring that lives in shared memory.
///
/// This struct is NOT stored in shared memory. It holds raw pointers into a
/// mapping and must only be used while that mapping is alive (in practice,
/// inside `SharedSegment::with`).
///
/// ### Concurrency Design:
/// - **Sender**: writes slot `tail % capacity`, then publishes by storing
///   `tail + 1` with Release, so the slot bytes are visible before the cursor.
/// - **Receiver**: loads `tail` with Acquire, reads slot `head % capacity`,
///   then frees it by storing `head + 1` with Release.
pub struct RingBuffer {
    /// Pointer to the control block at the start of the segment.
    pub(crate) header: *const RingHeader,

    /// Pointer to slot 0.
    pub(crate) slots: *mut u8,

    /// Number of slots.
    pub(crate) capacity: u64,

    /// Payload bytes per slot.
    pub(crate) slot_size: usize,

    /// Distance between consecutive slots.
    pub(crate) stride: usize,
}

unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::Debug::StructDebug::debug_ring_buffer(self, f)
    }
}
