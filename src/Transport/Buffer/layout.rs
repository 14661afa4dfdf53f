use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU32, AtomicU64};

/// Identifies an initialised ring ("DMXP_RNG")
pub const RING_MAGIC: u64 = 0x444D58505F524E47;

/// Version of the in-segment layout
pub const RING_VERSION: u32 = 1;

/// Ring is a strict SPSC queue; a full ring rejects writes
pub const FLAG_SPSC: u32 = 0;

/// Ring keeps the newest `capacity` messages; a full ring evicts the oldest
pub const FLAG_KEEP_LAST: u32 = 1;

/// Bits of `RingHeader::closed`
pub const CLOSED_BY_SENDER: u32 = 1;
pub const CLOSED_BY_RECEIVER: u32 = 2;

/// Control block at the start of a ring's segment.
///
/// Cursors are monotonically increasing message counts; the slot of
/// message `n` is `n % capacity`. Only the sender stores `tail`. In SPSC
/// mode only the receiver stores `head`; in keep-last mode the sender may
/// also advance `head` (by CAS) to evict.
#[repr(C, align(128))]
pub struct RingHeader {
    /// Written last (Release) by the creator; attachers wait for it
    pub magic: AtomicU64,

    /// The version of the memory layout.
    pub version: u32,

    /// `FLAG_SPSC` or `FLAG_KEEP_LAST`
    pub flags: u32,

    /// Number of slots
    pub capacity: u64,

    /// Largest encoded message a slot can hold, in bytes
    pub slot_size: u64,

    /// Futex word bumped on every publish and on close
    pub signal: AtomicU32,

    /// `CLOSED_BY_*` bits
    pub closed: AtomicU32,

    /// Total samples evicted in keep-last mode
    pub evicted: AtomicU64,

    /// Producer cursor, padded to prevent false sharing with `head`
    pub tail: CachePadded<AtomicU64>,

    /// Consumer cursor
    pub head: CachePadded<AtomicU64>,
}

/// Per-slot prefix; the encoded message follows it.
#[repr(C)]
pub struct SlotHeader {
    /// Encoded length of the message in this slot
    pub len: u64,

    /// Keep-last mode seqlock: `2n + 1` while message `n` is being written,
    /// `2n + 2` once it is complete. Unused in SPSC mode.
    pub stamp: AtomicU64,
}
