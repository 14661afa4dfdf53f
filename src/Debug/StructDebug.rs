use std::fmt;

use crate::Actors::ActorHandle;
use crate::Core::alloc::{SharedMemManager, SharedSegment};
use crate::Transport::Buffer::RingBuffer;

/// Debug function for SharedMemManager
///
/// Shows:
/// - Name prefix and owning pid
/// - Live segment count and mapped bytes
/// - Whether `stop` has run
pub fn debug_shared_mem_manager(
    manager: &SharedMemManager,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    f.debug_struct("SharedMemManager")
        .field("prefix", &manager.prefix())
        .field("owner_pid", &manager.owner_pid())
        .field("segments", &manager.segment_count())
        .field("total_bytes", &manager.total_bytes())
        .field("next_segment_id", &manager.next_segment_id())
        .field("stopped", &manager.is_stopped())
        .finish()
}

/// Debug function for SharedSegment
///
/// Never dereferences the mapping, so it is safe on released handles
pub fn debug_shared_segment(segment: &SharedSegment, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SharedSegment")
        .field("name", &segment.name())
        .field("size", &segment.size())
        .field("owned", &segment.is_owned())
        .field("released", &segment.is_released())
        .finish()
}

/// Debug function for RingBuffer
///
/// Reads the cursors through the header, so only call it on a live view
pub fn debug_ring_buffer(ring: &RingBuffer, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RingBuffer")
        .field("header", &format_args!("{:p}", ring.header))
        .field("capacity", &ring.capacity())
        .field("slot_size", &ring.slot_size())
        .field("len", &ring.len())
        .field("keep_last", &ring.is_keep_last())
        .field("closed", &format_args!("{:#b}", ring.closed_bits()))
        .finish()
}

pub fn debug_actor_handle(handle: &ActorHandle, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ActorHandle")
        .field("id", &handle.id())
        .field("pid", &handle.pid())
        .field("status", &handle.status())
        .finish_non_exhaustive()
}
