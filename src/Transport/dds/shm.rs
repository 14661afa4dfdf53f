// Keep-last topic over a named /dev/shm segment. Both endpoints open the
// segment by topic name; whoever creates it lays out the ring.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{Delivery, Topic};
use crate::error::{MessagingError, Result};
use crate::Core::{open_or_create_shared_memory, unlink_shared_memory, SharedSegment};
use crate::Transport::Buffer::layout::{CLOSED_BY_RECEIVER, CLOSED_BY_SENDER, FLAG_KEEP_LAST};
use crate::Transport::Buffer::RingBuffer;

const ATTACH_TIMEOUT: Duration = Duration::from_secs(2);
const BOTH_CLOSED: u32 = CLOSED_BY_SENDER | CLOSED_BY_RECEIVER;

/// One endpoint's mapping of a topic segment
#[derive(Debug)]
pub(super) struct ShmTopic {
    segment: SharedSegment,
    side: u32,
}

impl ShmTopic {
    pub(super) fn open(topic: &Topic, side: u32) -> Result<Self> {
        let name = topic.segment_name();
        let depth = topic.info.capacity;
        let slot_size = topic.info.slot_size;
        let size = RingBuffer::region_size(depth, slot_size);
        let deadline = Instant::now() + ATTACH_TIMEOUT;

        loop {
            match open_or_create_shared_memory(&name, size) {
                Ok((shm, true)) => {
                    let segment = SharedSegment::from_backend(shm, false);
                    segment.with(|base, _| unsafe {
                        RingBuffer::init(base, depth, slot_size, FLAG_KEEP_LAST);
                    })?;
                    debug!(topic = %topic.info.name, segment = %name, depth, "created dds topic");
                    return Ok(Self { segment, side });
                }
                Ok((shm, false)) => {
                    let segment = SharedSegment::from_backend(shm, false);
                    let geometry = segment.with(|base, len| {
                        unsafe { RingBuffer::attach(base, len) }
                            .map(|r| (r.capacity(), r.slot_size(), r.is_keep_last(), r.closed_bits()))
                    })?;
                    if let Some((capacity, slot, keep_last, closed)) = geometry {
                        if closed == BOTH_CLOSED {
                            // left behind by a previous run
                            warn!(segment = %name, "removing stale dds topic");
                            segment.release();
                            let _ = unlink_shared_memory(&name);
                            continue;
                        }
                        if capacity != depth || slot != slot_size || !keep_last {
                            return Err(MessagingError::channel_init(
                                &topic.info.name,
                                format!(
                                    "topic exists with depth {} and slot size {}, wanted {} and {}",
                                    capacity, slot, depth, slot_size
                                ),
                            ));
                        }
                        debug!(topic = %topic.info.name, segment = %name, "attached to dds topic");
                        return Ok(Self { segment, side });
                    }
                    // creator has not published the ring yet
                    segment.release();
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::NotFound | std::io::ErrorKind::InvalidData
                    ) => {}
                Err(e) => {
                    return Err(MessagingError::allocation(
                        e,
                        &format!("Failed to open dds topic segment {}", name),
                    ))
                }
            }

            if Instant::now() >= deadline {
                return Err(MessagingError::channel_init(
                    &topic.info.name,
                    "timed out attaching to topic",
                ));
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn ring<R>(&self, f: impl FnOnce(&RingBuffer) -> Result<R>) -> Result<R> {
        self.segment.with(|base, len| {
            let ring = unsafe { RingBuffer::attach(base, len) }.ok_or_else(|| {
                MessagingError::channel_init(self.segment.name(), "topic ring missing")
            })?;
            f(&ring)
        })?
    }

    /// Returns true if the oldest sample was evicted to make room
    pub(super) fn publish(&self, channel: &str, bytes: &[u8]) -> Result<bool> {
        self.ring(|ring| {
            if ring.closed_by(CLOSED_BY_RECEIVER) {
                return Err(MessagingError::channel_closed(channel));
            }
            let evicted = ring.publish_evicting(bytes);
            ring.signal_consumer();
            Ok(evicted)
        })
    }

    pub(super) fn has_sample(&self) -> Result<bool> {
        self.ring(|ring| Ok(!ring.is_empty()))
    }

    /// Samples the writer has evicted so far
    pub(super) fn evicted(&self) -> Result<u64> {
        self.ring(|ring| Ok(ring.evicted()))
    }

    pub(super) fn poll(&self, count: usize, consume: bool, timeout: Duration) -> Result<Delivery> {
        self.ring(|ring| {
            let seen = ring.signal_seen();
            if ring.len() >= count {
                let samples: Vec<Vec<u8>> = if consume {
                    (0..count).filter_map(|_| ring.take_history()).collect()
                } else {
                    (0..count).filter_map(|i| ring.peek_history(i)).collect()
                };
                // an eviction racing a peek can cut the batch short; retry
                if samples.len() == count {
                    return Ok(Delivery::Samples(samples));
                }
            }
            if ring.closed_by(CLOSED_BY_SENDER) && ring.len() < count {
                return Ok(Delivery::Closed);
            }
            ring.wait_for_data(seen, timeout);
            Ok(Delivery::Empty)
        })
    }

    /// Close this side. The last side out removes the topic name.
    pub(super) fn close(&self) {
        let name = self.segment.name().to_string();
        let last = self
            .segment
            .with(|base, len| match unsafe { RingBuffer::attach(base, len) } {
                Some(ring) => {
                    ring.close(self.side);
                    ring.closed_bits() == BOTH_CLOSED
                }
                None => false,
            })
            .unwrap_or(false);
        if last {
            if let Err(e) = unlink_shared_memory(&name) {
                warn!(segment = %name, error = %e, "failed to unlink dds topic");
            }
        }
        self.segment.release();
    }
}
