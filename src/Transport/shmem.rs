// Shared-memory SPSC channel: a fixed-depth ring inside one segment obtained
// from the SharedMemManager.

use std::sync::Arc;

use crossbeam_utils::Backoff;
use tracing::{debug, trace};

use super::endpoint::EndpointState;
use super::Buffer::layout::{CLOSED_BY_RECEIVER, CLOSED_BY_SENDER, FLAG_SPSC};
use super::Buffer::RingBuffer;
use super::ChannelInfo;
use crate::error::{MessagingError, Result};
use crate::Core::SharedSegment;
use crate::Structs::Metadata;

#[derive(Debug)]
struct ShmemShared {
    info: ChannelInfo,
    segment: SharedSegment,
}

impl ShmemShared {
    /// # Safety
    /// `base`/`len` must come from `self.segment.with`.
    unsafe fn ring(&self, base: *mut u8, len: usize) -> Result<RingBuffer> {
        RingBuffer::attach(base, len)
            .ok_or_else(|| MessagingError::channel_init(&self.info.name, "ring not initialised"))
    }
}

enum Step {
    Ready(Vec<Vec<u8>>),
    Empty,
    Closed,
}

/// A ring-buffer channel over shared memory
#[derive(Clone, Debug)]
pub struct ShmemChannel {
    send: ShmemSendPort,
    recv: ShmemRecvPort,
}

impl ShmemChannel {
    /// Lay out a fresh ring in `segment`. The segment must be at least
    /// `RingBuffer::region_size(info.capacity, info.slot_size)` bytes.
    pub(crate) fn create(info: ChannelInfo, segment: SharedSegment) -> Result<Self> {
        let needed = RingBuffer::region_size(info.capacity, info.slot_size);
        segment.with(|base, len| {
            if len < needed {
                return Err(MessagingError::channel_init(
                    &info.name,
                    format!("segment holds {} bytes, ring needs {}", len, needed),
                ));
            }
            unsafe { RingBuffer::init(base, info.capacity, info.slot_size, FLAG_SPSC) };
            Ok(())
        })??;

        debug!(
            channel = %info.name,
            segment = %segment.name(),
            capacity = info.capacity,
            slot_size = info.slot_size,
            "created shared memory channel"
        );

        let shared = Arc::new(ShmemShared { info, segment });
        Ok(Self {
            send: ShmemSendPort {
                shared: Arc::clone(&shared),
                state: Arc::new(EndpointState::default()),
            },
            recv: ShmemRecvPort {
                shared,
                state: Arc::new(EndpointState::default()),
            },
        })
    }

    pub fn info(&self) -> &ChannelInfo {
        &self.send.shared.info
    }

    pub fn get_send_port(&self) -> ShmemSendPort {
        self.send.clone()
    }

    pub fn get_recv_port(&self) -> ShmemRecvPort {
        self.recv.clone()
    }

    /// Segment backing the ring
    pub fn segment(&self) -> &SharedSegment {
        &self.send.shared.segment
    }
}

/// Send side of a [`ShmemChannel`]
#[derive(Clone, Debug)]
pub struct ShmemSendPort {
    shared: Arc<ShmemShared>,
    state: Arc<EndpointState>,
}

impl ShmemSendPort {
    pub fn info(&self) -> &ChannelInfo {
        &self.shared.info
    }

    pub fn start(&self) -> Result<()> {
        // fails with UseAfterRelease if the manager already tore the segment down
        self.shared.segment.with(|_, _| ())?;
        if self.state.start(&self.shared.info.name)? {
            debug!(channel = %self.shared.info.name, "send port started");
        }
        Ok(())
    }

    /// True if there is room for one more message
    pub fn probe(&self) -> Result<bool> {
        self.state.check_usable(&self.shared.info.name)?;
        self.shared.segment.with(|base, len| {
            let ring = unsafe { self.shared.ring(base, len)? };
            Ok(ring.len() < ring.capacity())
        })?
    }

    pub fn send(&self, message: &Metadata) -> Result<bool> {
        self.send_batch(std::slice::from_ref(message))
    }

    /// Publish all messages in one cursor advance, or none of them
    pub fn send_batch(&self, messages: &[Metadata]) -> Result<bool> {
        let name = &self.shared.info.name;
        self.state.check_usable(name)?;
        if messages.len() > self.shared.info.capacity {
            return Err(MessagingError::channel_init(
                name.as_str(),
                format!(
                    "batch of {} messages can never fit a ring of depth {}",
                    messages.len(),
                    self.shared.info.capacity
                ),
            ));
        }

        let encoded: Vec<Vec<u8>> = messages.iter().map(Metadata::encode).collect();
        if let Some(big) = encoded.iter().find(|b| b.len() > self.shared.info.slot_size) {
            return Err(MessagingError::message_too_large(
                big.len(),
                self.shared.info.slot_size,
            ));
        }
        let refs: Vec<&[u8]> = encoded.iter().map(Vec::as_slice).collect();

        self.shared.segment.with(|base, len| {
            let ring = unsafe { self.shared.ring(base, len)? };
            if ring.closed_by(CLOSED_BY_RECEIVER) {
                return Err(MessagingError::channel_closed(name.as_str()));
            }
            if !ring.try_push_batch(&refs) {
                trace!(channel = %name, "ring full");
                return Ok(false);
            }
            ring.signal_consumer();
            Ok(true)
        })?
    }

    /// Mark the channel closed for the receiver. Idempotent.
    pub fn join(&self) -> Result<()> {
        if self.state.join() {
            // segment may already be gone if the manager stopped first
            let _ = self.shared.segment.with(|base, len| {
                if let Ok(ring) = unsafe { self.shared.ring(base, len) } {
                    ring.close(CLOSED_BY_SENDER);
                }
            });
            debug!(channel = %self.shared.info.name, "send port joined");
        }
        Ok(())
    }
}

/// Receive side of a [`ShmemChannel`]
#[derive(Clone, Debug)]
pub struct ShmemRecvPort {
    shared: Arc<ShmemShared>,
    state: Arc<EndpointState>,
}

impl ShmemRecvPort {
    pub fn info(&self) -> &ChannelInfo {
        &self.shared.info
    }

    pub fn start(&self) -> Result<()> {
        self.shared.segment.with(|_, _| ())?;
        if self.state.start(&self.shared.info.name)? {
            debug!(channel = %self.shared.info.name, "recv port started");
        }
        Ok(())
    }

    /// True if a message is waiting
    pub fn probe(&self) -> Result<bool> {
        self.state.check_usable(&self.shared.info.name)?;
        self.shared.segment.with(|base, len| {
            let ring = unsafe { self.shared.ring(base, len)? };
            Ok(!ring.is_empty())
        })?
    }

    pub fn recv(&self) -> Result<Metadata> {
        let mut taken = self.wait(1, true)?;
        taken
            .pop()
            .ok_or_else(|| MessagingError::channel_closed(self.shared.info.name.as_str()))
    }

    pub fn peek(&self) -> Result<Metadata> {
        let mut peeked = self.peek_batch(1)?;
        peeked
            .pop()
            .ok_or_else(|| MessagingError::channel_closed(self.shared.info.name.as_str()))
    }

    /// Block until `count` messages are queued and copy them, oldest first,
    /// without consuming any
    pub fn peek_batch(&self, count: usize) -> Result<Vec<Metadata>> {
        self.wait(count, false)
    }

    fn wait(&self, count: usize, consume: bool) -> Result<Vec<Metadata>> {
        let name = &self.shared.info.name;
        if count > self.shared.info.capacity {
            return Err(MessagingError::channel_init(
                name,
                format!(
                    "cannot wait for {} messages in a ring of {}",
                    count, self.shared.info.capacity
                ),
            ));
        }
        let poll = crate::config::runtime().recv_poll;
        let backoff = Backoff::new();
        loop {
            self.state.check_usable(name)?;
            let step = self.shared.segment.with(|base, len| {
                let ring = unsafe { self.shared.ring(base, len)? };
                let seen = ring.signal_seen();
                if ring.len() >= count {
                    let batch = if consume {
                        (0..count).filter_map(|_| ring.try_pop()).collect()
                    } else {
                        (0..count).filter_map(|i| ring.peek_at(i)).collect()
                    };
                    return Ok(Step::Ready(batch));
                }
                if ring.closed_by(CLOSED_BY_SENDER) {
                    return Ok(Step::Closed);
                }
                if backoff.is_completed() {
                    ring.wait_for_data(seen, poll);
                } else {
                    backoff.snooze();
                }
                Ok(Step::Empty)
            })??;

            match step {
                Step::Ready(batch) => {
                    trace!(channel = %name, count = batch.len(), "received");
                    return batch.iter().map(|bytes| Metadata::decode(bytes)).collect();
                }
                Step::Closed => return Err(MessagingError::channel_closed(name.as_str())),
                Step::Empty => continue,
            }
        }
    }

    /// Stop receiving; the sender's next `send` fails with ChannelClosed.
    pub fn join(&self) -> Result<()> {
        if self.state.join() {
            let _ = self.shared.segment.with(|base, len| {
                if let Ok(ring) = unsafe { self.shared.ring(base, len) } {
                    ring.close(CLOSED_BY_RECEIVER);
                }
            });
            debug!(channel = %self.shared.info.name, "recv port joined");
        }
        Ok(())
    }
}
