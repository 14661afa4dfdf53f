//! DDS-style point-to-point topics.
//!
//! A [`DdsChannel`] is one named topic with a keep-last history of `depth`
//! samples. Endpoints discover each other by topic name when they start, so
//! the two sides may live in different processes that never shared a
//! handle. Publishing never blocks: when the history is full the oldest
//! unconsumed sample is evicted.

mod shm;
mod udp;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use self::shm::ShmTopic;
use self::udp::{UdpReader, UdpWriter};
use super::endpoint::EndpointState;
use super::Buffer::layout::{CLOSED_BY_RECEIVER, CLOSED_BY_SENDER};
use super::ChannelInfo;
use crate::error::{MessagingError, Result};
use crate::Structs::Metadata;

/// How samples travel between the two endpoints
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DdsTransport {
    /// Named shared-memory segment, same host
    Shm,
    /// Loopback datagrams
    Udp,
}

/// Data-distribution implementation a topic belongs to. Topics of different
/// backends never see each other.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DdsBackend {
    FastDds,
    CycloneDds,
}

impl DdsBackend {
    pub fn tag(self) -> &'static str {
        match self {
            DdsBackend::FastDds => "fastdds",
            DdsBackend::CycloneDds => "cyclonedds",
        }
    }
}

impl fmt::Display for DdsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

pub(super) enum Delivery {
    Samples(Vec<Vec<u8>>),
    Empty,
    Closed,
}

#[derive(Debug)]
pub(super) struct Topic {
    info: ChannelInfo,
    transport: DdsTransport,
    backend: DdsBackend,
}

impl Topic {
    fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.backend.tag().as_bytes());
        hasher.update(b"/");
        hasher.update(self.info.name.as_bytes());
        hasher.finalize().into()
    }

    /// /dev/shm name for the shared-memory transport
    fn segment_name(&self) -> String {
        let hex: String = self.digest()[..8].iter().map(|b| format!("{:02x}", b)).collect();
        format!(
            "{}_dds_{}_{}",
            crate::config::runtime().shm_prefix,
            self.backend.tag(),
            hex
        )
    }
}

#[derive(Debug)]
enum Writer {
    Shm(ShmTopic),
    Udp(UdpWriter),
}

#[derive(Debug)]
enum Reader {
    Shm(ShmTopic),
    Udp(UdpReader),
}

/// A keep-last topic used as a 1:1 channel
#[derive(Clone, Debug)]
pub struct DdsChannel {
    send: DdsSendPort,
    recv: DdsRecvPort,
}

impl DdsChannel {
    pub(crate) fn new(info: ChannelInfo, transport: DdsTransport, backend: DdsBackend) -> Self {
        let topic = Arc::new(Topic {
            info,
            transport,
            backend,
        });
        Self {
            send: DdsSendPort {
                topic: Arc::clone(&topic),
                state: Arc::new(EndpointState::default()),
                link: Arc::new(Mutex::new(None)),
            },
            recv: DdsRecvPort {
                topic,
                state: Arc::new(EndpointState::default()),
                link: Arc::new(Mutex::new(None)),
            },
        }
    }

    pub fn info(&self) -> &ChannelInfo {
        &self.send.topic.info
    }

    pub fn transport(&self) -> DdsTransport {
        self.send.topic.transport
    }

    pub fn dds_backend(&self) -> DdsBackend {
        self.send.topic.backend
    }

    /// History depth
    pub fn depth(&self) -> usize {
        self.send.topic.info.capacity
    }

    pub fn get_send_port(&self) -> DdsSendPort {
        self.send.clone()
    }

    pub fn get_recv_port(&self) -> DdsRecvPort {
        self.recv.clone()
    }
}

/// Publishing side of a [`DdsChannel`]
#[derive(Clone, Debug)]
pub struct DdsSendPort {
    topic: Arc<Topic>,
    state: Arc<EndpointState>,
    link: Arc<Mutex<Option<Writer>>>,
}

impl DdsSendPort {
    pub fn info(&self) -> &ChannelInfo {
        &self.topic.info
    }

    /// Create or attach the topic. Idempotent.
    pub fn start(&self) -> Result<()> {
        let name = &self.topic.info.name;
        if self.state.is_joined() {
            return Err(MessagingError::channel_closed(name.as_str()));
        }
        let mut link = self.link.lock();
        if link.is_none() {
            *link = Some(match self.topic.transport {
                DdsTransport::Shm => Writer::Shm(ShmTopic::open(&self.topic, CLOSED_BY_SENDER)?),
                DdsTransport::Udp => Writer::Udp(UdpWriter::open(&self.topic)?),
            });
        }
        if self.state.start(name)? {
            debug!(topic = %name, backend = %self.topic.backend, "dds writer started");
        }
        Ok(())
    }

    /// Publishing never waits, so a started writer is always ready
    pub fn probe(&self) -> Result<bool> {
        self.state.check_usable(&self.topic.info.name)?;
        Ok(true)
    }

    pub fn send(&self, message: &Metadata) -> Result<bool> {
        self.send_batch(std::slice::from_ref(message))
    }

    /// Publish in order. Always `Ok(true)` while the topic is open; a full
    /// history drops its oldest samples instead.
    pub fn send_batch(&self, messages: &[Metadata]) -> Result<bool> {
        let name = &self.topic.info.name;
        self.state.check_usable(name)?;
        let encoded: Vec<Vec<u8>> = messages.iter().map(Metadata::encode).collect();
        if let Some(big) = encoded.iter().find(|b| b.len() > self.topic.info.slot_size) {
            return Err(MessagingError::message_too_large(
                big.len(),
                self.topic.info.slot_size,
            ));
        }

        let link = self.link.lock();
        let writer = link
            .as_ref()
            .ok_or_else(|| MessagingError::channel_init(name, "writer not started"))?;
        for bytes in &encoded {
            match writer {
                Writer::Shm(topic) => {
                    if topic.publish(name, bytes)? {
                        trace!(topic = %name, "evicted oldest sample");
                    }
                }
                Writer::Udp(socket) => socket.publish(bytes)?,
            }
        }
        Ok(true)
    }

    /// Leave the topic. Samples already published stay readable. Idempotent.
    pub fn join(&self) -> Result<()> {
        if self.state.join() {
            if let Some(writer) = self.link.lock().take() {
                match writer {
                    Writer::Shm(topic) => topic.close(),
                    Writer::Udp(socket) => socket.close(),
                }
            }
            debug!(topic = %self.topic.info.name, "dds writer joined");
        }
        Ok(())
    }
}

/// Subscribing side of a [`DdsChannel`]
#[derive(Clone, Debug)]
pub struct DdsRecvPort {
    topic: Arc<Topic>,
    state: Arc<EndpointState>,
    link: Arc<Mutex<Option<Reader>>>,
}

impl DdsRecvPort {
    pub fn info(&self) -> &ChannelInfo {
        &self.topic.info
    }

    pub fn start(&self) -> Result<()> {
        let name = &self.topic.info.name;
        if self.state.is_joined() {
            return Err(MessagingError::channel_closed(name.as_str()));
        }
        let mut link = self.link.lock();
        if link.is_none() {
            *link = Some(match self.topic.transport {
                DdsTransport::Shm => {
                    Reader::Shm(ShmTopic::open(&self.topic, CLOSED_BY_RECEIVER)?)
                }
                DdsTransport::Udp => Reader::Udp(UdpReader::open(&self.topic)?),
            });
        }
        if self.state.start(name)? {
            debug!(topic = %name, backend = %self.topic.backend, "dds reader started");
        }
        Ok(())
    }

    pub fn probe(&self) -> Result<bool> {
        self.state.check_usable(&self.topic.info.name)?;
        match self.reader()?.as_mut() {
            Some(Reader::Shm(topic)) => topic.has_sample(),
            Some(Reader::Udp(socket)) => socket.has_sample(),
            None => Ok(false),
        }
    }

    pub fn recv(&self) -> Result<Metadata> {
        let mut taken = self.wait(1, true)?;
        taken
            .pop()
            .ok_or_else(|| MessagingError::channel_closed(self.topic.info.name.as_str()))
    }

    pub fn peek(&self) -> Result<Metadata> {
        let mut peeked = self.peek_batch(1)?;
        peeked
            .pop()
            .ok_or_else(|| MessagingError::channel_closed(self.topic.info.name.as_str()))
    }

    /// Block until `count` samples are retained and copy them, oldest first
    pub fn peek_batch(&self, count: usize) -> Result<Vec<Metadata>> {
        self.wait(count, false)
    }

    /// Samples dropped from this topic's history because the reader fell behind
    pub fn evicted(&self) -> Result<u64> {
        match self.reader()?.as_ref() {
            Some(Reader::Shm(topic)) => topic.evicted(),
            Some(Reader::Udp(socket)) => Ok(socket.evicted()),
            None => Ok(0),
        }
    }

    fn reader(&self) -> Result<parking_lot::MutexGuard<'_, Option<Reader>>> {
        let guard = self.link.lock();
        if guard.is_none() {
            return Err(MessagingError::channel_init(
                &self.topic.info.name,
                "reader not started",
            ));
        }
        Ok(guard)
    }

    fn wait(&self, count: usize, consume: bool) -> Result<Vec<Metadata>> {
        let name = &self.topic.info.name;
        if count > self.topic.info.capacity {
            return Err(MessagingError::channel_init(
                name,
                format!("history of {} cannot hold {} samples", self.topic.info.capacity, count),
            ));
        }
        let poll = crate::config::runtime().recv_poll;
        loop {
            self.state.check_usable(name)?;
            let delivery = match self.reader()?.as_mut() {
                Some(Reader::Shm(topic)) => topic.poll(count, consume, poll)?,
                Some(Reader::Udp(socket)) => socket.poll(count, consume, poll)?,
                None => Delivery::Empty,
            };
            match delivery {
                Delivery::Samples(samples) => {
                    return samples.iter().map(|bytes| Metadata::decode(bytes)).collect()
                }
                Delivery::Closed => return Err(MessagingError::channel_closed(name.as_str())),
                Delivery::Empty => continue,
            }
        }
    }

    pub fn join(&self) -> Result<()> {
        if self.state.join() {
            if let Some(Reader::Shm(topic)) = self.link.lock().take() {
                topic.close();
            }
            debug!(topic = %self.topic.info.name, "dds reader joined");
        }
        Ok(())
    }
}
