//! Channel transports and the factory that builds them.
//!
//! Every channel is one send endpoint plus one recv endpoint. The variant set
//! is closed: a channel is either a shared-memory ring ([`ShmemChannel`]) or
//! a DDS-style keep-last topic ([`DdsChannel`]).

pub mod Buffer {
    pub mod Buffer;
    pub mod Buffer_impl;
    pub mod layout;
    pub use Buffer::RingBuffer; // re-export for stable path
}

pub mod builder;
pub mod dds;
mod endpoint;
pub mod factory;
pub mod shmem;

pub use builder::{ChannelBuilder, PortInitializer};
pub use dds::{DdsBackend, DdsChannel, DdsRecvPort, DdsSendPort, DdsTransport};
pub use factory::ChannelFactory;
pub use shmem::{ShmemChannel, ShmemRecvPort, ShmemSendPort};

use crate::error::Result;
use crate::Structs::{DType, Metadata};

/// Channel backend selection
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChannelBackend {
    SharedMemory,
    Rpc,
    Dds,
}

/// Static description of a channel, shared by both endpoints
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelInfo {
    pub name: String,
    pub backend: ChannelBackend,
    /// None for untyped DDS topics
    pub dtype: Option<DType>,
    /// None for untyped DDS topics
    pub shape: Option<Vec<usize>>,
    /// Ring depth or keep-last history depth
    pub capacity: usize,
    /// Largest encoded message a slot holds
    pub slot_size: usize,
}

/// Send side of any channel
#[derive(Clone, Debug)]
pub enum SendEndpoint {
    Shmem(ShmemSendPort),
    Dds(DdsSendPort),
}

/// Receive side of any channel
#[derive(Clone, Debug)]
pub enum RecvEndpoint {
    Shmem(ShmemRecvPort),
    Dds(DdsRecvPort),
}

macro_rules! delegate {
    ($self:ident, $port:ident => $body:expr) => {
        match $self {
            Self::Shmem($port) => $body,
            Self::Dds($port) => $body,
        }
    };
}

impl SendEndpoint {
    pub fn info(&self) -> &ChannelInfo {
        delegate!(self, p => p.info())
    }

    pub fn name(&self) -> &str {
        &self.info().name
    }

    pub fn dtype(&self) -> Option<DType> {
        self.info().dtype
    }

    pub fn shape(&self) -> Option<&[usize]> {
        self.info().shape.as_deref()
    }

    /// Channel depth
    pub fn size(&self) -> usize {
        self.info().capacity
    }

    pub fn channel_type(&self) -> ChannelBackend {
        self.info().backend
    }

    /// Attach backing resources. Idempotent.
    pub fn start(&self) -> Result<()> {
        delegate!(self, p => p.start())
    }

    /// True if a `send` right now would be accepted
    pub fn probe(&self) -> Result<bool> {
        delegate!(self, p => p.probe())
    }

    /// Non-blocking send; `Ok(false)` means the ring is full and nothing was written
    pub fn send(&self, message: &Metadata) -> Result<bool> {
        delegate!(self, p => p.send(message))
    }

    /// Send every message or none of them
    pub fn send_batch(&self, messages: &[Metadata]) -> Result<bool> {
        delegate!(self, p => p.send_batch(messages))
    }

    /// Release resources. Idempotent.
    pub fn join(&self) -> Result<()> {
        delegate!(self, p => p.join())
    }
}

impl RecvEndpoint {
    pub fn info(&self) -> &ChannelInfo {
        delegate!(self, p => p.info())
    }

    pub fn name(&self) -> &str {
        &self.info().name
    }

    pub fn dtype(&self) -> Option<DType> {
        self.info().dtype
    }

    pub fn shape(&self) -> Option<&[usize]> {
        self.info().shape.as_deref()
    }

    pub fn size(&self) -> usize {
        self.info().capacity
    }

    pub fn channel_type(&self) -> ChannelBackend {
        self.info().backend
    }

    pub fn start(&self) -> Result<()> {
        delegate!(self, p => p.start())
    }

    /// True if a message is waiting
    pub fn probe(&self) -> Result<bool> {
        delegate!(self, p => p.probe())
    }

    /// Block until a message arrives or the channel closes
    pub fn recv(&self) -> Result<Metadata> {
        delegate!(self, p => p.recv())
    }

    /// Block like `recv` but leave the message in place
    pub fn peek(&self) -> Result<Metadata> {
        delegate!(self, p => p.peek())
    }

    /// Block until `count` messages are queued and copy them without
    /// consuming any
    pub fn peek_batch(&self, count: usize) -> Result<Vec<Metadata>> {
        delegate!(self, p => p.peek_batch(count))
    }

    pub fn join(&self) -> Result<()> {
        delegate!(self, p => p.join())
    }
}

/// A channel of either backend
#[derive(Clone, Debug)]
pub enum Channel {
    Shmem(ShmemChannel),
    Dds(DdsChannel),
}

impl Channel {
    pub fn info(&self) -> &ChannelInfo {
        match self {
            Self::Shmem(c) => c.info(),
            Self::Dds(c) => c.info(),
        }
    }

    pub fn name(&self) -> &str {
        &self.info().name
    }

    pub fn dtype(&self) -> Option<DType> {
        self.info().dtype
    }

    pub fn shape(&self) -> Option<&[usize]> {
        self.info().shape.as_deref()
    }

    pub fn size(&self) -> usize {
        self.info().capacity
    }

    pub fn backend(&self) -> ChannelBackend {
        self.info().backend
    }

    /// Handle to the send side. Clones refer to the same endpoint.
    pub fn send_port(&self) -> SendEndpoint {
        match self {
            Self::Shmem(c) => SendEndpoint::Shmem(c.get_send_port()),
            Self::Dds(c) => SendEndpoint::Dds(c.get_send_port()),
        }
    }

    /// Handle to the receive side. Clones refer to the same endpoint.
    pub fn recv_port(&self) -> RecvEndpoint {
        match self {
            Self::Shmem(c) => RecvEndpoint::Shmem(c.get_recv_port()),
            Self::Dds(c) => RecvEndpoint::Dds(c.get_recv_port()),
        }
    }

    pub fn into_endpoints(self) -> (SendEndpoint, RecvEndpoint) {
        (self.send_port(), self.recv_port())
    }
}
