use super::dds::{DdsBackend, DdsTransport};
use super::factory::ChannelFactory;
use super::{Channel, ChannelBackend};
use crate::config::{DEFAULT_CAPACITY, DEFAULT_DDS_DEPTH};
use crate::error::Result;
use crate::Structs::DType;

/// Static description of one port: what it is called, what it carries and
/// how deep its channel is.
#[derive(Clone, Debug, PartialEq)]
pub struct PortInitializer {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: DType,
    /// Channel depth
    pub size: usize,
}

impl PortInitializer {
    pub fn new(name: impl Into<String>, shape: &[usize], dtype: DType, size: usize) -> Self {
        Self {
            name: name.into(),
            shape: shape.to_vec(),
            dtype,
            size,
        }
    }

    /// Number of elements in one dense message
    pub fn elements(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Assembles a channel for a pair of ports.
///
/// The channel always carries the receiving port's contract; a sender with
/// a different shape or dtype converts through a transformer before `send`.
pub struct ChannelBuilder {
    src: PortInitializer,
    dst: Option<PortInitializer>,
    backend: ChannelBackend,
    capacity: Option<usize>,
    dds_transport: DdsTransport,
    dds_backend: DdsBackend,
}

impl ChannelBuilder {
    pub fn new(src: PortInitializer) -> Self {
        Self {
            src,
            dst: None,
            backend: ChannelBackend::SharedMemory,
            capacity: None,
            dds_transport: DdsTransport::Shm,
            dds_backend: DdsBackend::FastDds,
        }
    }

    pub fn with_backend(mut self, backend: ChannelBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Receiving port, when it differs from the sender
    pub fn with_dst(mut self, dst: PortInitializer) -> Self {
        self.dst = Some(dst);
        self
    }

    pub fn with_dds_transport(mut self, transport: DdsTransport) -> Self {
        self.dds_transport = transport;
        self
    }

    pub fn with_dds_backend(mut self, backend: DdsBackend) -> Self {
        self.dds_backend = backend;
        self
    }

    pub fn build(self, factory: &ChannelFactory) -> Result<Channel> {
        let contract = self.dst.as_ref().unwrap_or(&self.src);
        let capacity = match self.capacity {
            Some(c) => c,
            None if self.src.size > 0 => self.src.size,
            None if self.backend == ChannelBackend::Dds => DEFAULT_DDS_DEPTH,
            None => DEFAULT_CAPACITY,
        };
        match self.backend {
            ChannelBackend::Dds => factory
                .get_typed_dds_channel(
                    contract.dtype,
                    &self.src.name,
                    &contract.shape,
                    self.dds_transport,
                    self.dds_backend,
                    capacity,
                )
                .map(Channel::Dds),
            backend => factory.get_channel(
                backend,
                contract.dtype,
                &self.src.name,
                &contract.shape,
                capacity,
            ),
        }
    }
}
