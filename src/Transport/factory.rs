use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::dds::{DdsBackend, DdsChannel, DdsTransport};
use super::shmem::ShmemChannel;
use super::Buffer::RingBuffer;
use super::{Channel, ChannelBackend, ChannelInfo};
use crate::config::DEFAULT_DDS_MESSAGE_BYTES;
use crate::error::{MessagingError, Result};
use crate::Core::SharedMemManager;
use crate::Structs::{DType, MAX_DIMS, METADATA_HEADER_SIZE};

/// Builds channels over the segment manager owned by `MultiProcessing`.
///
/// The factory hands out channels but does not track them: whoever starts
/// an endpoint joins it.
#[derive(Clone)]
pub struct ChannelFactory {
    shmm: Arc<Mutex<SharedMemManager>>,
}

impl std::fmt::Debug for ChannelFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelFactory").finish_non_exhaustive()
    }
}

impl ChannelFactory {
    pub fn new(shmm: Arc<Mutex<SharedMemManager>>) -> Self {
        Self { shmm }
    }

    /// Slot size for a message of `shape` elements. Sized for 8-byte
    /// elements so sparse index messages (Int64) fit too.
    pub fn slot_size_for(dtype: DType, shape: &[usize]) -> usize {
        let elements: usize = shape.iter().product();
        METADATA_HEADER_SIZE + elements * dtype.elsize().max(8)
    }

    /// New channel carrying `dtype` arrays of `shape`, `capacity` deep
    pub fn get_channel(
        &self,
        backend: ChannelBackend,
        dtype: DType,
        name: &str,
        shape: &[usize],
        capacity: usize,
    ) -> Result<Channel> {
        validate(name, dtype, shape, capacity)?;
        let info = ChannelInfo {
            name: name.to_string(),
            backend,
            dtype: Some(dtype),
            shape: Some(shape.to_vec()),
            capacity,
            slot_size: Self::slot_size_for(dtype, shape),
        };

        match backend {
            ChannelBackend::SharedMemory => {
                let size = RingBuffer::region_size(info.capacity, info.slot_size);
                let segment = self.shmm.lock().alloc_shared_memory(size)?;
                Ok(Channel::Shmem(ShmemChannel::create(info, segment)?))
            }
            ChannelBackend::Dds => Ok(Channel::Dds(DdsChannel::new(
                info,
                DdsTransport::Shm,
                DdsBackend::FastDds,
            ))),
            ChannelBackend::Rpc => Err(MessagingError::channel_init(
                name,
                "rpc channels are not available",
            )),
        }
    }

    /// Untyped DDS topic with an explicit transport, backend and history
    /// depth. Samples up to `DEFAULT_DDS_MESSAGE_BYTES` encoded.
    pub fn get_dds_channel(
        &self,
        name: &str,
        transport: DdsTransport,
        backend: DdsBackend,
        depth: usize,
    ) -> Result<DdsChannel> {
        if depth == 0 {
            return Err(MessagingError::channel_init(name, "depth must be positive"));
        }
        debug!(topic = name, ?transport, %backend, depth, "dds channel requested");
        Ok(DdsChannel::new(
            ChannelInfo {
                name: name.to_string(),
                backend: ChannelBackend::Dds,
                dtype: None,
                shape: None,
                capacity: depth,
                slot_size: DEFAULT_DDS_MESSAGE_BYTES,
            },
            transport,
            backend,
        ))
    }

    /// DDS topic sized for one array contract
    pub fn get_typed_dds_channel(
        &self,
        dtype: DType,
        name: &str,
        shape: &[usize],
        transport: DdsTransport,
        backend: DdsBackend,
        depth: usize,
    ) -> Result<DdsChannel> {
        validate(name, dtype, shape, depth)?;
        Ok(DdsChannel::new(
            ChannelInfo {
                name: name.to_string(),
                backend: ChannelBackend::Dds,
                dtype: Some(dtype),
                shape: Some(shape.to_vec()),
                capacity: depth,
                slot_size: Self::slot_size_for(dtype, shape),
            },
            transport,
            backend,
        ))
    }

    pub fn shared_mem_manager(&self) -> &Arc<Mutex<SharedMemManager>> {
        &self.shmm
    }
}

fn validate(name: &str, dtype: DType, shape: &[usize], capacity: usize) -> Result<()> {
    if capacity == 0 {
        return Err(MessagingError::channel_init(name, "capacity must be positive"));
    }
    if dtype == DType::Int8 {
        return Err(MessagingError::channel_init(
            name,
            "channels carry 16/32/64-bit integers or 32/64-bit floats",
        ));
    }
    if shape.len() > MAX_DIMS || shape.contains(&0) {
        return Err(MessagingError::channel_init(
            name,
            format!("unsupported shape {:?}", shape),
        ));
    }
    Ok(())
}
