use std::marker::PhantomData;
use std::thread;
use std::time::Duration;

use crossbeam_utils::Backoff;
use tracing::trace;

use super::payload::{check_conformant, PortData, PortKind};
use super::transformer::{AbstractTransformer, Transformer};
use crate::error::{MessagingError, Result};
use crate::Structs::{Element, Metadata};
use crate::Transport::{ChannelBackend, ChannelInfo, PortInitializer, RecvEndpoint, SendEndpoint};

/// T must be the port's declared dtype
pub(super) fn check_dtype<T: Element>(port: &PortInitializer) -> Result<()> {
    if port.dtype != T::DTYPE {
        return Err(MessagingError::shape_mismatch(&port.name, port.dtype, T::DTYPE));
    }
    Ok(())
}

/// A ring accepts a batch only in one cursor advance, so a batch deeper
/// than the ring would be refused forever. DDS topics evict instead.
pub(super) fn check_batch_fits(port: &str, channel: &ChannelInfo, batch: usize) -> Result<()> {
    if channel.backend == ChannelBackend::SharedMemory && batch > channel.capacity {
        return Err(MessagingError::channel_init(
            &channel.name,
            format!(
                "port {} sends batches of {} messages, channel depth is {}",
                port, batch, channel.capacity
            ),
        ));
    }
    Ok(())
}

/// Retry a batch until the channel accepts it. Spins briefly, then sleeps
/// for the configured poll interval between attempts.
pub(crate) fn send_until_accepted(endpoint: &SendEndpoint, batch: &[Metadata]) -> Result<()> {
    let backoff = Backoff::new();
    loop {
        if endpoint.send_batch(batch)? {
            return Ok(());
        }
        if backoff.is_completed() {
            thread::sleep(crate::config::runtime().recv_poll.min(Duration::from_millis(1)));
        } else {
            backoff.snooze();
        }
    }
}

/// Sending data port. Converts each payload to wire messages, adapts them
/// with its transformer and publishes them as one batch.
#[derive(Debug)]
pub struct OutPort<T> {
    init: PortInitializer,
    kind: PortKind,
    endpoint: SendEndpoint,
    transformer: Transformer,
    _marker: PhantomData<T>,
}

impl<T: Element> OutPort<T> {
    pub fn new(init: PortInitializer, kind: PortKind, endpoint: SendEndpoint) -> Result<Self> {
        Self::with_transformer(init, kind, endpoint, Transformer::default())
    }

    pub fn with_transformer(
        init: PortInitializer,
        kind: PortKind,
        endpoint: SendEndpoint,
        transformer: Transformer,
    ) -> Result<Self> {
        check_dtype::<T>(&init)?;
        check_batch_fits(&init.name, endpoint.info(), kind.message_count())?;
        Ok(Self {
            init,
            kind,
            endpoint,
            transformer,
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.init.name
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn initializer(&self) -> &PortInitializer {
        &self.init
    }

    pub fn channel(&self) -> &ChannelInfo {
        self.endpoint.info()
    }

    pub fn transformer(&self) -> &Transformer {
        &self.transformer
    }

    pub fn start(&self) -> Result<()> {
        self.endpoint.start()
    }

    /// True if a send right now would be accepted
    pub fn probe(&self) -> Result<bool> {
        self.endpoint.probe()
    }

    /// Encode, transform and publish `data`.
    ///
    /// Fails with ShapeMismatch if `data` does not fit this port and with
    /// TransformError if the adapted message does not fit the channel; in
    /// both cases nothing is written. `Ok(false)` means the channel is full.
    pub fn send(&self, data: &PortData<T>) -> Result<bool> {
        let batch = self.encode(data)?;
        let accepted = self.endpoint.send_batch(&batch)?;
        trace!(port = %self.init.name, accepted, "send");
        Ok(accepted)
    }

    /// Like `send`, but wait until the channel has room
    pub fn send_blocking(&self, data: &PortData<T>) -> Result<()> {
        let batch = self.encode(data)?;
        send_until_accepted(&self.endpoint, &batch)
    }

    fn encode(&self, data: &PortData<T>) -> Result<Vec<Metadata>> {
        data.check(&self.init, self.kind)?;
        let (indices, values) = data.to_messages()?;
        let values = self.transformer.transform(values)?;
        let info = self.endpoint.info();
        check_conformant(self.kind, &values, info.dtype, info.shape.as_deref())?;
        Ok(indices.into_iter().chain(Some(values)).collect())
    }

    pub fn join(&self) -> Result<()> {
        self.endpoint.join()
    }
}

/// Receiving data port
#[derive(Debug)]
pub struct InPort<T> {
    init: PortInitializer,
    kind: PortKind,
    endpoint: RecvEndpoint,
    _marker: PhantomData<T>,
}

impl<T: Element> InPort<T> {
    /// The channel must carry this port's dtype and shape
    pub fn new(init: PortInitializer, kind: PortKind, endpoint: RecvEndpoint) -> Result<Self> {
        check_dtype::<T>(&init)?;
        if let Some(dtype) = endpoint.dtype() {
            if dtype != init.dtype {
                return Err(MessagingError::shape_mismatch(&init.name, init.dtype, dtype));
            }
        }
        if let Some(shape) = endpoint.shape() {
            if shape != init.shape.as_slice() {
                return Err(MessagingError::shape_mismatch(&init.name, &init.shape, shape));
            }
        }
        Ok(Self {
            init,
            kind,
            endpoint,
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.init.name
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn initializer(&self) -> &PortInitializer {
        &self.init
    }

    pub fn channel(&self) -> &ChannelInfo {
        self.endpoint.info()
    }

    pub fn start(&self) -> Result<()> {
        self.endpoint.start()
    }

    /// True if a payload is waiting
    pub fn probe(&self) -> Result<bool> {
        self.endpoint.probe()
    }

    /// Block for the next payload
    pub fn recv(&self) -> Result<PortData<T>> {
        let mut messages = Vec::with_capacity(self.kind.message_count());
        for _ in 0..self.kind.message_count() {
            messages.push(self.endpoint.recv()?);
        }
        PortData::from_messages(self.kind, &self.init, &messages)
    }

    /// Block for the next payload without consuming it
    pub fn peek(&self) -> Result<PortData<T>> {
        let messages = self.endpoint.peek_batch(self.kind.message_count())?;
        PortData::from_messages(self.kind, &self.init, &messages)
    }

    pub fn join(&self) -> Result<()> {
        self.endpoint.join()
    }
}
