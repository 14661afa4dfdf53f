// Remote variable access over a request channel and a response channel.
//
// Every request starts with a Float64 scalar command header. A GET is the
// header alone; a SET is the header followed by the payload messages, all
// in one batch. The VarPort answers a GET with the payload messages of the
// variable's current value.

use std::marker::PhantomData;

use tracing::{debug, trace};

use super::data::{check_batch_fits, check_dtype, send_until_accepted};
use super::payload::{PortData, PortKind};
use crate::error::{MessagingError, Result};
use crate::Structs::{Element, Metadata};
use crate::Transport::{PortInitializer, RecvEndpoint, SendEndpoint};

/// Request header values on the wire
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VarCommand {
    Get,
    Set,
}

impl VarCommand {
    pub fn code(self) -> f64 {
        match self {
            VarCommand::Get => 0.0,
            VarCommand::Set => 1.0,
        }
    }

    fn header(self) -> Result<Metadata> {
        Metadata::scalar(self.code())
    }

    fn from_header(message: &Metadata) -> Result<Self> {
        let code = message.to_vec::<f64>()?.first().copied();
        match code {
            Some(c) if c == 0.0 => Ok(VarCommand::Get),
            Some(c) if c == 1.0 => Ok(VarCommand::Set),
            other => Err(MessagingError::invalid_metadata(format!(
                "unknown var command {:?}",
                other
            ))),
        }
    }
}

/// A decoded request as seen by the variable's owner
#[derive(Clone, Debug, PartialEq)]
pub enum VarRequest<T> {
    Read,
    Write(PortData<T>),
}

impl<T> VarRequest<T> {
    pub fn command(&self) -> VarCommand {
        match self {
            VarRequest::Read => VarCommand::Get,
            VarRequest::Write(_) => VarCommand::Set,
        }
    }
}

/// Reads and writes a variable owned by another actor
#[derive(Debug)]
pub struct RefPort<T> {
    init: PortInitializer,
    kind: PortKind,
    requests: SendEndpoint,
    responses: RecvEndpoint,
    _marker: PhantomData<T>,
}

impl<T: Element> RefPort<T> {
    pub fn new(
        init: PortInitializer,
        kind: PortKind,
        requests: SendEndpoint,
        responses: RecvEndpoint,
    ) -> Result<Self> {
        check_dtype::<T>(&init)?;
        // a SET is the header plus the payload messages
        check_batch_fits(&init.name, requests.info(), 1 + kind.message_count())?;
        Ok(Self {
            init,
            kind,
            requests,
            responses,
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.init.name
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn start(&self) -> Result<()> {
        self.requests.start()?;
        self.responses.start()
    }

    /// Ask for the current value and block until it arrives
    pub fn read(&self) -> Result<PortData<T>> {
        send_until_accepted(&self.requests, &[VarCommand::Get.header()?])?;
        trace!(port = %self.init.name, "read requested");
        let mut messages = Vec::with_capacity(self.kind.message_count());
        for _ in 0..self.kind.message_count() {
            messages.push(self.responses.recv()?);
        }
        PortData::from_messages(self.kind, &self.init, &messages)
    }

    /// Overwrite the remote value. No reply is expected.
    pub fn write(&self, data: &PortData<T>) -> Result<()> {
        data.check(&self.init, self.kind)?;
        let (indices, values) = data.to_messages()?;
        let mut batch = vec![VarCommand::Set.header()?];
        batch.extend(indices);
        batch.push(values);
        send_until_accepted(&self.requests, &batch)
    }

    pub fn join(&self) -> Result<()> {
        let sent = self.requests.join();
        let received = self.responses.join();
        sent.and(received)
    }
}

/// Owner side of a remote variable: answers reads and applies writes in
/// arrival order
#[derive(Debug)]
pub struct VarPort<T> {
    init: PortInitializer,
    kind: PortKind,
    requests: RecvEndpoint,
    responses: SendEndpoint,
    _marker: PhantomData<T>,
}

impl<T: Element> VarPort<T> {
    pub fn new(
        init: PortInitializer,
        kind: PortKind,
        requests: RecvEndpoint,
        responses: SendEndpoint,
    ) -> Result<Self> {
        check_dtype::<T>(&init)?;
        check_batch_fits(&init.name, requests.info(), 1 + kind.message_count())?;
        check_batch_fits(&init.name, responses.info(), kind.message_count())?;
        Ok(Self {
            init,
            kind,
            requests,
            responses,
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.init.name
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn start(&self) -> Result<()> {
        self.requests.start()?;
        self.responses.start()
    }

    /// True if a request is waiting
    pub fn probe(&self) -> Result<bool> {
        self.requests.probe()
    }

    /// Block for the next request and consume it
    pub fn recv(&self) -> Result<VarRequest<T>> {
        let header = self.requests.recv()?;
        match VarCommand::from_header(&header)? {
            VarCommand::Get => Ok(VarRequest::Read),
            VarCommand::Set => {
                let mut messages = Vec::with_capacity(self.kind.message_count());
                for _ in 0..self.kind.message_count() {
                    messages.push(self.requests.recv()?);
                }
                Ok(VarRequest::Write(PortData::from_messages(
                    self.kind,
                    &self.init,
                    &messages,
                )?))
            }
        }
    }

    /// Block for the next request without consuming it
    pub fn peek(&self) -> Result<VarRequest<T>> {
        let header = self.requests.peek()?;
        match VarCommand::from_header(&header)? {
            VarCommand::Get => Ok(VarRequest::Read),
            VarCommand::Set => {
                let batch = self.requests.peek_batch(1 + self.kind.message_count())?;
                Ok(VarRequest::Write(PortData::from_messages(
                    self.kind,
                    &self.init,
                    &batch[1..],
                )?))
            }
        }
    }

    /// Handle every pending request against `var`, oldest first, without
    /// blocking for new ones. Returns how many requests were handled.
    pub fn service(&self, var: &mut PortData<T>) -> Result<usize> {
        let mut handled = 0;
        while self.requests.probe()? {
            match self.recv()? {
                VarRequest::Read => {
                    let (indices, values) = var.to_messages()?;
                    let reply: Vec<Metadata> = indices.into_iter().chain(Some(values)).collect();
                    send_until_accepted(&self.responses, &reply)?;
                }
                VarRequest::Write(value) => *var = value,
            }
            handled += 1;
        }
        if handled > 0 {
            debug!(port = %self.init.name, handled, "serviced var requests");
        }
        Ok(handled)
    }

    pub fn join(&self) -> Result<()> {
        let received = self.requests.join();
        let sent = self.responses.join();
        received.and(sent)
    }
}
