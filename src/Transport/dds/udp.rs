// Loopback datagram transport for DDS topics. The reader binds a port derived
// from the topic hash and keeps its own bounded history.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use tracing::{debug, trace};

use super::{Delivery, Topic};
use crate::error::{MessagingError, Result};

const PORT_BASE: u16 = 20_000;
const PORT_SPAN: u16 = 20_000;

/// Largest frame we put on the wire, payload plus the tag byte
pub(super) const MAX_DATAGRAM: usize = 65_000;

const FRAME_DATA: u8 = 0;
const FRAME_CLOSE: u8 = 1;

fn topic_addr(topic: &Topic) -> SocketAddr {
    let digest = topic.digest();
    let port = PORT_BASE + u16::from_le_bytes([digest[0], digest[1]]) % PORT_SPAN;
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
}

fn io_init(topic: &Topic, e: std::io::Error) -> MessagingError {
    MessagingError::channel_init(&topic.info.name, format!("udp transport: {}", e))
}

#[derive(Debug)]
pub(super) struct UdpWriter {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpWriter {
    pub(super) fn open(topic: &Topic) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).map_err(|e| io_init(topic, e))?;
        let target = topic_addr(topic);
        debug!(topic = %topic.info.name, %target, "opened udp writer");
        Ok(Self { socket, target })
    }

    pub(super) fn publish(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() + 1 > MAX_DATAGRAM {
            return Err(MessagingError::message_too_large(bytes.len(), MAX_DATAGRAM - 1));
        }
        let mut frame = Vec::with_capacity(bytes.len() + 1);
        frame.push(FRAME_DATA);
        frame.extend_from_slice(bytes);
        self.send_frame(&frame)
    }

    pub(super) fn close(&self) {
        let _ = self.send_frame(&[FRAME_CLOSE]);
    }

    fn send_frame(&self, frame: &[u8]) -> Result<()> {
        match self.socket.send_to(frame, self.target) {
            Ok(_) => Ok(()),
            // best effort: nobody listening yet
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                trace!(target = %self.target, "udp frame refused");
                Ok(())
            }
            Err(e) => Err(MessagingError::allocation(e, "udp send failed")),
        }
    }
}

#[derive(Debug)]
pub(super) struct UdpReader {
    socket: UdpSocket,
    history: VecDeque<Vec<u8>>,
    depth: usize,
    peer_closed: bool,
    evicted: u64,
    scratch: Vec<u8>,
}

impl UdpReader {
    pub(super) fn open(topic: &Topic) -> Result<Self> {
        let addr = topic_addr(topic);
        let socket = UdpSocket::bind(addr).map_err(|e| io_init(topic, e))?;
        debug!(topic = %topic.info.name, %addr, "bound udp reader");
        Ok(Self {
            socket,
            history: VecDeque::with_capacity(topic.info.capacity),
            depth: topic.info.capacity,
            peer_closed: false,
            evicted: 0,
            scratch: vec![0u8; MAX_DATAGRAM + 1],
        })
    }

    fn accept(&mut self, len: usize) {
        match self.scratch.first() {
            Some(&FRAME_DATA) if len > 0 => {
                if self.history.len() == self.depth {
                    self.history.pop_front();
                    self.evicted += 1;
                }
                self.history.push_back(self.scratch[1..len].to_vec());
            }
            Some(&FRAME_CLOSE) => self.peer_closed = true,
            _ => trace!(len, "dropping malformed udp frame"),
        }
    }

    /// Move everything already queued in the socket into the history
    fn drain(&mut self) -> Result<()> {
        self.socket
            .set_nonblocking(true)
            .map_err(|e| MessagingError::allocation(e, "udp socket mode"))?;
        loop {
            match self.socket.recv(&mut self.scratch) {
                Ok(len) => self.accept(len),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(MessagingError::allocation(e, "udp receive failed")),
            }
        }
    }

    fn wait(&mut self, timeout: Duration) -> Result<()> {
        self.socket
            .set_nonblocking(false)
            .and_then(|_| self.socket.set_read_timeout(Some(timeout)))
            .map_err(|e| MessagingError::allocation(e, "udp socket mode"))?;
        match self.socket.recv(&mut self.scratch) {
            Ok(len) => {
                self.accept(len);
                Ok(())
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(()),
            Err(e) => Err(MessagingError::allocation(e, "udp receive failed")),
        }
    }

    pub(super) fn has_sample(&mut self) -> Result<bool> {
        self.drain()?;
        Ok(!self.history.is_empty())
    }

    pub(super) fn evicted(&self) -> u64 {
        self.evicted
    }

    pub(super) fn poll(
        &mut self,
        count: usize,
        consume: bool,
        timeout: Duration,
    ) -> Result<Delivery> {
        self.drain()?;
        if self.history.len() < count && !self.peer_closed {
            self.wait(timeout)?;
        }
        if self.history.len() >= count {
            let samples = if consume {
                self.history.drain(..count).collect()
            } else {
                self.history.iter().take(count).cloned().collect()
            };
            return Ok(Delivery::Samples(samples));
        }
        Ok(if self.peer_closed {
            Delivery::Closed
        } else {
            Delivery::Empty
        })
    }
}
