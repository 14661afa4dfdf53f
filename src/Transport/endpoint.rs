// Local lifecycle of one endpoint: Created -> Started -> Joined

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{MessagingError, Result};

const CREATED: u8 = 0;
const STARTED: u8 = 1;
const JOINED: u8 = 2;

#[derive(Debug, Default)]
pub(crate) struct EndpointState(AtomicU8);

impl EndpointState {
    /// Returns true on the Created -> Started transition, false if already
    /// started. Starting a joined endpoint is an error.
    pub(crate) fn start(&self, channel: &str) -> Result<bool> {
        match self
            .0
            .compare_exchange(CREATED, STARTED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(true),
            Err(STARTED) => Ok(false),
            Err(_) => Err(MessagingError::channel_closed(channel)),
        }
    }

    /// Returns true if this call performed the join.
    pub(crate) fn join(&self) -> bool {
        self.0.swap(JOINED, Ordering::AcqRel) != JOINED
    }

    pub(crate) fn is_started(&self) -> bool {
        self.0.load(Ordering::Acquire) == STARTED
    }

    pub(crate) fn is_joined(&self) -> bool {
        self.0.load(Ordering::Acquire) == JOINED
    }

    /// Gate for send/recv/peek/probe.
    pub(crate) fn check_usable(&self, channel: &str) -> Result<()> {
        match self.0.load(Ordering::Acquire) {
            STARTED => Ok(()),
            CREATED => Err(MessagingError::channel_init(channel, "endpoint not started")),
            _ => Err(MessagingError::channel_closed(channel)),
        }
    }
}
