// Child-side view of an actor: the control word it polls and the stop
// callback its watcher thread fires.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::Core::futex::{futex_wait_timeout, futex_wake_all};
use crate::Core::SharedSegment;

/// Bytes reserved for one control block
pub(crate) const CONTROL_BLOCK_SIZE: usize = 64;

/// Lifecycle state of an actor process
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ActorStatus {
    Running = 0,
    Paused = 1,
    Stopped = 2,
    ErrorExit = 3,
}

impl ActorStatus {
    fn from_word(word: u32) -> Self {
        match word {
            0 => Self::Running,
            1 => Self::Paused,
            2 => Self::Stopped,
            _ => Self::ErrorExit,
        }
    }

    /// True once the process has exited or been asked to
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::ErrorExit)
    }
}

/// Which side of a `fork` the caller is on
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProcessType {
    ErrorProcess,
    ChildProcess,
    ParentProcess,
}

/// Identifier handed out by `MultiProcessing::build_actor`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub usize);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "actor-{}", self.0)
    }
}

/// Status word shared between parent and child
#[derive(Clone, Debug)]
pub(crate) struct ControlWord {
    segment: SharedSegment,
}

impl ControlWord {
    pub(crate) fn new(segment: SharedSegment) -> Self {
        Self { segment }
    }

    fn with_word<R>(&self, f: impl FnOnce(&AtomicU32) -> R) -> Result<R> {
        // segment is page aligned and at least CONTROL_BLOCK_SIZE long
        self.segment
            .with(|base, _| f(unsafe { &*(base as *const AtomicU32) }))
    }

    pub(crate) fn load(&self) -> Result<ActorStatus> {
        self.with_word(|w| ActorStatus::from_word(w.load(Ordering::Acquire)))
    }

    pub(crate) fn store(&self, status: ActorStatus) -> Result<()> {
        self.with_word(|w| {
            w.store(status as u32, Ordering::Release);
            futex_wake_all(w);
        })
    }

    /// Sleep until the word moves away from `seen`, at most `timeout`
    pub(crate) fn wait_change(&self, seen: ActorStatus, timeout: Duration) -> Result<()> {
        self.with_word(|w| futex_wait_timeout(w, seen as u32, timeout))
    }
}

type StopFn = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct StopSlot {
    callback: Option<StopFn>,
    fired: bool,
}

/// Control object a target function receives inside its actor process
pub struct Actor {
    id: ActorId,
    control: ControlWord,
    stop: Arc<Mutex<StopSlot>>,
}

impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.id)
            .field("status", &self.get_status())
            .finish_non_exhaustive()
    }
}

impl Actor {
    pub(crate) fn new(id: ActorId, control: ControlWord) -> Self {
        Self {
            id,
            control,
            stop: Arc::new(Mutex::new(StopSlot::default())),
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    /// Status most recently requested by the parent. A released control
    /// block reads as `Stopped`.
    pub fn get_status(&self) -> ActorStatus {
        self.control.load().unwrap_or(ActorStatus::Stopped)
    }

    pub fn is_running(&self) -> bool {
        self.get_status() == ActorStatus::Running
    }

    /// Register the callback run once when the parent requests a stop.
    /// If the stop already arrived, `f` runs immediately on this thread.
    pub fn set_stop_fn(&self, f: impl FnOnce() + Send + 'static) {
        let mut slot = self.stop.lock();
        if slot.fired {
            drop(slot);
            f();
        } else {
            slot.callback = Some(Box::new(f));
        }
    }

    /// Block while the parent holds this actor paused. Returns the status
    /// that ended the pause.
    pub fn wait_while_paused(&self) -> ActorStatus {
        let poll = crate::config::runtime().recv_poll;
        loop {
            let status = self.get_status();
            if status != ActorStatus::Paused {
                return status;
            }
            if self.control.wait_change(status, poll).is_err() {
                return ActorStatus::Stopped;
            }
        }
    }

    /// Start the thread that waits on the control word and fires the stop
    /// callback.
    pub(crate) fn spawn_watcher(&self) {
        let control = self.control.clone();
        let stop = Arc::clone(&self.stop);
        let id = self.id;
        let spawned = thread::Builder::new()
            .name(format!("{}-ctl", id))
            .spawn(move || watch(id, control, stop));
        if let Err(e) = spawned {
            warn!(actor = %id, error = %e, "stop callbacks disabled: watcher thread failed to start");
        }
    }
}

fn watch(id: ActorId, control: ControlWord, stop: Arc<Mutex<StopSlot>>) {
    let poll = crate::config::runtime().recv_poll * 10;
    loop {
        let status = match control.load() {
            Ok(status) => status,
            Err(_) => return,
        };
        if status.is_terminal() {
            let callback = {
                let mut slot = stop.lock();
                slot.fired = true;
                slot.callback.take()
            };
            debug!(actor = %id, ?status, "stop requested");
            if let Some(callback) = callback {
                callback();
            }
            return;
        }
        if control.wait_change(status, poll).is_err() {
            return;
        }
    }
}
