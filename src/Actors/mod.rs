//! Actor processes and the manager that forks, stops and reaps them.
//!
//! Each actor is a forked child running one target function. Parent and
//! child share a single status word in shared memory: the parent writes
//! requests (`status_running`, `status_paused`, `status_stopped`) and the
//! child's watcher thread turns a stop request into the registered stop
//! callback.

mod actor;
mod multiprocessing;

pub use actor::{Actor, ActorId, ActorStatus, ProcessType};
pub use multiprocessing::{ActorHandle, MultiProcessing};
