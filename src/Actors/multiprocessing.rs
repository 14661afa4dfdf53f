use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::actor::{Actor, ActorId, ActorStatus, ControlWord, ProcessType, CONTROL_BLOCK_SIZE};
use crate::config::RuntimeConfig;
use crate::error::{MessagingError, Result};
use crate::Core::{SharedMemManager, SharedSegment};
use crate::Transport::ChannelFactory;

/// Exit code of a target that returned an error
const EXIT_TARGET_ERROR: i32 = 1;
/// Exit code of a target that panicked
const EXIT_TARGET_PANIC: i32 = 101;

/// Parent-side record of one actor process
pub struct ActorHandle {
    id: ActorId,
    pid: libc::pid_t,
    control: ControlWord,
    /// Set once the process has been reaped
    exit: Option<ActorStatus>,
}

impl std::fmt::Debug for ActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::Debug::StructDebug::debug_actor_handle(self, f)
    }
}

impl ActorHandle {
    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Final status once reaped, otherwise the current control word
    pub fn status(&self) -> ActorStatus {
        match self.exit {
            Some(status) => status,
            None => self.control.load().unwrap_or(ActorStatus::Stopped),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.exit.is_none()
    }

    fn record_exit(&mut self, raw: libc::c_int) -> ActorStatus {
        let status = if libc::WIFEXITED(raw) && libc::WEXITSTATUS(raw) == 0 {
            ActorStatus::Stopped
        } else {
            ActorStatus::ErrorExit
        };
        self.finish(status)
    }

    fn finish(&mut self, status: ActorStatus) -> ActorStatus {
        self.exit = Some(status);
        let _ = self.control.store(status);
        debug!(actor = %self.id, pid = self.pid, ?status, "actor reaped");
        status
    }

    /// Reap without blocking. Returns the status if the process has exited.
    fn try_reap(&mut self) -> Result<Option<ActorStatus>> {
        if let Some(status) = self.exit {
            return Ok(Some(status));
        }
        match waitpid(self.pid, libc::WNOHANG)? {
            Some(raw) => Ok(Some(self.record_exit(raw))),
            None => Ok(None),
        }
    }

    fn reap(&mut self) -> Result<ActorStatus> {
        if let Some(status) = self.exit {
            return Ok(status);
        }
        match waitpid(self.pid, 0)? {
            Some(raw) => Ok(self.record_exit(raw)),
            // blocking waitpid only returns 0 with WNOHANG
            None => Ok(self.status()),
        }
    }

    /// SIGKILL and reap. An already reaped actor keeps its status.
    fn kill(&mut self, status: ActorStatus) -> ActorStatus {
        if let Some(status) = self.exit {
            return status;
        }
        unsafe { libc::kill(self.pid, libc::SIGKILL) };
        if let Err(e) = waitpid(self.pid, 0) {
            warn!(actor = %self.id, error = %e, "reaping killed actor failed");
        }
        self.finish(status)
    }
}

/// `waitpid` that retries on EINTR. `Ok(None)` when WNOHANG finds the child
/// still running. A child that is already gone (ECHILD) reads as a clean exit.
fn waitpid(pid: libc::pid_t, flags: libc::c_int) -> Result<Option<libc::c_int>> {
    loop {
        let mut raw: libc::c_int = 0;
        let rc = unsafe { libc::waitpid(pid, &mut raw, flags) };
        if rc == pid {
            return Ok(Some(raw));
        }
        if rc == 0 {
            return Ok(None);
        }
        let e = io::Error::last_os_error();
        match e.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::ECHILD) => return Ok(Some(0)),
            _ => return Err(MessagingError::actor_spawn(e, &format!("waitpid({})", pid))),
        }
    }
}

fn fork_process() -> (ProcessType, libc::pid_t) {
    match unsafe { libc::fork() } {
        -1 => (ProcessType::ErrorProcess, -1),
        0 => (ProcessType::ChildProcess, 0),
        pid => (ProcessType::ParentProcess, pid),
    }
}

/// Runs the target inside the forked child and never returns
fn run_child<F>(actor: Actor, target: F) -> !
where
    F: FnOnce(&Actor) -> Result<()>,
{
    actor.spawn_watcher();
    let code = match panic::catch_unwind(AssertUnwindSafe(|| target(&actor))) {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            error!(actor = %actor.id(), error = %e, "actor target failed");
            EXIT_TARGET_ERROR
        }
        Err(_) => {
            error!(actor = %actor.id(), "actor target panicked");
            EXIT_TARGET_PANIC
        }
    };
    // skip destructors: the parent owns every shared resource we inherited
    unsafe { libc::_exit(code) }
}

/// Creates actor processes, owns their control words and the shared-memory
/// manager behind every channel they use.
///
/// Teardown order is actors first, then segments: `stop` waits for every
/// actor before releasing memory.
pub struct MultiProcessing {
    config: RuntimeConfig,
    shmm: Option<Arc<Mutex<SharedMemManager>>>,
    factory: Option<ChannelFactory>,
    actors: Vec<ActorHandle>,
    next_id: usize,
    owner_pid: u32,
    interrupt_targets: Arc<Mutex<Vec<SharedSegment>>>,
}

impl Default for MultiProcessing {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MultiProcessing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiProcessing")
            .field("actors", &self.actors)
            .field("shmm", &self.shmm.as_ref().map(|m| m.lock().segment_count()))
            .finish()
    }
}

impl MultiProcessing {
    /// Manager using the process-wide settings
    pub fn new() -> Self {
        Self::with_config(crate::config::runtime().clone())
    }

    /// Manager with its own segment prefix and stop timeout
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            config,
            shmm: None,
            factory: None,
            actors: Vec::new(),
            next_id: 0,
            owner_pid: std::process::id(),
            interrupt_targets: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Bring up the shared-memory manager. Idempotent.
    pub fn start(&mut self) -> Result<()> {
        self.shared_mem_manager();
        Ok(())
    }

    /// The segment manager, created on first use
    pub fn shared_mem_manager(&mut self) -> Arc<Mutex<SharedMemManager>> {
        let prefix = &self.config.shm_prefix;
        Arc::clone(self.shmm.get_or_insert_with(|| {
            info!(prefix = %prefix, "shared memory manager started");
            Arc::new(Mutex::new(SharedMemManager::with_prefix(prefix.clone())))
        }))
    }

    /// Factory over this manager's segments, created on first use
    pub fn channel_factory(&mut self) -> &ChannelFactory {
        let shmm = self.shared_mem_manager();
        self.factory.get_or_insert_with(|| ChannelFactory::new(shmm))
    }

    /// Fork a process running `target` and return immediately.
    ///
    /// The child exits with status 0 if `target` returns `Ok`, non-zero if
    /// it returns `Err` or panics.
    pub fn build_actor<F>(&mut self, target: F) -> Result<ActorId>
    where
        F: FnOnce(&Actor) -> Result<()>,
    {
        let id = ActorId(self.next_id);
        let segment = self
            .shared_mem_manager()
            .lock()
            .alloc_shared_memory(CONTROL_BLOCK_SIZE)?;
        let control = ControlWord::new(segment.clone());
        control.store(ActorStatus::Running)?;

        match fork_process() {
            (ProcessType::ErrorProcess, _) => Err(MessagingError::actor_spawn(
                io::Error::last_os_error(),
                &format!("fork for {}", id),
            )),
            (ProcessType::ChildProcess, _) => run_child(Actor::new(id, control), target),
            (ProcessType::ParentProcess, pid) => {
                self.next_id += 1;
                self.interrupt_targets.lock().push(segment);
                self.actors.push(ActorHandle {
                    id,
                    pid,
                    control,
                    exit: None,
                });
                info!(actor = %id, pid, "actor started");
                Ok(id)
            }
        }
    }

    fn handle_mut(&mut self, id: ActorId) -> Result<&mut ActorHandle> {
        self.actors
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(MessagingError::ActorNotFound { id: id.0 })
    }

    fn handle(&self, id: ActorId) -> Result<&ActorHandle> {
        self.actors
            .iter()
            .find(|a| a.id == id)
            .ok_or(MessagingError::ActorNotFound { id: id.0 })
    }

    /// Reap exited actors without blocking. Returns false if any actor has
    /// ended in `ErrorExit`.
    pub fn check_actor(&mut self) -> Result<bool> {
        let mut healthy = true;
        for actor in self.actors.iter_mut() {
            if actor.try_reap()? == Some(ActorStatus::ErrorExit) {
                healthy = false;
            }
        }
        Ok(healthy)
    }

    /// Read view of every actor this manager has started and not yet
    /// cleared with `stop`
    pub fn get_actors(&self) -> &[ActorHandle] {
        &self.actors
    }

    pub fn actor_status(&self, id: ActorId) -> Result<ActorStatus> {
        Ok(self.handle(id)?.status())
    }

    /// Block until the actor exits and return its final status
    pub fn wait(&mut self, id: ActorId) -> Result<ActorStatus> {
        self.handle_mut(id)?.reap()
    }

    pub fn status_running(&self, id: ActorId) -> Result<()> {
        self.request(id, ActorStatus::Running)
    }

    pub fn status_paused(&self, id: ActorId) -> Result<()> {
        self.request(id, ActorStatus::Paused)
    }

    /// Ask the actor to stop; its stop callback fires in the child
    pub fn status_stopped(&self, id: ActorId) -> Result<()> {
        self.request(id, ActorStatus::Stopped)
    }

    fn request(&self, id: ActorId, status: ActorStatus) -> Result<()> {
        let handle = self.handle(id)?;
        if handle.is_alive() {
            handle.control.store(status)?;
            debug!(actor = %id, ?status, "status requested");
        }
        Ok(())
    }

    /// Stop one actor. Graceful stop requests `Stopped`, then waits up to the
    /// configured stop timeout before killing it (reported as `ErrorExit`).
    /// Forced stop kills immediately.
    pub fn stop_actor(&mut self, id: ActorId, forced: bool) -> Result<ActorStatus> {
        let timeout = self.config.stop_timeout;
        let handle = self.handle_mut(id)?;
        if forced {
            info!(actor = %id, "killing actor");
            return Ok(handle.kill(ActorStatus::Stopped));
        }
        if !handle.is_alive() {
            return Ok(handle.status());
        }
        handle.control.store(ActorStatus::Stopped)?;

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = handle.try_reap()? {
                info!(actor = %id, ?status, "actor stopped");
                return Ok(status);
            }
            if Instant::now() >= deadline {
                warn!(actor = %id, ?timeout, "actor ignored stop request, killing it");
                return Ok(handle.kill(ActorStatus::ErrorExit));
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Stop every actor, then release all shared memory. Returns the final
    /// status of each actor in start order; an actor killed after ignoring a
    /// graceful stop shows up as `ErrorExit`. The manager can be started
    /// again afterwards.
    pub fn stop(&mut self, forced: bool) -> Result<Vec<(ActorId, ActorStatus)>> {
        let ids: Vec<ActorId> = self.actors.iter().map(|a| a.id).collect();
        let mut statuses = Vec::with_capacity(ids.len());
        let mut first_err = None;
        for id in ids {
            match self.stop_actor(id, forced) {
                Ok(status) => {
                    if status == ActorStatus::ErrorExit {
                        warn!(actor = %id, "actor ended in error exit");
                    }
                    statuses.push((id, status));
                }
                Err(e) => {
                    error!(actor = %id, error = %e, "failed to stop actor");
                    first_err.get_or_insert(e);
                }
            }
        }
        self.actors.clear();
        self.interrupt_targets.lock().clear();
        self.factory = None;
        if let Some(shmm) = self.shmm.take() {
            let released = shmm.lock().stop();
            debug!(released, "released actor segments");
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(statuses),
        }
    }

    /// Request a graceful stop of every running actor when the process
    /// receives Ctrl-C. The caller still reaps with `wait` or `stop`.
    pub fn stop_on_interrupt(&self) -> Result<()> {
        let targets = Arc::clone(&self.interrupt_targets);
        ctrlc::set_handler(move || {
            for segment in targets.lock().iter() {
                let _ = ControlWord::new(segment.clone()).store(ActorStatus::Stopped);
            }
        })
        .map_err(|e| MessagingError::actor_spawn(io::Error::other(e), "install interrupt handler"))
    }
}

impl Drop for MultiProcessing {
    fn drop(&mut self) {
        if std::process::id() != self.owner_pid {
            return;
        }
        if self.actors.iter().any(ActorHandle::is_alive) {
            warn!(
                actors = self.actors.len(),
                "multiprocessing dropped with live actors, killing them"
            );
        }
        if let Err(e) = self.stop(true) {
            error!(error = %e, "teardown failed");
        }
    }
}
