use crate::error::{MessagingError, Result};
use crate::Core::SharedMemory::{create_shared_memory, unlink_shared_memory, SharedMemoryBackend};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};
mod debug;
mod getters;

/// The mapping behind a segment handle. `None` once released.
pub(crate) struct SegmentCell {
    name: String,
    size: usize,
    owned: bool,
    region: RwLock<Option<Box<dyn SharedMemoryBackend>>>,
}

/// Handle to a named shared-memory region.
///
/// Handles are cheap to clone and never own the mapping: the manager (or,
/// for DDS topics, the endpoint that opened it) releases it, after which
/// every access fails with `UseAfterRelease` instead of touching unmapped
/// memory.
#[derive(Clone)]
pub struct SharedSegment {
    inner: Arc<SegmentCell>,
}

impl SharedSegment {
    pub(crate) fn from_backend(backend: Box<dyn SharedMemoryBackend>, owned: bool) -> Self {
        Self {
            inner: Arc::new(SegmentCell {
                name: backend.name().to_string(),
                size: backend.size(),
                owned,
                region: RwLock::new(Some(backend)),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Mapped size in bytes
    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn is_released(&self) -> bool {
        self.inner.region.read().is_none()
    }

    /// Run `f` against the base pointer and length of the live mapping.
    ///
    /// The mapping cannot be released while `f` runs, so `f` must not block
    /// for long.
    pub fn with<R>(&self, f: impl FnOnce(*mut u8, usize) -> R) -> Result<R> {
        let guard = self.inner.region.read();
        match guard.as_ref() {
            Some(shm) => Ok(f(shm.as_ptr(), shm.size())),
            None => Err(MessagingError::use_after_release(self.inner.name.clone())),
        }
    }

    /// Unmap and, for segments this process created, unlink the name.
    /// Returns false if it was already released.
    pub(crate) fn release(&self) -> bool {
        let mut guard = self.inner.region.write();
        match guard.take() {
            Some(shm) => {
                drop(shm);
                if self.inner.owned {
                    if let Err(e) = unlink_shared_memory(&self.inner.name) {
                        warn!(segment = %self.inner.name, error = %e, "failed to unlink segment");
                    }
                }
                true
            }
            None => false,
        }
    }

    /// True if both handles point at the same region
    pub fn same_segment(&self, other: &SharedSegment) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Allocates, tracks and releases the named segments behind shared-memory
/// channels and actor control words.
///
/// Not thread-safe on its own: allocation takes `&mut self`, and the
/// `MultiProcessing` that owns it serialises access behind a mutex.
pub struct SharedMemManager {
    prefix: String,
    owner_pid: u32,
    next_segment_id: u64,
    segments: Vec<SharedSegment>,
    stopped: bool,
}

impl Default for SharedMemManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedMemManager {
    pub fn new() -> Self {
        Self::with_prefix(crate::config::runtime().shm_prefix.clone())
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            owner_pid: std::process::id(),
            next_segment_id: 0,
            segments: Vec::new(),
            stopped: false,
        }
    }

    /// Create a fresh segment of at least `size` bytes
    pub fn alloc_shared_memory(&mut self, size: usize) -> Result<SharedSegment> {
        let name = format!("{}_{}_{}", self.prefix, self.owner_pid, self.next_segment_id);
        self.next_segment_id += 1;
        self.alloc_named(&name, size)
    }

    /// Create a segment under an explicit name, replacing stale leftovers
    pub fn alloc_named(&mut self, name: &str, size: usize) -> Result<SharedSegment> {
        if size == 0 {
            return Err(MessagingError::allocation_msg(format!(
                "segment '{}' requested with zero size",
                name
            )));
        }
        if self.stopped {
            debug!(prefix = %self.prefix, "re-initialising stopped shared memory manager");
            self.stopped = false;
        }

        let shm = create_shared_memory(size, name).map_err(|e| {
            MessagingError::allocation(
                e,
                &format!(
                    "Failed to create shared memory:\n\
                    ├─ Name: {name}\n\
                    ╰─ Size: {size}"
                ),
            )
        })?;

        let segment = SharedSegment::from_backend(shm, true);
        debug!(segment = %name, size, "allocated shared memory segment");
        self.segments.push(segment.clone());
        Ok(segment)
    }

    /// Release every segment this manager created. Idempotent.
    ///
    /// Handles still held by channels become invalid; their next access
    /// fails with `UseAfterRelease`. Returns how many segments were released
    /// by this call.
    pub fn stop(&mut self) -> usize {
        let released = self
            .segments
            .drain(..)
            .filter(|segment| segment.release())
            .count();
        if !self.stopped {
            info!(prefix = %self.prefix, released, "shared memory manager stopped");
        }
        self.stopped = true;
        released
    }

    /// Number of live segments
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Bytes mapped across all live segments
    pub fn total_bytes(&self) -> usize {
        self.segments.iter().map(SharedSegment::size).sum()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl Drop for SharedMemManager {
    fn drop(&mut self) {
        // A forked child carries a copy of the manager; only the creator tears down
        if std::process::id() == self.owner_pid {
            self.stop();
        }
    }
}
