use super::*;

/// Read-only accessors for SharedMemManager, mostly for debugging and monitoring
impl SharedMemManager {
    /// Prefix used for generated segment names
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// PID of the process that created the manager and will unlink its segments
    pub fn owner_pid(&self) -> u32 {
        self.owner_pid
    }

    /// Sequence number the next generated segment name will carry
    pub fn next_segment_id(&self) -> u64 {
        self.next_segment_id
    }

    /// Read view of the live segments
    pub fn segments(&self) -> &[SharedSegment] {
        &self.segments
    }
}

impl SharedSegment {
    /// Whether the creating manager will unlink this name on release
    pub fn is_owned(&self) -> bool {
        self.inner.owned
    }
}
