//! Defaults and per-process runtime settings

use std::time::Duration;

/// Prefix for every `/dev/shm` name this crate creates
pub const SHM_PREFIX: &str = "dmxp";

/// Default ring depth in messages
pub const DEFAULT_CAPACITY: usize = 8;

/// Default keep-last depth of a DDS topic
pub const DEFAULT_DDS_DEPTH: usize = 5;

/// Slot size of an untyped DDS topic (64KB)
pub const DEFAULT_DDS_MESSAGE_BYTES: usize = 64 * 1024;

/// Upper bound on one futex/socket wait inside a blocking `recv`
pub const DEFAULT_RECV_POLL: Duration = Duration::from_millis(10);

/// How long a cooperative stop waits before reporting the actor as stuck
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

lazy_static::lazy_static! {
    static ref RUNTIME: RuntimeConfig = RuntimeConfig::from_env();
}

/// Settings resolved once per process.
///
/// Environment overrides: `DMXP_SHM_PREFIX`, `DMXP_RECV_POLL_US`,
/// `DMXP_STOP_TIMEOUT_MS`. A `MultiProcessing` built with
/// `with_config` takes its segment prefix and stop timeout from its own
/// copy; the poll interval is always process-wide.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub shm_prefix: String,
    pub recv_poll: Duration,
    pub stop_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shm_prefix: SHM_PREFIX.to_string(),
            recv_poll: DEFAULT_RECV_POLL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(prefix) = std::env::var("DMXP_SHM_PREFIX") {
            if !prefix.is_empty() && !prefix.contains('/') {
                config.shm_prefix = prefix;
            }
        }
        if let Some(us) = env_u64("DMXP_RECV_POLL_US") {
            config.recv_poll = Duration::from_micros(us.max(1));
        }
        if let Some(ms) = env_u64("DMXP_STOP_TIMEOUT_MS") {
            config.stop_timeout = Duration::from_millis(ms);
        }
        config
    }

    pub fn with_shm_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.shm_prefix = prefix.into();
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

/// Process-wide settings, read from the environment on first use
pub fn runtime() -> &'static RuntimeConfig {
    &RUNTIME
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides() {
        let config = RuntimeConfig::default()
            .with_shm_prefix("unit")
            .with_stop_timeout(Duration::from_millis(250));
        assert_eq!(config.shm_prefix, "unit");
        assert_eq!(config.stop_timeout, Duration::from_millis(250));
        assert_eq!(config.recv_poll, DEFAULT_RECV_POLL);
    }
}
