//! Error types shared by segments, channels, ports and actors

/// Result type alias for messaging operations
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Failure taxonomy of the messaging backbone.
///
/// A full ring is not an error: `send` reports it as `Ok(false)`.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Segment or resource exhaustion
    #[error("Allocation error: {message}")]
    Allocation {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Transport setup failure
    #[error("Channel init error on '{channel}': {message}")]
    ChannelInit { channel: String, message: String },

    /// Operation after `join`, or the peer endpoint is gone
    #[error("Channel closed: {channel}")]
    ChannelClosed { channel: String },

    /// Access to a segment released by its manager
    #[error("Use after release: {resource}")]
    UseAfterRelease { resource: String },

    /// Array does not match the port contract
    #[error("Shape mismatch on '{port}': expected {expected}, got {actual}")]
    ShapeMismatch {
        port: String,
        expected: String,
        actual: String,
    },

    /// Shape/type adaptation failed at send time
    #[error("Transform error: {message}")]
    Transform { message: String },

    /// Process creation failure
    #[error("Actor spawn error: {message}")]
    ActorSpawn {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Encoded message does not fit a slot
    #[error("Message too large: {size} bytes, slot holds {capacity}")]
    MessageTooLarge { size: usize, capacity: usize },

    /// Wire bytes that do not decode into a metadata record
    #[error("Invalid metadata: {message}")]
    InvalidMetadata { message: String },

    #[error("Actor not found: {id}")]
    ActorNotFound { id: usize },
}

impl MessagingError {
    /// Create an allocation error from an OS error
    pub fn allocation(source: std::io::Error, context: &str) -> Self {
        Self::Allocation {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an allocation error without an OS cause
    pub fn allocation_msg(message: impl Into<String>) -> Self {
        Self::Allocation {
            message: message.into(),
            source: None,
        }
    }

    pub fn channel_init(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ChannelInit {
            channel: channel.into(),
            message: message.into(),
        }
    }

    pub fn channel_closed(channel: impl Into<String>) -> Self {
        Self::ChannelClosed {
            channel: channel.into(),
        }
    }

    pub fn use_after_release(resource: impl Into<String>) -> Self {
        Self::UseAfterRelease {
            resource: resource.into(),
        }
    }

    pub fn shape_mismatch(
        port: impl Into<String>,
        expected: impl std::fmt::Debug,
        actual: impl std::fmt::Debug,
    ) -> Self {
        Self::ShapeMismatch {
            port: port.into(),
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }

    pub fn transform(message: impl Into<String>) -> Self {
        Self::Transform {
            message: message.into(),
        }
    }

    pub fn actor_spawn(source: std::io::Error, context: &str) -> Self {
        Self::ActorSpawn {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    pub fn message_too_large(size: usize, capacity: usize) -> Self {
        Self::MessageTooLarge { size, capacity }
    }

    pub fn invalid_metadata(message: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            message: message.into(),
        }
    }

    /// True for the errors that mean the channel will never deliver again
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ChannelClosed { .. } | Self::UseAfterRelease { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MessagingError::channel_closed("a1_to_a2");
        let display = format!("{}", err);
        assert!(display.contains("Channel closed"));
        assert!(display.contains("a1_to_a2"));

        let err = MessagingError::shape_mismatch("out", [3usize, 4], [12usize]);
        assert_eq!(
            err.to_string(),
            "Shape mismatch on 'out': expected [3, 4], got [12]"
        );
    }

    #[test]
    fn test_io_source_is_kept() {
        let io = std::io::Error::new(std::io::ErrorKind::OutOfMemory, "no space");
        let err = MessagingError::allocation(io, "ftruncate /dev/shm/dmxp_1");
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_closed());
        assert!(MessagingError::use_after_release("seg").is_closed());
    }
}
