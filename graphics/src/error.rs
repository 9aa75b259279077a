//! Graphics error types.

use std::time::Duration;

/// Errors that can occur in the graphics system.
///
/// Every variant propagates synchronously to the immediate caller. Nothing is
/// retried internally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphicsError {
    /// A native device call failed while creating or driving a GPU object.
    #[error("{operation} failed: {reason}")]
    Device {
        operation: &'static str,
        reason: String,
    },
    /// Out of GPU memory.
    #[error("out of GPU memory")]
    OutOfMemory,
    /// The embedded shader program could not be compiled.
    #[error("shader compilation failed: {0}")]
    ShaderCompilation(String),
    /// A fixed budget was exceeded; the caller should split the batch.
    #[error("{resource} capacity exceeded: requested {requested}, limit {limit}")]
    Capacity {
        resource: &'static str,
        requested: usize,
        limit: usize,
    },
    /// A fence did not reach its expected value in time.
    #[error("frame slot {slot} did not reach fence value {value} within {timeout:?}")]
    SyncTimeout {
        slot: usize,
        value: u64,
        timeout: Duration,
    },
    /// An operation was invoked in a state or on an image role that does not allow it.
    #[error("invalid state: {0}")]
    State(String),
}

impl GraphicsError {
    /// Shorthand for a [`GraphicsError::Device`] error.
    pub fn device(operation: &'static str, reason: impl ToString) -> Self {
        Self::Device {
            operation,
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a [`GraphicsError::State`] error.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Whether the subsystem can keep going after this error.
    ///
    /// Capacity and state errors leave every component consistent. The rest
    /// mean the device or the frame timeline can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Capacity { .. } | Self::State(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = GraphicsError::device("create_texture", "no memory type");
        assert_eq!(err.to_string(), "create_texture failed: no memory type");

        let err = GraphicsError::Capacity {
            resource: "binding table",
            requested: 257,
            limit: 256,
        };
        assert_eq!(
            err.to_string(),
            "binding table capacity exceeded: requested 257, limit 256"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(GraphicsError::OutOfMemory.is_fatal());
        assert!(
            GraphicsError::SyncTimeout {
                slot: 1,
                value: 3,
                timeout: Duration::from_secs(10),
            }
            .is_fatal()
        );
        assert!(!GraphicsError::state("not recording").is_fatal());
        assert!(
            !GraphicsError::Capacity {
                resource: "draws",
                requested: 1,
                limit: 0,
            }
            .is_fatal()
        );
    }
}
