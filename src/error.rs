use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{0:?} is not a supported filesystem")]
    UnsupportedBackend(String),

    #[error("Failed to load eBPF program: {0}")]
    ProgramLoadFailed(String),

    #[error("Error rewriting constants: {0}")]
    ConstantRewriteFailed(String),

    #[error("Error attaching program {program} to {target}: {reason}")]
    AttachFailed {
        target: String,
        program: String,
        reason: String,
    },

    #[error("Error creating perf ring buffer: {0}")]
    BufferOpenFailed(String),

    #[error("Failed to spawn consumer thread: {0}")]
    ConsumerSpawnFailed(String),

    #[error("Failed to detach {0}")]
    DetachFailed(String),

    #[error("Failed to release eBPF program: {0}")]
    ProgramCloseFailed(String),

    #[error("Tracer was already started")]
    AlreadyStarted,

    #[error("Tracer was stopped and cannot be restarted")]
    Stopped,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A raw record that cannot be turned into an event
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record too short: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("unknown operation code {0}")]
    UnknownOperation(u32),

    #[error("unknown address family {0}")]
    UnknownAddressFamily(u32),
}

/// Failure returned by a blocking ring buffer read
#[derive(Error, Debug)]
pub enum ReadError {
    /// The reader was closed, possibly while a read was in flight
    #[error("perf reader was closed")]
    Closed,

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_backend_message() {
        let err = Error::UnsupportedBackend("zfs".to_string());
        assert_eq!(err.to_string(), "\"zfs\" is not a supported filesystem");
    }

    #[test]
    fn test_attach_failed_names_target() {
        let err = Error::AttachFailed {
            target: "ext4_sync_file".to_string(),
            program: "ig_fssl_sync_e".to_string(),
            reason: "no such symbol".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ext4_sync_file"));
        assert!(msg.contains("ig_fssl_sync_e"));
    }
}
