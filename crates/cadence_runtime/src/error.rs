//! Error types for the scene engine

/// Failure reported by a device collaborator
///
/// Vendor clients classify their transport errors into these variants so the
/// engine can log them uniformly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("device unreachable: {0}")]
    Unreachable(String),

    #[error("device rejected the request: {0}")]
    Rejected(String),

    #[error("request timed out")]
    Timeout,

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("{0}")]
    Other(String),
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors from the configuration store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),
}

/// Errors returned by engine operations
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("Scene already running")]
    AlreadyRunning,

    #[error("Scene task failed: {0}")]
    TaskFailed(String),
}

/// Result type for engine operations
pub type SceneResult<T> = Result<T, SceneError>;
