//! Error types for driver operations

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur inside an execution driver
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Invalid or unusable configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Driver failed to acquire its execution context
    #[error("driver initialization failed: {0}")]
    Init(String),

    /// Invalid buffer handle
    #[error("invalid buffer handle: {0}")]
    InvalidHandle(u64),

    /// Backend could not reserve the requested region
    #[error("out of memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    /// Transfer length exceeds the buffer's capacity
    #[error("transfer out of bounds: requested {requested} bytes, buffer holds {capacity}")]
    SizeMismatch { requested: usize, capacity: usize },

    /// Kernel source failed to compile; carries the diagnostic text
    #[error("kernel build failed: {0}")]
    Compile(String),

    /// Runtime failure during launch or synchronization
    #[error("execution failed: {0}")]
    Execution(String),
}

impl BackendError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a compile error with diagnostic text
    pub fn compile(msg: impl Into<String>) -> Self {
        Self::Compile(msg.into())
    }

    /// Create an execution error
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }
}
