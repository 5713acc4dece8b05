//! Error taxonomy for runtime operations

use manifold_backends::BackendError;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the runtime
///
/// Every failure is reported synchronously to the call that triggered
/// it; nothing is deferred or batched.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad or missing setup options
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The selected backend failed to initialize
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Operation attempted on an unconfigured device
    #[error("device is not configured")]
    NotReady,

    /// The backend could not reserve the requested region
    #[error("out of memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    /// Transfer length exceeds the handle's capacity
    #[error("size mismatch: requested {requested} bytes, capacity {capacity} bytes")]
    SizeMismatch { requested: usize, capacity: usize },

    /// Element types disagree
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// The handle's storage was released (explicit free or device teardown)
    #[error("use after free: the handle's backing storage has been released")]
    UseAfterFree,

    /// Kernel compilation failed; carries the diagnostic text
    #[error("kernel build failed: {diagnostic}")]
    Build { diagnostic: String },

    /// Launch argument count does not match the kernel's formals
    #[error("argument count mismatch: kernel expects {expected} arguments, got {actual}")]
    ArgumentCount { expected: usize, actual: usize },

    /// A memory handle from another device was passed to a launch
    #[error("memory handle belongs to a different device")]
    DeviceMismatch,

    /// Runtime failure inside the backend, not attributable to arguments
    #[error("backend execution failed: {0}")]
    BackendExecution(String),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Create a type mismatch error
    pub fn type_mismatch(expected: impl ToString, actual: impl ToString) -> Self {
        Error::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Config(msg) => Error::Configuration(msg),
            BackendError::Init(msg) => Error::Unavailable(msg),
            BackendError::OutOfMemory { requested } => Error::OutOfMemory { requested },
            BackendError::SizeMismatch { requested, capacity } => Error::SizeMismatch { requested, capacity },
            BackendError::InvalidHandle(id) => Error::BackendExecution(format!("invalid buffer handle {id}")),
            BackendError::Compile(diagnostic) => Error::Build { diagnostic },
            BackendError::Execution(msg) => Error::BackendExecution(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_mapping() {
        assert!(matches!(
            Error::from(BackendError::Config("bad".into())),
            Error::Configuration(_)
        ));
        assert!(matches!(
            Error::from(BackendError::Init("no gpu".into())),
            Error::Unavailable(_)
        ));
        assert!(matches!(
            Error::from(BackendError::OutOfMemory { requested: 8 }),
            Error::OutOfMemory { requested: 8 }
        ));
        assert!(matches!(
            Error::from(BackendError::Compile("line 1: oops".into())),
            Error::Build { .. }
        ));
        assert!(matches!(
            Error::from(BackendError::Execution("lost context".into())),
            Error::BackendExecution(_)
        ));
    }
}
