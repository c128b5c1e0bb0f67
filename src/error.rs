//! RHI error types.

use thiserror::Error;

/// Errors that can occur in the RHI.
///
/// Only construction-time and synchronization failures surface as errors.
/// Soft conditions (binding a null resource, polling a query that is not
/// ready yet, binding an empty uniform pool) are absorbed locally and never
/// reach the caller as a signal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RhiError {
    /// Failed to initialize the backend.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
    /// Failed to create a device object.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    /// The requested backend or capability is not available on this build.
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),
    /// Out of GPU memory.
    #[error("out of GPU memory")]
    OutOfMemory,
    /// The GPU device was lost.
    #[error("GPU device lost")]
    DeviceLost,
    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// A sub-allocation request exceeded the fixed block size.
    #[error("allocation of {requested} bytes exceeds block size {block_size}")]
    AllocationTooLarge { requested: u64, block_size: u64 },
    /// A render-target set had no attachment to derive an extent from.
    #[error("render target has no attachments to size from")]
    MissingRenderTargetExtent,
    /// A fence wait exceeded the diagnostic timeout.
    #[error("fence wait timed out")]
    FenceTimeout,
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(RhiError::OutOfMemory.to_string(), "out of GPU memory");
        assert_eq!(
            RhiError::AllocationTooLarge {
                requested: 100,
                block_size: 50
            }
            .to_string(),
            "allocation of 100 bytes exceeds block size 50"
        );
        assert_eq!(
            RhiError::InitializationFailed("no GPU found".to_string()).to_string(),
            "initialization failed: no GPU found"
        );
    }
}
