use thiserror::Error;

/// Errors that can occur during memory-related system calls.
#[derive(Error, Debug)]
pub enum MemcallError {
    /// The system call failed for a reason not covered below.
    #[error("System operation failed: {0}")]
    SystemError(String),

    /// Invalid arguments were provided to the operation.
    #[error("Invalid arguments: {0}")]
    InvalidArgument(String),

    /// The process is out of memory or hit a resource limit such as `RLIMIT_MEMLOCK`.
    #[error("Resource limit reached: {0}")]
    ResourceLimit(String),

    /// The operation failed due to insufficient permissions.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl MemcallError {
    /// Classifies the last OS error after a failed call.
    pub(crate) fn last_os_error(context: String) -> Self {
        let err = std::io::Error::last_os_error();
        let message = format!("{} [Err: {}]", context, err);

        match err.raw_os_error() {
            Some(libc::ENOMEM) | Some(libc::EAGAIN) => MemcallError::ResourceLimit(message),
            Some(libc::EPERM) | Some(libc::EACCES) => MemcallError::PermissionDenied(message),
            Some(libc::EINVAL) => MemcallError::InvalidArgument(message),
            _ => MemcallError::SystemError(message),
        }
    }
}
