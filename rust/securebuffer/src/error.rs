use thiserror::Error;

/// Errors that can occur in the securebuffer library.
///
/// Construction failures (`Initialization`, `InvalidSize`, `Allocation`, `Pin`)
/// never leave a resource behind. Access failures (`InvalidInput`, `Oversize`,
/// `UseAfterClose`) never expose stale memory.
///
/// # Examples
///
/// ```rust
/// use securebuffer::{SecureBuffer, SecureBufferError};
///
/// match SecureBuffer::create(0) {
///     Err(SecureBufferError::InvalidSize(0)) => {}
///     other => panic!("unexpected result: {:?}", other.map(|_| ())),
/// }
/// ```
#[derive(Error, Debug)]
pub enum SecureBufferError {
    /// The secure-memory facility is unavailable or failed its self-check.
    ///
    /// No buffer can be created in this process once this has been reported.
    #[error("Secure memory initialization failed: {0}")]
    Initialization(String),

    /// A buffer was requested with a size of zero.
    #[error("Invalid buffer size: {0}")]
    InvalidSize(usize),

    /// The memory could not be allocated.
    #[error("Failed to allocate secure memory: {0}")]
    Allocation(String),

    /// The memory could not be locked into RAM.
    ///
    /// Common causes are insufficient permissions or a low `RLIMIT_MEMLOCK`.
    #[error("Failed to lock memory: {0}")]
    Pin(String),

    /// The memory could not be unlocked.
    ///
    /// Raised by allocators only; the buffer logs it and finishes closing.
    #[error("Failed to unlock memory: {0}")]
    Unpin(String),

    /// The memory could not be returned to the system.
    #[error("Failed to release memory: {0}")]
    Release(String),

    /// The input could not be read as a byte sequence.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The data does not fit in the buffer.
    #[error("Data of {len} bytes does not fit in a buffer of {capacity} bytes")]
    Oversize {
        /// Length of the rejected data.
        len: usize,
        /// Fixed size of the buffer.
        capacity: usize,
    },

    /// The buffer has already been closed.
    #[error("Buffer is already closed")]
    UseAfterClose,

    /// A canary around the region was modified, indicating an overflow or tampering.
    #[error("Memory corruption detected: {0}")]
    MemoryCorruption(String),
}

/// Result type for securebuffer operations.
pub type Result<T> = std::result::Result<T, SecureBufferError>;
