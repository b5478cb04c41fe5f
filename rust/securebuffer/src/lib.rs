//! # Secure Buffer
//!
//! Short-lived scratch buffers for sensitive bytes (keys, passwords) that are
//! kept out of swap, wiped before they are released, and unusable afterwards.
//!
//! ## Features
//!
//! - **Guarded Allocation**: every buffer sits between two `NoAccess` guard pages
//!   with a random canary in front of it, checked on release
//! - **RAM Locking**: the region is `mlock`ed for its whole life and excluded from core dumps
//! - **Constant Representation**: writes zero-fill the tail and reads return the full
//!   size, so the buffer never reveals the length of its content
//! - **Idempotent Close**: wipe, unlock and release happen exactly once, whether
//!   triggered by `close`, by a scoped block ending, or by `Drop`
//! - **Thread-Safe**: a buffer can be shared behind an `Arc`; racing `close` calls are safe
//! - **Pluggable Allocator**: the buffer runs on any [`SecureAllocator`], including the
//!   in-memory [`FakeAllocator`](test_utils::FakeAllocator) used by the tests
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use securebuffer::SecureBuffer;
//!
//! let buffer = SecureBuffer::create(32)?;
//! buffer.write(b"correct horse battery staple")?;
//!
//! buffer.with_bytes(|key| {
//!     // hand `key` to a cipher here
//!     assert_eq!(key.len(), 32);
//! })?;
//!
//! // Wiped, unlocked and unmapped; also happens on drop.
//! buffer.close()?;
//! # Ok::<(), securebuffer::SecureBufferError>(())
//! ```
//!
//! ## Scoped Usage
//!
//! ```rust,no_run
//! use securebuffer::{SecureBuffer, SecureBufferError};
//!
//! let read = SecureBuffer::scoped(64, |buffer| {
//!     let n = buffer.write_from(std::io::stdin())?;
//!     Ok::<_, SecureBufferError>(n)
//! })?;
//! assert!(read <= 64);
//! # Ok::<(), SecureBufferError>(())
//! ```
//!
//! ## Initialization
//!
//! The native allocator initializes the process-wide [`runtime`] on first use.
//! Hosts that want different settings call [`runtime::init_with`] before
//! creating any buffer.

/// The allocator capability buffers are built on
pub mod allocator;

/// Error types
pub mod error;

/// Page-guarded native allocator
pub mod guarded;

/// Process-wide one-time setup
pub mod runtime;

/// Utilities for testing
pub mod test_utils;

mod buffer;

pub use crate::allocator::{RegionBytes, SecureAllocator};
pub use crate::buffer::{BufferState, SecureBuffer};
pub use crate::error::{Result, SecureBufferError};
pub use crate::guarded::GuardedAllocator;

#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}
