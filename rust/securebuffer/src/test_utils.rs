//! Utilities for testing securebuffer components
//!
//! [`FakeAllocator`] stands in for the native allocator: plain heap memory, no
//! pinning, a log of every call, and optional injected failures. [`TestGuard`]
//! serializes tests that lock real memory so they do not exhaust
//! `RLIMIT_MEMLOCK` together.

use crate::allocator::{RegionBytes, SecureAllocator};
use crate::error::{Result, SecureBufferError};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};

static TEST_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Holds an exclusive lock for the duration of a test, released on drop even if the test panics.
pub struct TestGuard {
    _lock: MutexGuard<'static, ()>,
}

impl TestGuard {
    /// Blocks until no other guarded test is running.
    pub fn new() -> Self {
        Self {
            _lock: TEST_MUTEX.lock(),
        }
    }
}

impl Default for TestGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Defines a `#[test]` that runs while holding a [`TestGuard`].
///
/// ```rust,no_run
/// use securebuffer::{isolated_test, SecureBuffer};
///
/// isolated_test!(locks_real_memory, {
///     let buffer = SecureBuffer::create(32).unwrap();
///     buffer.close().unwrap();
/// });
/// # fn main() {}
/// ```
#[macro_export]
macro_rules! isolated_test {
    ($name:ident, $body:expr) => {
        #[test]
        fn $name() {
            let _guard = $crate::test_utils::TestGuard::new();
            $body
        }
    };
}

/// One call made against a [`FakeAllocator`]. Region calls carry the region id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    /// `init()`
    Init,
    /// `allocate(size)`
    Allocate(usize),
    /// `pin(region)`
    Pin(usize),
    /// `wipe(region)`
    Wipe(usize),
    /// `unpin(region)`
    Unpin(usize),
    /// `release(region)`
    Release(usize),
}

/// The step a [`FakeAllocator`] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    /// `init` returns `Initialization`.
    Init,
    /// `allocate` returns `Allocation`.
    Allocate,
    /// `pin` returns `Pin`.
    Pin,
    /// `unpin` returns `Unpin`.
    Unpin,
    /// `release` frees the region but returns `Release`.
    Release,
}

/// Heap-backed region handed out by [`FakeAllocator`].
#[derive(Debug)]
pub struct FakeRegion {
    id: usize,
    bytes: Vec<u8>,
}

impl FakeRegion {
    /// Identifier used in the allocator's call log.
    pub fn id(&self) -> usize {
        self.id
    }
}

impl RegionBytes for FakeRegion {
    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    next_id: usize,
    released: Vec<Vec<u8>>,
}

/// A [`SecureAllocator`] for protocol tests.
///
/// Released regions are kept as snapshots so tests can check they were wiped.
#[derive(Default)]
pub struct FakeAllocator {
    fail_on: Vec<FailOn>,
    state: Mutex<FakeState>,
}

impl FakeAllocator {
    /// An allocator where every call succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// An allocator that fails `step` every time it is reached.
    pub fn failing(step: FailOn) -> Self {
        Self::failing_all(&[step])
    }

    /// An allocator that fails each of `steps` every time it is reached.
    pub fn failing_all(steps: &[FailOn]) -> Self {
        Self {
            fail_on: steps.to_vec(),
            state: Mutex::default(),
        }
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Number of calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(*c)).count()
    }

    /// Contents of each region at the moment it was released.
    pub fn released_contents(&self) -> Vec<Vec<u8>> {
        self.state.lock().released.clone()
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }

    fn fails(&self, step: FailOn) -> bool {
        self.fail_on.contains(&step)
    }
}

impl SecureAllocator for FakeAllocator {
    type Region = FakeRegion;

    fn init(&self) -> Result<()> {
        self.record(Call::Init);
        if self.fails(FailOn::Init) {
            return Err(SecureBufferError::Initialization("fake facility unavailable".to_string()));
        }
        Ok(())
    }

    fn allocate(&self, size: usize) -> Result<FakeRegion> {
        let mut state = self.state.lock();
        state.calls.push(Call::Allocate(size));
        if self.fails(FailOn::Allocate) {
            return Err(SecureBufferError::Allocation("fake allocation refused".to_string()));
        }

        let id = state.next_id;
        state.next_id += 1;
        // Garbage rather than zeros, so tests see that writes zero-fill.
        Ok(FakeRegion {
            id,
            bytes: vec![0xEE; size],
        })
    }

    fn pin(&self, region: &mut FakeRegion) -> Result<()> {
        self.record(Call::Pin(region.id));
        if self.fails(FailOn::Pin) {
            return Err(SecureBufferError::Pin("fake mlock refused".to_string()));
        }
        Ok(())
    }

    fn wipe(&self, region: &mut FakeRegion) {
        self.record(Call::Wipe(region.id));
        region.bytes.fill(0);
    }

    fn unpin(&self, region: &mut FakeRegion) -> Result<()> {
        self.record(Call::Unpin(region.id));
        if self.fails(FailOn::Unpin) {
            return Err(SecureBufferError::Unpin("fake munlock refused".to_string()));
        }
        Ok(())
    }

    fn release(&self, region: FakeRegion) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Release(region.id));
        state.released.push(region.bytes);
        if self.fails(FailOn::Release) {
            return Err(SecureBufferError::Release("fake munmap refused".to_string()));
        }
        Ok(())
    }
}
