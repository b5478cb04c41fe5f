use crate::allocator::{RegionBytes, SecureAllocator};
use crate::error::{Result, SecureBufferError};
use crate::guarded::GuardedAllocator;
use log::{error, trace, warn};
use parking_lot::Mutex;
use std::io::{ErrorKind, Read};
use zeroize::Zeroize;

/// Lifecycle state of a [`SecureBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// The region is allocated, pinned and accessible.
    Open,
    /// The region has been wiped, unpinned and released. Permanent.
    Closed,
}

/// A fixed-size, pinned region for sensitive bytes that is wiped before release.
///
/// - Construction allocates and pins the region; a failed pin releases it again.
/// - `write` always zero-fills past the data and `read` always returns the
///   full size, so the buffer never reveals how long its content is.
/// - `close` wipes, unpins and releases exactly once, however many times it
///   is called and from however many threads. `Drop` calls it too.
///
/// Operations on one instance are serialized by an internal lock, held while
/// a [`with_bytes`](Self::with_bytes) closure runs; that closure must not call
/// back into the same buffer.
///
/// # Example
///
/// ```rust,no_run
/// use securebuffer::SecureBuffer;
///
/// let buffer = SecureBuffer::create(9)?;
/// buffer.write(b"topsecret")?;
/// assert_eq!(buffer.read()?, b"topsecret");
///
/// buffer.zero()?;
/// assert_eq!(buffer.read()?, vec![0u8; 9]);
///
/// buffer.close()?;
/// assert!(buffer.read().is_err());
/// # Ok::<(), securebuffer::SecureBufferError>(())
/// ```
pub struct SecureBuffer<A: SecureAllocator = GuardedAllocator> {
    allocator: A,
    size: usize,
    // Some while open, None once closed
    region: Mutex<Option<A::Region>>,
}

impl SecureBuffer<GuardedAllocator> {
    /// Creates a buffer of `size` bytes from the native guarded allocator.
    pub fn create(size: usize) -> Result<Self> {
        Self::create_in(GuardedAllocator::new(), size)
    }

    /// Runs `f` over a fresh buffer of `size` bytes and closes it on every exit path.
    ///
    /// If `f` succeeds, a failure to close is returned instead of its value.
    /// If `f` fails, its error is returned and a close failure is only logged.
    /// If `f` panics, `Drop` closes the buffer during unwinding.
    ///
    /// ```rust,no_run
    /// use securebuffer::{SecureBuffer, SecureBufferError};
    ///
    /// let len = SecureBuffer::scoped(32, |key| {
    ///     key.write(b"hunter2")?;
    ///     key.with_bytes(|bytes| bytes.len())
    /// })?;
    /// assert_eq!(len, 32);
    /// # Ok::<(), SecureBufferError>(())
    /// ```
    pub fn scoped<T, E, F>(size: usize, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Self) -> std::result::Result<T, E>,
        E: From<SecureBufferError>,
    {
        Self::scoped_in(GuardedAllocator::new(), size, f)
    }
}

impl<A: SecureAllocator> SecureBuffer<A> {
    /// Creates a buffer of `size` bytes from `allocator`.
    ///
    /// # Errors
    ///
    /// * `InvalidSize` - `size` is zero; the allocator is not touched
    /// * `Initialization` - the allocator's facility is unavailable
    /// * `Allocation` - the region could not be reserved
    /// * `Pin` - the region could not be locked; it has been released again
    pub fn create_in(allocator: A, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(SecureBufferError::InvalidSize(size));
        }

        allocator.init()?;

        let mut region = allocator.allocate(size)?;

        if let Err(e) = allocator.pin(&mut region) {
            if let Err(release_err) = allocator.release(region) {
                error!("Failed to release region after pin failure: {}", release_err);
            }
            return Err(e);
        }

        trace!("Created secure buffer of {} bytes", size);

        Ok(Self {
            allocator,
            size,
            region: Mutex::new(Some(region)),
        })
    }

    /// Scoped acquisition over any allocator. See [`SecureBuffer::scoped`].
    pub fn scoped_in<T, E, F>(allocator: A, size: usize, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Self) -> std::result::Result<T, E>,
        E: From<SecureBufferError>,
    {
        let buffer = Self::create_in(allocator, size)?;
        let outcome = f(&buffer);
        let closed = buffer.close();

        match outcome {
            Ok(value) => {
                closed?;
                Ok(value)
            }
            Err(e) => {
                if let Err(close_err) = closed {
                    error!("Failed to close scoped buffer after error: {}", close_err);
                }
                Err(e)
            }
        }
    }

    fn with_region<R>(&self, f: impl FnOnce(&mut A::Region) -> R) -> Result<R> {
        let mut guard = self.region.lock();
        let region = guard.as_mut().ok_or(SecureBufferError::UseAfterClose)?;
        Ok(f(region))
    }

    /// Copies `data` to the start of the buffer and zero-fills the rest.
    ///
    /// Nothing from an earlier, longer write survives.
    ///
    /// # Errors
    ///
    /// * `Oversize` - `data` is longer than the buffer; the content is unchanged
    /// * `UseAfterClose` - the buffer has been closed
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.with_region(|region| {
            let bytes = region.as_bytes_mut();
            if data.len() > bytes.len() {
                return Err(SecureBufferError::Oversize {
                    len: data.len(),
                    capacity: bytes.len(),
                });
            }

            let (head, tail) = bytes.split_at_mut(data.len());
            head.copy_from_slice(data);
            tail.zeroize();
            Ok(())
        })?
    }

    /// Reads `reader` to its end straight into the buffer and zero-fills the rest.
    ///
    /// Returns the number of bytes read. On any error the buffer is left zeroed.
    ///
    /// # Errors
    ///
    /// * `InvalidInput` - the reader failed
    /// * `Oversize` - the reader had more bytes than the buffer holds
    /// * `UseAfterClose` - the buffer has been closed
    pub fn write_from<R: Read>(&self, mut reader: R) -> Result<usize> {
        self.with_region(|region| {
            let bytes = region.as_bytes_mut();
            let result = fill_from(&mut reader, bytes);
            if result.is_err() {
                bytes.zeroize();
            }
            result
        })?
    }

    /// Returns a copy of the whole buffer, zero padding included.
    ///
    /// The copy is ordinary heap memory; wipe it when done (see `zeroize::Zeroizing`).
    pub fn read(&self) -> Result<Vec<u8>> {
        self.with_region(|region| region.as_bytes().to_vec())
    }

    /// Runs `f` over the buffer's bytes in place, without copying them out.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.with_region(|region| f(region.as_bytes()))
    }

    /// Overwrites the whole buffer with zeros. The buffer stays open.
    pub fn zero(&self) -> Result<()> {
        self.with_region(|region| region.as_bytes_mut().zeroize())
    }

    /// Wipes, unpins and releases the region, then marks the buffer closed.
    ///
    /// Calling `close` on a closed buffer does nothing and succeeds. When
    /// several threads race, exactly one runs the sequence; the others wait
    /// for it to finish and then return `Ok`.
    ///
    /// An unpin failure is logged and does not stop the release. A release
    /// failure is returned, but the buffer is closed regardless.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.region.lock();
        let Some(mut region) = guard.take() else {
            return Ok(());
        };

        self.allocator.wipe(&mut region);

        if let Err(e) = self.allocator.unpin(&mut region) {
            warn!("Failed to unpin secure buffer of {} bytes: {}", self.size, e);
        }

        let released = self.allocator.release(region);
        drop(guard);

        trace!("Closed secure buffer of {} bytes", self.size);
        released
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BufferState {
        if self.region.lock().is_some() {
            BufferState::Open
        } else {
            BufferState::Closed
        }
    }

    /// Returns true once the buffer has been closed.
    pub fn is_closed(&self) -> bool {
        self.state() == BufferState::Closed
    }

    /// The fixed size chosen at creation. Unchanged by `close`.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Always false: buffers cannot be created empty.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

fn read_retrying<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

fn fill_from<R: Read>(reader: &mut R, bytes: &mut [u8]) -> Result<usize> {
    let capacity = bytes.len();
    let mut filled = 0;

    while filled < capacity {
        match read_retrying(reader, &mut bytes[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => return Err(SecureBufferError::InvalidInput(e.to_string())),
        }
    }

    if filled == capacity {
        let mut probe = [0u8; 1];
        let extra = read_retrying(reader, &mut probe);
        probe.zeroize();
        match extra {
            Ok(0) => {}
            Ok(n) => {
                return Err(SecureBufferError::Oversize {
                    len: capacity + n,
                    capacity,
                })
            }
            Err(e) => return Err(SecureBufferError::InvalidInput(e.to_string())),
        }
    }

    bytes[filled..].zeroize();
    Ok(filled)
}

impl<A: SecureAllocator> Drop for SecureBuffer<A> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Error closing secure buffer during drop: {}", e);
        }
    }
}

impl<A: SecureAllocator> std::fmt::Debug for SecureBuffer<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureBuffer")
            .field("size", &self.size)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Call, FailOn, FakeAllocator};
    use std::io::Cursor;
    use std::sync::Arc;

    fn fake(size: usize) -> (Arc<FakeAllocator>, SecureBuffer<Arc<FakeAllocator>>) {
        let allocator = Arc::new(FakeAllocator::new());
        let buffer = SecureBuffer::create_in(Arc::clone(&allocator), size).expect("create");
        (allocator, buffer)
    }

    #[test]
    fn test_create_runs_init_allocate_pin() {
        let (allocator, buffer) = fake(8);

        assert_eq!(allocator.calls(), vec![Call::Init, Call::Allocate(8), Call::Pin(0)]);
        assert_eq!(buffer.state(), BufferState::Open);
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn test_zero_size_touches_nothing() {
        let allocator = Arc::new(FakeAllocator::new());
        let err = SecureBuffer::create_in(Arc::clone(&allocator), 0).expect_err("zero size");

        assert!(matches!(err, SecureBufferError::InvalidSize(0)));
        assert!(allocator.calls().is_empty());
    }

    #[test]
    fn test_init_failure_prevents_allocation() {
        let allocator = Arc::new(FakeAllocator::failing(FailOn::Init));
        let err = SecureBuffer::create_in(Arc::clone(&allocator), 8).expect_err("init fails");

        assert!(matches!(err, SecureBufferError::Initialization(_)));
        assert_eq!(allocator.calls(), vec![Call::Init]);
    }

    #[test]
    fn test_allocation_failure_creates_nothing() {
        let allocator = Arc::new(FakeAllocator::failing(FailOn::Allocate));
        let err = SecureBuffer::create_in(Arc::clone(&allocator), 8).expect_err("allocate fails");

        assert!(matches!(err, SecureBufferError::Allocation(_)));
        assert_eq!(allocator.calls(), vec![Call::Init, Call::Allocate(8)]);
    }

    #[test]
    fn test_pin_failure_releases_region() {
        let allocator = Arc::new(FakeAllocator::failing(FailOn::Pin));
        let err = SecureBuffer::create_in(Arc::clone(&allocator), 8).expect_err("pin fails");

        assert!(matches!(err, SecureBufferError::Pin(_)));
        assert_eq!(
            allocator.calls(),
            vec![Call::Init, Call::Allocate(8), Call::Pin(0), Call::Release(0)]
        );
    }

    #[test]
    fn test_pin_failure_wins_over_release_failure() {
        let allocator = Arc::new(FakeAllocator::failing_all(&[FailOn::Pin, FailOn::Release]));
        let err = SecureBuffer::create_in(Arc::clone(&allocator), 4).expect_err("pin fails");

        assert!(matches!(err, SecureBufferError::Pin(_)), "got {:?}", err);
        assert_eq!(
            allocator.calls(),
            vec![Call::Init, Call::Allocate(4), Call::Pin(0), Call::Release(0)]
        );
        assert_eq!(allocator.count(|c| matches!(c, Call::Release(_))), 1);
        assert_eq!(allocator.released_contents().len(), 1);
    }

    #[test]
    fn test_write_zero_fills_tail() {
        let (_allocator, buffer) = fake(6);

        buffer.write(b"abc").unwrap();
        assert_eq!(buffer.read().unwrap(), b"abc\0\0\0");
    }

    #[test]
    fn test_shorter_rewrite_leaves_no_residue() {
        let (_allocator, buffer) = fake(10);

        buffer.write(b"0123456789").unwrap();
        buffer.write(b"xy").unwrap();

        assert_eq!(buffer.read().unwrap(), b"xy\0\0\0\0\0\0\0\0");
    }

    #[test]
    fn test_empty_write_zeroes_everything() {
        let (_allocator, buffer) = fake(4);

        buffer.write(b"").unwrap();
        assert_eq!(buffer.read().unwrap(), vec![0u8; 4]);
    }

    #[test]
    fn test_oversize_write_is_rejected_and_content_kept() {
        let (_allocator, buffer) = fake(4);
        buffer.write(b"1234").unwrap();

        let err = buffer.write(b"12345").expect_err("oversize");
        assert!(matches!(err, SecureBufferError::Oversize { len: 5, capacity: 4 }));
        assert_eq!(buffer.read().unwrap(), b"1234");
    }

    #[test]
    fn test_zero_keeps_buffer_open() {
        let (_allocator, buffer) = fake(9);

        buffer.write(b"topsecret").unwrap();
        buffer.zero().unwrap();
        buffer.zero().unwrap();

        assert_eq!(buffer.read().unwrap(), vec![0u8; 9]);
        assert_eq!(buffer.state(), BufferState::Open);
    }

    #[test]
    fn test_close_sequence_runs_once() {
        let (allocator, buffer) = fake(5);
        buffer.write(b"abcde").unwrap();

        buffer.close().unwrap();
        buffer.close().unwrap();
        buffer.close().unwrap();

        assert_eq!(
            allocator.calls()[3..].to_vec(),
            vec![Call::Wipe(0), Call::Unpin(0), Call::Release(0)]
        );
        assert_eq!(allocator.released_contents(), vec![vec![0u8; 5]]);
        assert!(buffer.is_closed());
    }

    #[test]
    fn test_access_after_close_fails() {
        let (_allocator, buffer) = fake(4);
        buffer.write(b"1234").unwrap();
        buffer.close().unwrap();

        assert!(matches!(buffer.read(), Err(SecureBufferError::UseAfterClose)));
        assert!(matches!(buffer.write(b"1"), Err(SecureBufferError::UseAfterClose)));
        assert!(matches!(buffer.zero(), Err(SecureBufferError::UseAfterClose)));
        assert!(matches!(buffer.with_bytes(|b| b.len()), Err(SecureBufferError::UseAfterClose)));
        assert!(matches!(
            buffer.write_from(Cursor::new(b"1")),
            Err(SecureBufferError::UseAfterClose)
        ));
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_unpin_failure_still_wipes_and_releases() {
        let allocator = Arc::new(FakeAllocator::failing(FailOn::Unpin));
        let buffer = SecureBuffer::create_in(Arc::clone(&allocator), 3).unwrap();
        buffer.write(b"key").unwrap();

        buffer.close().expect("unpin failure is not surfaced");

        assert_eq!(allocator.count(|c| matches!(c, Call::Wipe(_))), 1);
        assert_eq!(allocator.count(|c| matches!(c, Call::Release(_))), 1);
        assert_eq!(allocator.released_contents(), vec![vec![0u8; 3]]);
        assert!(buffer.is_closed());
    }

    #[test]
    fn test_release_failure_is_reported_once_and_buffer_closed() {
        let allocator = Arc::new(FakeAllocator::failing(FailOn::Release));
        let buffer = SecureBuffer::create_in(Arc::clone(&allocator), 3).unwrap();

        assert!(matches!(buffer.close(), Err(SecureBufferError::Release(_))));
        assert!(buffer.close().is_ok());
        assert!(buffer.is_closed());
        assert_eq!(allocator.count(|c| matches!(c, Call::Release(_))), 1);
    }

    #[test]
    fn test_drop_closes_open_buffer() {
        let (allocator, buffer) = fake(4);
        buffer.write(b"pass").unwrap();
        drop(buffer);

        assert_eq!(allocator.count(|c| matches!(c, Call::Release(_))), 1);
        assert_eq!(allocator.released_contents(), vec![vec![0u8; 4]]);
    }

    #[test]
    fn test_drop_after_close_does_not_release_again() {
        let (allocator, buffer) = fake(4);
        buffer.close().unwrap();
        drop(buffer);

        assert_eq!(allocator.count(|c| matches!(c, Call::Release(_))), 1);
    }

    #[test]
    fn test_write_from_reader() {
        let (_allocator, buffer) = fake(8);
        buffer.write(b"XXXXXXXX").unwrap();

        let n = buffer.write_from(Cursor::new(b"abc")).unwrap();

        assert_eq!(n, 3);
        assert_eq!(buffer.read().unwrap(), b"abc\0\0\0\0\0");
    }

    #[test]
    fn test_write_from_exact_fit() {
        let (_allocator, buffer) = fake(4);

        assert_eq!(buffer.write_from(Cursor::new(b"1234")).unwrap(), 4);
        assert_eq!(buffer.read().unwrap(), b"1234");
    }

    #[test]
    fn test_write_from_oversize_leaves_zeros() {
        let (_allocator, buffer) = fake(4);

        let err = buffer.write_from(Cursor::new(b"12345")).expect_err("oversize");
        assert!(matches!(err, SecureBufferError::Oversize { capacity: 4, .. }));
        assert_eq!(buffer.read().unwrap(), vec![0u8; 4]);
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::InvalidData, "not bytes"))
        }
    }

    #[test]
    fn test_write_from_failing_reader_is_invalid_input() {
        let (_allocator, buffer) = fake(4);
        buffer.write(b"old!").unwrap();

        let err = buffer.write_from(BrokenReader).expect_err("reader fails");
        assert!(matches!(err, SecureBufferError::InvalidInput(_)));
        assert_eq!(buffer.read().unwrap(), vec![0u8; 4]);
    }

    #[test]
    fn test_debug_hides_contents() {
        let (_allocator, buffer) = fake(6);
        buffer.write(b"secret").unwrap();

        let rendered = format!("{:?}", buffer);
        assert!(rendered.contains("size: 6"));
        assert!(!rendered.contains("secret"));
    }
}
