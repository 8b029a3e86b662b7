//! Buffer pool and reference-counted media buffers
//!
//! A [`BufferPool`] owns a fixed set of equally sized allocations. Producers
//! [`acquire`](BufferPool::acquire) a [`MutableBuffer`], fill it, and
//! [`freeze`](MutableBuffer::freeze) it into a [`MediaBuffer`] before handing it
//! downstream. From that point the data region is immutable. Cloning a
//! `MediaBuffer` adds a reference; when the last reference drops the
//! allocation goes back to its pool and the release observer (if any) runs
//! exactly once.
//!
//! Buffers that alias memory owned by someone else (device frames) are built
//! with [`MediaBuffer::from_bytes`] and usually carry an observer that hands the
//! memory back to its owner.

use crate::error::{MediaError, MediaResult};
use crate::meta::MetaData;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Identity of a buffer inside its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub usize);

/// Callback invoked once when the last reference to a buffer is released
pub type ReleaseObserver = Box<dyn FnOnce() + Send>;

/// Buffer pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Name used in log lines
    pub name: String,
    /// Number of buffers
    pub buffer_count: usize,
    /// Capacity of every buffer in bytes
    pub buffer_size: usize,
}

impl PoolConfig {
    /// Create a configuration for `buffer_count` buffers of `buffer_size` bytes
    pub fn new(name: &str, buffer_count: usize, buffer_size: usize) -> Self {
        Self {
            name: name.to_string(),
            buffer_count,
            buffer_size,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> MediaResult<()> {
        if self.buffer_count == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "Buffer pool needs at least one buffer".to_string(),
            });
        }
        if self.buffer_size == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "Buffer size must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

struct PoolState {
    free: Vec<(BufferId, Vec<u8>)>,
    outstanding: usize,
    closed: bool,
}

struct PoolShared {
    name: String,
    capacity: usize,
    buffer_size: usize,
    state: Mutex<PoolState>,
    changed: Condvar,
}

impl PoolShared {
    fn give_back(&self, id: BufferId, data: Vec<u8>) {
        let mut state = self.state.lock();
        state.free.push((id, data));
        state.outstanding = state.outstanding.saturating_sub(1);
        trace!(pool = %self.name, id = id.0, outstanding = state.outstanding, "buffer returned");
        self.changed.notify_all();
    }
}

/// Fixed-capacity pool of reusable buffers
///
/// The pool is owned by the component that created it. Buffers still on loan
/// when the pool is dropped simply free their memory on release.
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Allocate every buffer up front
    pub fn new(config: PoolConfig) -> MediaResult<Self> {
        config.validate()?;

        let mut free = Vec::with_capacity(config.buffer_count);
        for index in 0..config.buffer_count {
            let mut data = Vec::new();
            data.try_reserve_exact(config.buffer_size)
                .map_err(|_| MediaError::NoMemory {
                    size: config.buffer_size,
                })?;
            data.resize(config.buffer_size, 0);
            free.push((BufferId(index), data));
        }
        // hand out low ids first
        free.reverse();

        debug!(
            pool = %config.name,
            count = config.buffer_count,
            size = config.buffer_size,
            "buffer pool allocated"
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                name: config.name,
                capacity: config.buffer_count,
                buffer_size: config.buffer_size,
                state: Mutex::new(PoolState {
                    free,
                    outstanding: 0,
                    closed: false,
                }),
                changed: Condvar::new(),
            }),
        })
    }

    /// Shorthand for an anonymous pool
    pub fn with_buffers(buffer_count: usize, buffer_size: usize) -> MediaResult<Self> {
        Self::new(PoolConfig::new("pool", buffer_count, buffer_size))
    }

    /// Acquire a buffer, blocking until one is returned
    ///
    /// Fails with [`MediaError::Stopped`] once the pool is closed.
    pub fn acquire(&self) -> MediaResult<MutableBuffer> {
        self.acquire_inner(None)
    }

    /// Acquire a buffer, waiting at most `timeout`
    pub fn acquire_timeout(&self, timeout: Duration) -> MediaResult<MutableBuffer> {
        self.acquire_inner(Some(timeout))
    }

    /// Acquire a buffer without blocking
    pub fn try_acquire(&self) -> MediaResult<MutableBuffer> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(MediaError::Stopped);
        }
        match state.free.pop() {
            Some((id, data)) => {
                state.outstanding += 1;
                Ok(self.wrap(id, data))
            }
            None => Err(MediaError::PoolExhausted {
                outstanding: state.outstanding,
                capacity: self.shared.capacity,
            }),
        }
    }

    fn acquire_inner(&self, timeout: Option<Duration>) -> MediaResult<MutableBuffer> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state.lock();
        loop {
            if state.closed {
                return Err(MediaError::Stopped);
            }
            if let Some((id, data)) = state.free.pop() {
                state.outstanding += 1;
                return Ok(self.wrap(id, data));
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .changed
                        .wait_until(&mut state, deadline)
                        .timed_out()
                        && state.free.is_empty()
                    {
                        return Err(MediaError::Timeout {
                            operation: format!("acquire from pool {}", self.shared.name),
                            duration: timeout.unwrap_or_default(),
                        });
                    }
                }
                None => self.shared.changed.wait(&mut state),
            }
        }
    }

    fn wrap(&self, id: BufferId, data: Vec<u8>) -> MutableBuffer {
        let length = data.len();
        MutableBuffer {
            core: BufferCore {
                storage: Storage::Pooled {
                    id,
                    data,
                    pool: Arc::downgrade(&self.shared),
                },
                meta: MetaData::new(),
                observer: Mutex::new(None),
            },
            offset: 0,
            length,
        }
    }

    /// Block until every buffer is back in the pool
    pub fn wait_until_idle(&self, timeout: Option<Duration>) -> MediaResult<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state.lock();
        while state.outstanding > 0 {
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .changed
                        .wait_until(&mut state, deadline)
                        .timed_out()
                        && state.outstanding > 0
                    {
                        return Err(MediaError::Timeout {
                            operation: format!(
                                "draining pool {} ({} outstanding)",
                                self.shared.name, state.outstanding
                            ),
                            duration: timeout.unwrap_or_default(),
                        });
                    }
                }
                None => self.shared.changed.wait(&mut state),
            }
        }
        Ok(())
    }

    /// Wake blocked acquirers; later acquires fail with [`MediaError::Stopped`]
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        self.shared.changed.notify_all();
    }

    /// Number of buffers currently on loan
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding
    }

    /// Number of buffers in the pool
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Size of every buffer in bytes
    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .field("buffer_size", &self.shared.buffer_size)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

enum Storage {
    Pooled {
        id: BufferId,
        data: Vec<u8>,
        pool: Weak<PoolShared>,
    },
    Owned(Vec<u8>),
    Shared(Bytes),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Pooled { data, .. } => data,
            Storage::Owned(data) => data,
            Storage::Shared(bytes) => bytes,
        }
    }
}

struct BufferCore {
    storage: Storage,
    meta: MetaData,
    observer: Mutex<Option<ReleaseObserver>>,
}

impl Drop for BufferCore {
    fn drop(&mut self) {
        if let Storage::Pooled { id, data, pool } = &mut self.storage {
            if let Some(pool) = pool.upgrade() {
                pool.give_back(*id, std::mem::take(data));
            }
        }
        if let Some(observer) = self.observer.get_mut().take() {
            observer();
        }
    }
}

/// Exclusively owned buffer being filled by a producer
pub struct MutableBuffer {
    core: BufferCore,
    offset: usize,
    length: usize,
}

impl MutableBuffer {
    /// Heap buffer outside any pool
    pub fn with_capacity(size: usize) -> Self {
        Self {
            core: BufferCore {
                storage: Storage::Owned(vec![0; size]),
                meta: MetaData::new(),
                observer: Mutex::new(None),
            },
            offset: 0,
            length: size,
        }
    }

    /// Full backing allocation
    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.core.storage {
            Storage::Pooled { data, .. } => data,
            Storage::Owned(data) => data,
            // never constructed for mutable buffers
            Storage::Shared(_) => &mut [],
        }
    }

    /// Full backing allocation, read-only
    pub fn data(&self) -> &[u8] {
        self.core.storage.as_slice()
    }

    /// Capacity of the backing allocation
    pub fn capacity(&self) -> usize {
        self.data().len()
    }

    /// Restrict the valid region to `[offset, offset + length)`
    pub fn set_range(&mut self, offset: usize, length: usize) -> MediaResult<()> {
        let capacity = self.capacity();
        if offset.checked_add(length).map_or(true, |end| end > capacity) {
            return Err(MediaError::BufferOverflow {
                size: offset.saturating_add(length),
                capacity,
            });
        }
        self.offset = offset;
        self.length = length;
        Ok(())
    }

    /// Copy `payload` to the start of the buffer and make it the valid region
    pub fn fill_from(&mut self, payload: &[u8]) -> MediaResult<()> {
        let capacity = self.capacity();
        if payload.len() > capacity {
            return Err(MediaError::BufferOverflow {
                size: payload.len(),
                capacity,
            });
        }
        self.data_mut()[..payload.len()].copy_from_slice(payload);
        self.set_range(0, payload.len())
    }

    /// Start of the valid region
    pub fn range_offset(&self) -> usize {
        self.offset
    }

    /// Length of the valid region
    pub fn range_length(&self) -> usize {
        self.length
    }

    /// Attached metadata
    pub fn meta(&self) -> &MetaData {
        &self.core.meta
    }

    /// Attached metadata, mutable while the buffer is still exclusive
    pub fn meta_mut(&mut self) -> &mut MetaData {
        &mut self.core.meta
    }

    /// Register the callback run once when the frozen buffer is fully released
    pub fn set_observer(&mut self, observer: ReleaseObserver) {
        *self.core.observer.get_mut() = Some(observer);
    }

    /// Identity within the owning pool, if pooled
    pub fn id(&self) -> Option<BufferId> {
        match &self.core.storage {
            Storage::Pooled { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Seal the buffer; its data region is immutable from here on
    pub fn freeze(self) -> MediaBuffer {
        MediaBuffer {
            core: Arc::new(self.core),
            offset: self.offset,
            length: self.length,
        }
    }
}

impl fmt::Debug for MutableBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableBuffer")
            .field("id", &self.id())
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Immutable, reference-counted media buffer
///
/// Cloning adds a reference. Dropping (or [`release`](MediaBuffer::release))
/// removes one; the allocation returns to its pool at zero.
#[derive(Clone)]
pub struct MediaBuffer {
    core: Arc<BufferCore>,
    offset: usize,
    length: usize,
}

impl MediaBuffer {
    /// Wrap memory owned elsewhere without copying
    pub fn from_bytes(bytes: Bytes, meta: MetaData) -> Self {
        let length = bytes.len();
        Self {
            core: Arc::new(BufferCore {
                storage: Storage::Shared(bytes),
                meta,
                observer: Mutex::new(None),
            }),
            offset: 0,
            length,
        }
    }

    /// Like [`from_bytes`](Self::from_bytes) with a release observer
    pub fn from_bytes_with_observer(
        bytes: Bytes,
        meta: MetaData,
        observer: ReleaseObserver,
    ) -> Self {
        let length = bytes.len();
        Self {
            core: Arc::new(BufferCore {
                storage: Storage::Shared(bytes),
                meta,
                observer: Mutex::new(Some(observer)),
            }),
            offset: 0,
            length,
        }
    }

    /// Valid region of the buffer
    pub fn data(&self) -> &[u8] {
        &self.core.storage.as_slice()[self.offset..self.offset + self.length]
    }

    /// Start of the valid region within the allocation
    pub fn range_offset(&self) -> usize {
        self.offset
    }

    /// Length of the valid region
    pub fn range_length(&self) -> usize {
        self.length
    }

    /// Size of the backing allocation
    pub fn capacity(&self) -> usize {
        self.core.storage.as_slice().len()
    }

    /// Attached metadata
    pub fn meta(&self) -> &MetaData {
        &self.core.meta
    }

    /// Presentation time in microseconds
    pub fn time_us(&self) -> Option<i64> {
        self.core.meta.time_us()
    }

    /// Identity within the owning pool, if pooled
    pub fn id(&self) -> Option<BufferId> {
        match &self.core.storage {
            Storage::Pooled { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Number of live references to the underlying allocation
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.core)
    }

    /// A new reference restricted to a sub-range of this one
    pub fn slice(&self, offset: usize, length: usize) -> MediaResult<MediaBuffer> {
        if offset.checked_add(length).map_or(true, |end| end > self.length) {
            return Err(MediaError::BufferOverflow {
                size: offset.saturating_add(length),
                capacity: self.length,
            });
        }
        Ok(MediaBuffer {
            core: Arc::clone(&self.core),
            offset: self.offset + offset,
            length,
        })
    }

    /// Drop this reference
    pub fn release(self) {}
}

impl fmt::Debug for MediaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaBuffer")
            .field("id", &self.id())
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("time_us", &self.time_us())
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::MetaKey;
    use rand::Rng;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_acquire_until_exhausted() {
        let pool = BufferPool::with_buffers(2, 64).unwrap();
        let a = pool.try_acquire().unwrap();
        let b = pool.try_acquire().unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.outstanding(), 2);

        match pool.try_acquire() {
            Err(MediaError::PoolExhausted {
                outstanding,
                capacity,
            }) => {
                assert_eq!(outstanding, 2);
                assert_eq!(capacity, 2);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }

        drop(a);
        assert_eq!(pool.outstanding(), 1);
        assert!(pool.try_acquire().is_ok());
    }

    #[test]
    fn test_random_sequences_never_double_issue() {
        let capacity = 4;
        let pool = BufferPool::with_buffers(capacity, 16).unwrap();
        let mut rng = rand::thread_rng();
        let mut held: Vec<MediaBuffer> = Vec::new();

        for _ in 0..2000 {
            if rng.gen_bool(0.55) {
                match pool.try_acquire() {
                    Ok(buffer) => held.push(buffer.freeze()),
                    Err(MediaError::PoolExhausted { .. }) => assert_eq!(held.len(), capacity),
                    Err(e) => panic!("unexpected error: {e}"),
                }
            } else if !held.is_empty() {
                let index = rng.gen_range(0..held.len());
                held.swap_remove(index).release();
            }

            assert!(held.len() <= capacity);
            assert_eq!(pool.outstanding(), held.len());
            let ids: HashSet<_> = held.iter().map(|b| b.id()).collect();
            assert_eq!(ids.len(), held.len());
        }
    }

    #[test]
    fn test_shared_reference_returns_at_zero() {
        let pool = BufferPool::with_buffers(1, 32).unwrap();
        let mut buffer = pool.acquire().unwrap();
        buffer.fill_from(b"hello").unwrap();
        buffer.meta_mut().set_i64(MetaKey::Time, 42);
        let frozen = buffer.freeze();
        let second = frozen.clone();
        assert_eq!(frozen.ref_count(), 2);

        drop(frozen);
        assert_eq!(pool.outstanding(), 1);
        assert_eq!(second.data(), b"hello");
        assert_eq!(second.time_us(), Some(42));

        second.release();
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_observer_runs_once_at_zero() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let buffer = MediaBuffer::from_bytes_with_observer(
            Bytes::from_static(b"frame"),
            MetaData::new(),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let view = buffer.slice(1, 3).unwrap();
        assert_eq!(view.data(), b"ram");

        drop(buffer);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(view);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_blocking_acquire_wakes_on_release() {
        let pool = Arc::new(BufferPool::with_buffers(1, 8).unwrap());
        let held = pool.acquire().unwrap().freeze();

        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.acquire().map(|b| b.id()))
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(held);

        let id = waiter.join().unwrap().unwrap();
        assert_eq!(id, Some(BufferId(0)));
    }

    #[test]
    fn test_acquire_timeout_and_close() {
        let pool = BufferPool::with_buffers(1, 8).unwrap();
        let _held = pool.acquire().unwrap();
        assert!(matches!(
            pool.acquire_timeout(Duration::from_millis(10)),
            Err(MediaError::Timeout { .. })
        ));

        pool.close();
        assert!(matches!(pool.acquire(), Err(MediaError::Stopped)));
    }

    #[test]
    fn test_fill_rejects_oversized_payload() {
        let pool = BufferPool::with_buffers(1, 4).unwrap();
        let mut buffer = pool.acquire().unwrap();
        assert!(matches!(
            buffer.fill_from(b"too long"),
            Err(MediaError::BufferOverflow { size: 8, capacity: 4 })
        ));
        assert!(buffer.set_range(2, 2).is_ok());
        assert!(buffer.set_range(3, 2).is_err());
    }

    #[test]
    fn test_wait_until_idle() {
        let pool = Arc::new(BufferPool::with_buffers(2, 8).unwrap());
        let held = pool.acquire().unwrap().freeze();
        assert!(pool
            .wait_until_idle(Some(Duration::from_millis(10)))
            .is_err());

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            drop(held);
        });
        pool.wait_until_idle(Some(Duration::from_secs(5))).unwrap();
        releaser.join().unwrap();
    }
}
