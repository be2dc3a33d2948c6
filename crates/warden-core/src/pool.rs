//! Recycling object pools.
//!
//! A [`Pool`] hands out [`Pooled`] guards. Dropping a guard resets the value
//! with [`Recycle::recycle`] and returns it to the free list, so release
//! happens exactly once on every exit path, unwinding included.
//!
//! The free list is bounded; when it is full, released values are dropped.
//! Acquiring never blocks: an empty free list means a fresh value.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Resets a value in place before it goes back to its pool.
pub trait Recycle {
    fn recycle(&mut self);
}

impl Recycle for Vec<u8> {
    fn recycle(&mut self) {
        self.clear();
    }
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

struct PoolInner<T> {
    free: Mutex<Vec<T>>,
    capacity: usize,
    factory: Factory<T>,
    outstanding: AtomicUsize,
    created: AtomicUsize,
}

impl<T: Recycle> PoolInner<T> {
    fn release(&self, mut value: T) {
        value.recycle();
        {
            let mut free = self.free.lock();
            if free.len() < self.capacity {
                free.push(value);
            }
        }
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A bounded recycling pool.
///
/// Cloning is cheap and yields a handle to the same pool.
pub struct Pool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Recycle> Pool<T> {
    /// Creates a pool retaining at most `capacity` idle values, building new
    /// ones with `factory`.
    pub fn new<F>(capacity: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(capacity)),
                capacity,
                factory: Box::new(factory),
                outstanding: AtomicUsize::new(0),
                created: AtomicUsize::new(0),
            }),
        }
    }

    /// Takes a value from the free list, or builds one.
    pub fn acquire(&self) -> Pooled<T> {
        let recycled = self.inner.free.lock().pop();
        let value = recycled.unwrap_or_else(|| {
            self.inner.created.fetch_add(1, Ordering::Relaxed);
            (self.inner.factory)()
        });
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);

        Pooled {
            value: Some(value),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Values currently checked out.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Values waiting on the free list.
    pub fn idle(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Values built by the factory since the pool was created.
    pub fn created(&self) -> usize {
        self.inner.created.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.inner.capacity)
            .field("outstanding", &self.inner.outstanding.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// A value checked out of a [`Pool`]; returned on drop.
pub struct Pooled<T: Recycle> {
    value: Option<T>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Recycle> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `Drop` takes the value out.
        self.value.as_ref().expect("pooled value present until drop")
    }
}

impl<T: Recycle> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("pooled value present until drop")
    }
}

impl<T: Recycle + AsRef<[u8]>> AsRef<[u8]> for Pooled<T> {
    fn as_ref(&self) -> &[u8] {
        (**self).as_ref()
    }
}

impl<T: Recycle> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(value);
        }
    }
}

impl<T: Recycle + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.value).finish()
    }
}

/// Pool of byte buffers for encoding outbound payloads.
pub type BufferPool = Pool<Vec<u8>>;

/// Creates a buffer pool whose fresh buffers start at `initial_size` bytes.
pub fn buffer_pool(capacity: usize, initial_size: usize) -> BufferPool {
    Pool::new(capacity, move || Vec::with_capacity(initial_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Slot {
        payload: Option<String>,
        resets: usize,
    }

    impl Recycle for Slot {
        fn recycle(&mut self) {
            self.payload = None;
            self.resets += 1;
        }
    }

    #[test]
    fn test_release_on_drop_recycles() {
        let pool = Pool::new(4, Slot::default);

        {
            let mut slot = pool.acquire();
            slot.payload = Some("hello".into());
            assert_eq!(pool.outstanding(), 1);
            assert_eq!(pool.idle(), 0);
        }

        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 1);

        let slot = pool.acquire();
        assert!(slot.payload.is_none());
        assert_eq!(slot.resets, 1);
        assert_eq!(pool.created(), 1);
    }

    #[test]
    fn test_free_list_is_bounded() {
        let pool = Pool::new(2, Slot::default);
        let held: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        assert_eq!(pool.outstanding(), 5);

        drop(held);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_release_during_unwind() {
        let pool = Pool::new(4, Slot::default);
        let cloned = pool.clone();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _slot = cloned.acquire();
            panic!("handler blew up");
        }));

        assert!(result.is_err());
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_buffer_keeps_allocation() {
        let pool = buffer_pool(1, 64);
        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(&[0u8; 512]);
        }

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 512);
    }
}
