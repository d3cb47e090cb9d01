use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::{
    error::{ErrorKind, Result},
    stream::{BinaryStream, TextEncoding},
};

/// Objects that can be returned to a pool and handed out again.
pub trait Recycle {
    /// Restores the object to a state fit for the next user.
    fn recycle(&mut self);
}

impl Recycle for BinaryStream {
    fn recycle(&mut self) {
        self.clear();
    }
}

impl Recycle for Vec<u8> {
    fn recycle(&mut self) {
        self.clear();
    }
}

/// A bounded pool of reusable objects.
///
/// Idle objects sit in a bounded channel so any thread can acquire or release without
/// taking a lock. When the pool is empty a fresh object is built; when it is full a released
/// object is dropped.
pub struct ObjectPool<T> {
    idle_tx: Sender<T>,
    idle_rx: Receiver<T>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    closed: AtomicBool,
}

impl<T: Recycle> ObjectPool<T> {
    /// Creates a pool that keeps at most `max_idle` objects around.
    pub fn new<F>(max_idle: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let (idle_tx, idle_rx) = bounded(max_idle);
        Self { idle_tx, idle_rx, factory: Box::new(factory), closed: AtomicBool::new(false) }
    }

    /// Takes an idle object or builds a new one. The guard returns it on drop.
    pub fn acquire(&self) -> Result<Pooled<'_, T>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ErrorKind::AlreadyDisposed);
        }
        let item = self.idle_rx.try_recv().unwrap_or_else(|_| (self.factory)());
        Ok(Pooled { pool: self, item: Some(item) })
    }

    /// Hands a detached object back to the pool.
    pub fn release(&self, mut item: T) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        item.recycle();
        // A full free list means the pool is at its idle bound; the object is dropped.
        let _ = self.idle_tx.try_send(item);
    }

    /// Number of idle objects currently held.
    pub fn available(&self) -> usize {
        self.idle_rx.len()
    }

    /// Drops every idle object and refuses further acquisitions.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        while self.idle_rx.try_recv().is_ok() {}
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("available", &self.idle_rx.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Scoped handle to a pooled object.
pub struct Pooled<'a, T: Recycle> {
    pool: &'a ObjectPool<T>,
    item: Option<T>,
}

impl<T: Recycle> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled item is only taken on drop"),
        }
    }
}

impl<T: Recycle> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled item is only taken on drop"),
        }
    }
}

impl<T: Recycle> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

/// Pool of `BinaryStream`s sized for one datagram each.
pub type StreamPool = ObjectPool<BinaryStream>;

impl StreamPool {
    /// Creates a stream pool whose streams hold `stream_capacity` bytes.
    pub fn for_streams(max_idle: usize, stream_capacity: usize, encoding: TextEncoding) -> Self {
        ObjectPool::new(max_idle, move || BinaryStream::with_encoding(stream_capacity, encoding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_builds_when_empty() {
        let pool = StreamPool::for_streams(4, 32, TextEncoding::Utf8);
        assert_eq!(pool.available(), 0);

        let stream = pool.acquire().unwrap();
        assert_eq!(stream.capacity(), 32);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_guard_returns_on_drop() {
        let pool = StreamPool::for_streams(4, 32, TextEncoding::Utf8);
        {
            let mut stream = pool.acquire().unwrap();
            stream.write_u32(42).unwrap();
        }
        assert_eq!(pool.available(), 1);

        // The recycled stream comes back empty.
        let stream = pool.acquire().unwrap();
        assert!(stream.is_empty());
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn test_release_beyond_capacity_is_dropped() {
        let pool: ObjectPool<Vec<u8>> = ObjectPool::new(2, Vec::new);
        for _ in 0..5 {
            pool.release(vec![1, 2, 3]);
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_closed_pool_refuses() {
        let pool: ObjectPool<Vec<u8>> = ObjectPool::new(2, Vec::new);
        pool.release(Vec::new());
        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.available(), 0);
        assert!(matches!(pool.acquire(), Err(ErrorKind::AlreadyDisposed)));

        pool.release(Vec::new());
        assert_eq!(pool.available(), 0);
    }
}
