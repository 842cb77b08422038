//! The two lock domains of the driver core.
//!
//! | Lock | Domain | Acquisition |
//! |------|--------|-------------|
//! | [`FastLock`] | register file, FIFO staging copy, notification latch, per-session pending records | spin, usable from interrupt-capture context |
//! | [`BlockingLock`] | session set, arbitration, lifecycle state, registry | may sleep; cancellable via [`CancelToken`] |
//!
//! Lock ordering: a [`BlockingLock`] is never acquired while a
//! [`FastLock`] is held. Holders of a [`FastLock`] must not block or
//! allocate.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{Ct2Error, Result};

/// Spinlock guarding state touched from interrupt-capture context.
///
/// Critical sections must be short, must not block, and must not
/// allocate.
#[derive(Debug, Default)]
pub struct FastLock<T>(spin::Mutex<T>);

impl<T> FastLock<T> {
    /// Create a new fast lock around `value`.
    pub const fn new(value: T) -> Self {
        Self(spin::Mutex::new(value))
    }

    /// Acquire the lock, spinning until it is free.
    pub fn lock(&self) -> spin::MutexGuard<'_, T> {
        self.0.lock()
    }
}

/// Cancellation handle for blocking acquisitions.
///
/// Cloning yields a handle to the same token. A cancelled token makes
/// every in-flight and future [`BlockingLock::lock`] through it return
/// [`Ct2Error::Interrupted`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Mutex with cancellable acquisition.
///
/// Waiters poll the cancel token while parked, so a cancel lands within
/// one wakeup interval even if the holder never releases.
#[derive(Debug, Default)]
pub struct BlockingLock<T> {
    data: Mutex<T>,
    waiters: Mutex<()>,
    released: Condvar,
}

/// Guard for a [`BlockingLock`]; releasing it wakes parked waiters.
pub struct BlockingGuard<'a, T> {
    inner: Option<MutexGuard<'a, T>>,
    lock: &'a BlockingLock<T>,
}

const WAIT_SLICE: Duration = Duration::from_millis(10);

impl<T> BlockingLock<T> {
    /// Create a new blocking lock around `value`.
    pub fn new(value: T) -> Self {
        Self {
            data: Mutex::new(value),
            waiters: Mutex::new(()),
            released: Condvar::new(),
        }
    }

    /// Acquire the lock, failing with [`Ct2Error::Interrupted`] if
    /// `cancel` fires while waiting.
    pub fn lock(&self, cancel: &CancelToken) -> Result<BlockingGuard<'_, T>> {
        loop {
            if let Some(guard) = self.try_lock() {
                return Ok(guard);
            }
            if cancel.is_cancelled() {
                return Err(Ct2Error::Interrupted);
            }
            let parked = self
                .waiters
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // Re-check with the waiter lock held so a release between the
            // failed try_lock and the wait cannot be missed.
            if let Some(guard) = self.try_lock() {
                return Ok(guard);
            }
            let (parked, _) = self
                .released
                .wait_timeout(parked, WAIT_SLICE)
                .unwrap_or_else(PoisonError::into_inner);
            drop(parked);
        }
    }

    /// Acquire the lock without a cancellation point.
    ///
    /// For paths that must make progress regardless of caller state:
    /// distribution, teardown, `Drop`.
    pub fn lock_uncancellable(&self) -> BlockingGuard<'_, T> {
        let inner = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        BlockingGuard {
            inner: Some(inner),
            lock: self,
        }
    }

    /// Acquire the lock only if it is immediately free.
    pub fn try_lock(&self) -> Option<BlockingGuard<'_, T>> {
        match self.data.try_lock() {
            Ok(inner) => Some(BlockingGuard {
                inner: Some(inner),
                lock: self,
            }),
            Err(std::sync::TryLockError::Poisoned(poisoned)) => Some(BlockingGuard {
                inner: Some(poisoned.into_inner()),
                lock: self,
            }),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }
}

impl<T> Deref for BlockingGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.inner {
            Some(guard) => guard,
            // Only ever None mid-drop, where no deref can occur.
            None => unreachable!(),
        }
    }
}

impl<T> DerefMut for BlockingGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.inner {
            Some(guard) => guard,
            None => unreachable!(),
        }
    }
}

impl<T> Drop for BlockingGuard<'_, T> {
    fn drop(&mut self) {
        self.inner.take();
        let _parked = self.lock.waiters.lock();
        self.lock.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn blocking_lock_is_exclusive() {
        let lock = Arc::new(BlockingLock::new(0u32));
        let token = CancelToken::new();
        let mut guard = lock.lock(&token).unwrap();
        *guard = 7;
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert_eq!(*lock.try_lock().unwrap(), 7);
    }

    #[test]
    fn cancelled_waiter_returns_interrupted() {
        let lock = Arc::new(BlockingLock::new(()));
        let token = CancelToken::new();
        let held = lock.lock_uncancellable();

        let waiter = {
            let lock = Arc::clone(&lock);
            let token = token.clone();
            thread::spawn(move || lock.lock(&token).map(|_| ()))
        };
        thread::sleep(Duration::from_millis(30));
        token.cancel();
        let outcome = waiter.join().unwrap();
        assert!(matches!(outcome, Err(Ct2Error::Interrupted)));
        drop(held);
    }

    #[test]
    fn released_lock_wakes_waiter() {
        let lock = Arc::new(BlockingLock::new(1u32));
        let token = CancelToken::new();
        let held = lock.lock_uncancellable();
        let waiter = {
            let lock = Arc::clone(&lock);
            let token = token.clone();
            thread::spawn(move || *lock.lock(&token).unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);
        assert_eq!(waiter.join().unwrap(), 1);
    }

    #[test]
    fn fast_lock_serializes_increments() {
        let lock = Arc::new(FastLock::new(0u64));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }
}
