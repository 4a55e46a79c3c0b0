// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Locking strategies for serializing pool operations.
//!
//! Every pool operation runs while holding the strategy lock for the address it
//! works on. [PoolLock] maps every address onto one lock, so all operations on
//! the pool serialize. [KeyedLocker] hands out one lock per address, so
//! operations on different addresses never wait for each other.
//!
//! The pool's used and free sets are additionally guarded by a reader/writer
//! lock. That lock is only held for the in-memory set update itself.

use std::{
    collections::HashSet,
    fmt::Debug,
    net::Ipv4Addr,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

/// A lock keyed by address.
///
/// Every [AddressLock::acquire] must be paired with an [AddressLock::release]
/// of the same key, on error paths too. Use [AddressLockGuard] to get that
/// pairing for free.
pub trait AddressLock: Send + Sync + Debug {
    /// Blocks until the lock for `key` is held by the caller.
    fn acquire(&self, key: Ipv4Addr);

    /// Releases the lock for `key`.
    fn release(&self, key: Ipv4Addr);
}

/// Holds the lock of a key until dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct AddressLockGuard<'a> {
    lock: &'a dyn AddressLock,
    key: Ipv4Addr,
}

impl<'a> AddressLockGuard<'a> {
    /// Acquires the lock for `key` and returns a guard that releases it.
    pub fn new(lock: &'a dyn AddressLock, key: Ipv4Addr) -> Self {
        lock.acquire(key);
        Self { lock, key }
    }
}

impl Drop for AddressLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(self.key);
    }
}

/// Registry of per-address locks.
///
/// Locks are created lazily on first acquisition and dropped again on release.
/// The registry itself is guarded by a mutex that is only held while looking up
/// a key, never while waiting for one.
#[derive(Debug, Default)]
pub struct KeyedLocker {
    held: Mutex<HashSet<Ipv4Addr>>,
    released: Condvar,
}

impl KeyedLocker {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if some caller currently holds the lock for `key`.
    pub fn is_locked(&self, key: Ipv4Addr) -> bool {
        self.registry().contains(&key)
    }

    /// Number of keys currently held.
    pub fn held_count(&self) -> usize {
        self.registry().len()
    }

    fn registry(&self) -> MutexGuard<'_, HashSet<Ipv4Addr>> {
        // The registry is a plain set, a panicking holder cannot corrupt it.
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AddressLock for KeyedLocker {
    fn acquire(&self, key: Ipv4Addr) {
        let mut held = self.registry();
        while held.contains(&key) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(key);
    }

    fn release(&self, key: Ipv4Addr) {
        let removed = self.registry().remove(&key);
        if !removed {
            tracing::warn!(%key, "Released an address lock that was not held");
            return;
        }
        // Waiters of all keys share the condvar.
        self.released.notify_all();
    }
}

/// A single lock for the whole pool.
#[derive(Debug, Default)]
pub struct PoolLock {
    inner: KeyedLocker,
}

impl PoolLock {
    /// All keys map onto this one.
    const KEY: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

    /// Creates an unlocked pool lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if some caller currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked(Self::KEY)
    }
}

impl AddressLock for PoolLock {
    fn acquire(&self, _key: Ipv4Addr) {
        self.inner.acquire(Self::KEY);
    }

    fn release(&self, _key: Ipv4Addr) {
        self.inner.release(Self::KEY);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
        time::Duration,
    };

    use test_log::test;

    use super::*;

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let locker = KeyedLocker::new();
        {
            let _guard = AddressLockGuard::new(&locker, ip(1));
            assert!(locker.is_locked(ip(1)));
            assert!(!locker.is_locked(ip(2)));
        }
        assert!(!locker.is_locked(ip(1)));
        assert_eq!(locker.held_count(), 0, "registry entries must not leak");
    }

    #[test]
    fn test_different_keys_do_not_contend() {
        let locker = KeyedLocker::new();
        let _a = AddressLockGuard::new(&locker, ip(1));
        // Would deadlock if keys shared a lock.
        let _b = AddressLockGuard::new(&locker, ip(2));
        assert_eq!(locker.held_count(), 2);
    }

    #[test]
    fn test_release_of_unheld_key_is_ignored() {
        let locker = KeyedLocker::new();
        locker.release(ip(1));
        assert_eq!(locker.held_count(), 0);

        let pool_lock = PoolLock::new();
        pool_lock.release(ip(1));
        assert!(!pool_lock.is_locked());
    }

    #[test]
    fn test_pool_lock_maps_all_keys_onto_one() {
        let lock = PoolLock::new();
        let guard = AddressLockGuard::new(&lock, ip(1));
        assert!(lock.is_locked());
        drop(guard);
        assert!(!lock.is_locked());
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn test_same_key_is_mutually_exclusive() {
        let locker = Arc::new(KeyedLocker::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locker = locker.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let _guard = AddressLockGuard::new(locker.as_ref(), ip(7));
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locker.held_count(), 0);
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn test_pool_lock_blocks_other_keys() {
        let lock = Arc::new(PoolLock::new());
        let guard = AddressLockGuard::new(lock.as_ref(), ip(1));

        let acquired = Arc::new(AtomicUsize::new(0));
        let handle = {
            let lock = lock.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                let _guard = AddressLockGuard::new(lock.as_ref(), ip(2));
                acquired.store(1, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(
            acquired.load(Ordering::SeqCst),
            0,
            "other key acquired while the pool lock was held"
        );
        drop(guard);
        handle.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
    }
}
