// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Named cooperative locks keyed by `(namespace, key)`.
//!
//! Two namespaces matter in the core: `thread` (key = thread id), held
//! around a turn's message appends and thread metadata patches, and
//! `user_context` (key = user id), held around deep-merge updates.  Locks
//! are tokio mutexes — cooperative, not OS-level — and a guard releases on
//! every exit path, including panics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

pub const NS_THREAD: &str = "thread";
pub const NS_USER_CONTEXT: &str = "user_context";

/// Entries untouched for this long are eligible for cleanup.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Error)]
pub enum LockError {
    #[error("timed out acquiring lock {namespace}:{key}")]
    Timeout { namespace: String, key: String },
}

/// Per-key statistics.
#[derive(Debug, Clone, Default)]
pub struct LockStats {
    pub acquisitions: u64,
    /// Times an acquirer had to wait for another holder.
    pub contentions: u64,
    pub total_wait: Duration,
    pub total_held: Duration,
}

struct LockEntry {
    lock: Arc<Mutex<()>>,
    stats: Arc<StdMutex<LockStats>>,
    last_access: Instant,
}

/// Scoped lock hold.  Dropping releases the lock and records hold time.
pub struct LockGuard {
    _inner: OwnedMutexGuard<()>,
    stats: Arc<StdMutex<LockStats>>,
    acquired_at: Instant,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.total_held += self.acquired_at.elapsed();
        }
    }
}

#[derive(Default)]
pub struct LockManager {
    entries: StdMutex<HashMap<(String, String), LockEntry>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, namespace: &str, key: &str) -> (Arc<Mutex<()>>, Arc<StdMutex<LockStats>>) {
        let mut map = self.entries.lock().expect("lock map poisoned");
        let entry = map
            .entry((namespace.to_string(), key.to_string()))
            .or_insert_with(|| LockEntry {
                lock: Arc::new(Mutex::new(())),
                stats: Arc::new(StdMutex::new(LockStats::default())),
                last_access: Instant::now(),
            });
        entry.last_access = Instant::now();
        (Arc::clone(&entry.lock), Arc::clone(&entry.stats))
    }

    /// Acquire with an optional timeout.  The returned guard releases on
    /// drop — there is no separate release call to forget.
    pub async fn acquire(
        &self,
        namespace: &str,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<LockGuard, LockError> {
        let (lock, stats) = self.entry(namespace, key);

        // Fast path: uncontended.
        if let Ok(guard) = Arc::clone(&lock).try_lock_owned() {
            let mut s = stats.lock().expect("stats poisoned");
            s.acquisitions += 1;
            drop(s);
            return Ok(LockGuard { _inner: guard, stats, acquired_at: Instant::now() });
        }

        // Contended: wait, bounded by the timeout.
        {
            let mut s = stats.lock().expect("stats poisoned");
            s.contentions += 1;
        }
        let started = Instant::now();
        let guard = match timeout {
            Some(limit) => tokio::time::timeout(limit, lock.lock_owned()).await.map_err(|_| {
                LockError::Timeout { namespace: namespace.to_string(), key: key.to_string() }
            })?,
            None => lock.lock_owned().await,
        };
        let mut s = stats.lock().expect("stats poisoned");
        s.acquisitions += 1;
        s.total_wait += started.elapsed();
        drop(s);
        Ok(LockGuard { _inner: guard, stats, acquired_at: Instant::now() })
    }

    pub fn stats(&self, namespace: &str, key: &str) -> Option<LockStats> {
        let map = self.entries.lock().expect("lock map poisoned");
        map.get(&(namespace.to_string(), key.to_string()))
            .map(|e| e.stats.lock().expect("stats poisoned").clone())
    }

    /// Drop entries untouched for `ttl` that nobody currently holds.
    /// Called periodically from a background task in the bootstrap.
    pub fn cleanup(&self, ttl: Duration) -> usize {
        let mut map = self.entries.lock().expect("lock map poisoned");
        let before = map.len();
        map.retain(|_, entry| {
            entry.last_access.elapsed() < ttl || entry.lock.try_lock().is_err()
        });
        let removed = before - map.len();
        if removed > 0 {
            debug!(removed, "cleaned up idle locks");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("lock map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
