use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::fingerprint::CacheKey;

/// Caller-visible identifier of a referenced cache entry.
///
/// Handles are never reused: once the last reference is released, the
/// handle stays dead even if the same program is compiled again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(i64);

impl Handle {
    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A compiled executable and the key it was built for.
#[derive(Debug)]
pub struct CacheEntry<E> {
    key: CacheKey,
    executable: E,
    compiled_at: Instant,
    compile_time: Duration,
}

impl<E> CacheEntry<E> {
    pub(crate) fn new(key: CacheKey, executable: E, compile_time: Duration) -> Self {
        Self {
            key,
            executable,
            compiled_at: Instant::now(),
            compile_time,
        }
    }

    pub fn key(&self) -> CacheKey {
        self.key
    }

    pub fn executable(&self) -> &E {
        &self.executable
    }

    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }

    pub fn compile_time(&self) -> Duration {
        self.compile_time
    }
}

/// Result of a successful lookup. Keeps the executable alive for as long as
/// it is held, independent of the handle's reference count.
#[derive(Debug)]
pub struct EntryRef<E> {
    handle: Handle,
    entry: Arc<CacheEntry<E>>,
}

impl<E> EntryRef<E> {
    pub(crate) fn new(handle: Handle, entry: Arc<CacheEntry<E>>) -> Self {
        Self { handle, entry }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl<E> Clone for EntryRef<E> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle,
            entry: Arc::clone(&self.entry),
        }
    }
}

impl<E> Deref for EntryRef<E> {
    type Target = CacheEntry<E>;

    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}
