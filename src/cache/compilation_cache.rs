use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::entry::{CacheEntry, EntryRef, Handle};
use super::eviction::{EvictionPolicy, LruEvictionPolicy};
use super::pending::PendingCompile;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::fingerprint::CacheKey;
use crate::metrics::{CacheMetrics, MetricsSnapshot};

/// Process-wide store of compiled executables keyed by program fingerprint.
///
/// The state lock is only held for bookkeeping. Backend compiles run outside
/// it, and callers racing on a key that is already compiling wait on that
/// key's [`PendingCompile`] slot, so unrelated keys never block each other.
pub struct CompilationCache<E> {
    config: CacheConfig,
    state: Mutex<CacheState<E>>,
    metrics: Arc<CacheMetrics>,
}

struct CacheState<E> {
    slots: HashMap<CacheKey, Slot<E>>,
    handles: HashMap<Handle, CacheKey>,
    eviction: Box<dyn EvictionPolicy<CacheKey>>,
    next_handle: i64,
}

enum Slot<E> {
    /// A compile is running. `waiters` counts callers that joined it; each of
    /// them receives a reference once it succeeds.
    Compiling {
        pending: Arc<PendingCompile>,
        waiters: usize,
    },
    Live {
        handle: Handle,
        refs: usize,
        entry: Arc<CacheEntry<E>>,
    },
    /// Every reference was released. No handle resolves here any more.
    Reclaimable { entry: Arc<CacheEntry<E>> },
}

enum Claim {
    Ready(Handle),
    Wait(Arc<PendingCompile>),
    Compile(Arc<PendingCompile>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub live_entries: usize,
    pub reclaimable_entries: usize,
    pub pending_compiles: usize,
    pub live_references: usize,
    pub max_entries: usize,
    pub metrics: MetricsSnapshot,
}

impl<E> CompilationCache<E> {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_eviction_policy(config, Box::new(LruEvictionPolicy::new()))
    }

    pub fn with_eviction_policy(
        config: CacheConfig,
        eviction: Box<dyn EvictionPolicy<CacheKey>>,
    ) -> Self {
        debug!(
            max_entries = config.max_entries,
            retain_released = config.retain_released,
            "compilation cache initialised"
        );
        Self {
            config,
            state: Mutex::new(CacheState {
                slots: HashMap::new(),
                handles: HashMap::new(),
                eviction,
                next_handle: 1,
            }),
            metrics: CacheMetrics::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<CacheMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Returns a handle for `key`, running `compile_fn` only if no entry
    /// exists and no compile for it is already in flight.
    ///
    /// Every successful call takes one reference that must be given back with
    /// [`release`](Self::release). Callers that join an in-flight compile get
    /// the same handle, or the same error if it fails; a failed key is left
    /// absent so a later call compiles again.
    pub fn compile_if_absent<F>(&self, key: CacheKey, compile_fn: F) -> CacheResult<Handle>
    where
        F: FnOnce() -> CacheResult<E>,
    {
        let (claim, evicted) = self.claim(key)?;
        drop(evicted);

        match claim {
            Claim::Ready(handle) => Ok(handle),
            Claim::Wait(pending) => {
                debug!(%key, "waiting on in-flight compilation");
                pending.wait()
            }
            Claim::Compile(pending) => self.run_compile(key, pending, compile_fn),
        }
    }

    fn claim(&self, key: CacheKey) -> CacheResult<(Claim, Vec<Arc<CacheEntry<E>>>)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(slot) = state.slots.get_mut(&key) {
            match slot {
                Slot::Live { handle, refs, .. } => {
                    *refs += 1;
                    self.metrics.record_hit();
                    debug!(%key, %handle, refs = *refs, "compilation cache hit");
                    return Ok((Claim::Ready(*handle), Vec::new()));
                }
                Slot::Compiling { pending, waiters } => {
                    *waiters += 1;
                    self.metrics.record_hit();
                    return Ok((Claim::Wait(Arc::clone(pending)), Vec::new()));
                }
                Slot::Reclaimable { entry } => {
                    let entry = Arc::clone(entry);
                    let handle = allocate_handle(&mut state.next_handle);
                    *slot = Slot::Live {
                        handle,
                        refs: 1,
                        entry,
                    };
                    state.handles.insert(handle, key);
                    state.eviction.on_remove(&key);
                    self.metrics.record_hit();
                    debug!(%key, %handle, "revived released executable");
                    return Ok((Claim::Ready(handle), Vec::new()));
                }
            }
        }

        let mut evicted = Vec::new();
        if self.config.is_bounded() {
            while state.slots.len() >= self.config.max_entries {
                let slots = &state.slots;
                let victim = state
                    .eviction
                    .evict(&|candidate| matches!(slots.get(candidate), Some(Slot::Reclaimable { .. })));
                let Some(Slot::Reclaimable { entry }) = victim.and_then(|k| state.slots.remove(&k))
                else {
                    warn!(
                        %key,
                        max_entries = self.config.max_entries,
                        "compilation cache full, nothing evictable"
                    );
                    return Err(CacheError::CacheFull {
                        max_entries: self.config.max_entries,
                    });
                };
                self.metrics.record_eviction();
                debug!(evicted = %entry.key(), "evicted released executable");
                evicted.push(entry);
            }
        }

        let pending = PendingCompile::new();
        state.slots.insert(
            key,
            Slot::Compiling {
                pending: Arc::clone(&pending),
                waiters: 0,
            },
        );
        self.metrics.record_miss();
        Ok((Claim::Compile(pending), evicted))
    }

    fn run_compile<F>(
        &self,
        key: CacheKey,
        pending: Arc<PendingCompile>,
        compile_fn: F,
    ) -> CacheResult<Handle>
    where
        F: FnOnce() -> CacheResult<E>,
    {
        let mut guard = CompileGuard {
            cache: self,
            key,
            pending: Arc::clone(&pending),
            armed: true,
        };

        debug!(%key, "compiling executable");
        let started = Instant::now();
        let outcome = compile_fn();
        guard.armed = false;

        let entry = outcome.map(|executable| CacheEntry::new(key, executable, started.elapsed()));
        let result = self.finish_compile(key, entry);
        pending.complete(result.clone());
        result
    }

    fn finish_compile(&self, key: CacheKey, outcome: CacheResult<CacheEntry<E>>) -> CacheResult<Handle> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        // Only the compiling caller removes a Compiling slot.
        let waiters = match state.slots.remove(&key) {
            Some(Slot::Compiling { waiters, .. }) => waiters,
            _ => 0,
        };

        match outcome {
            Ok(entry) => {
                let handle = allocate_handle(&mut state.next_handle);
                let refs = waiters + 1;
                state.slots.insert(
                    key,
                    Slot::Live {
                        handle,
                        refs,
                        entry: Arc::new(entry),
                    },
                );
                state.handles.insert(handle, key);
                self.metrics.record_compiled();
                debug!(%key, %handle, refs, "compiled executable cached");
                Ok(handle)
            }
            Err(err) => {
                self.metrics.record_compile_failure();
                warn!(%key, waiters, error = %err, "compilation failed");
                Err(err)
            }
        }
    }

    fn abandon(&self, key: CacheKey, pending: &PendingCompile) {
        {
            let mut state = self.state.lock();
            if matches!(state.slots.get(&key), Some(Slot::Compiling { .. })) {
                state.slots.remove(&key);
            }
        }
        self.metrics.record_compile_failure();
        warn!(%key, "compilation panicked");
        pending.complete(Err(CacheError::BackendCompileFailure(format!(
            "compilation for key {key} panicked"
        ))));
    }

    /// Resolves a live handle.
    pub fn lookup(&self, handle: Handle) -> CacheResult<EntryRef<E>> {
        let state = self.state.lock();
        let key = state
            .handles
            .get(&handle)
            .ok_or(CacheError::NotFound(handle))?;
        match state.slots.get(key) {
            Some(Slot::Live {
                handle: live, entry, ..
            }) if *live == handle => Ok(EntryRef::new(handle, Arc::clone(entry))),
            _ => Err(CacheError::NotFound(handle)),
        }
    }

    /// Drops one reference. The last release retires the handle.
    pub fn release(&self, handle: Handle) -> CacheResult<()> {
        let dropped = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let key = *state
                .handles
                .get(&handle)
                .ok_or(CacheError::NotFound(handle))?;

            let Some(Slot::Live {
                handle: live, refs, ..
            }) = state.slots.get_mut(&key)
            else {
                return Err(CacheError::NotFound(handle));
            };
            if *live != handle {
                return Err(CacheError::NotFound(handle));
            }

            *refs -= 1;
            if *refs > 0 {
                debug!(%key, %handle, refs = *refs, "released compilation reference");
                return Ok(());
            }

            state.handles.remove(&handle);
            let Some(Slot::Live { entry, .. }) = state.slots.remove(&key) else {
                return Ok(());
            };
            debug!(%key, %handle, "last reference released");
            if self.config.retain_released {
                state.slots.insert(key, Slot::Reclaimable { entry });
                state.eviction.on_add(&key);
                None
            } else {
                Some(entry)
            }
        };
        drop(dropped);
        Ok(())
    }

    /// Current reference count of a live handle.
    pub fn ref_count(&self, handle: Handle) -> CacheResult<usize> {
        let state = self.state.lock();
        let key = state
            .handles
            .get(&handle)
            .ok_or(CacheError::NotFound(handle))?;
        match state.slots.get(key) {
            Some(Slot::Live { refs, .. }) => Ok(*refs),
            _ => Err(CacheError::NotFound(handle)),
        }
    }

    /// Whether an entry (live or reclaimable) exists for `key`.
    pub fn contains(&self, key: CacheKey) -> bool {
        matches!(
            self.state.lock().slots.get(&key),
            Some(Slot::Live { .. } | Slot::Reclaimable { .. })
        )
    }

    /// Drops every released entry now instead of waiting for capacity
    /// pressure. Returns how many were dropped.
    pub fn purge_reclaimable(&self) -> usize {
        let purged: Vec<Arc<CacheEntry<E>>> = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let keys: Vec<CacheKey> = state
                .slots
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Reclaimable { .. }))
                .map(|(key, _)| *key)
                .collect();
            keys.into_iter()
                .filter_map(|key| {
                    state.eviction.on_remove(&key);
                    match state.slots.remove(&key) {
                        Some(Slot::Reclaimable { entry }) => Some(entry),
                        _ => None,
                    }
                })
                .collect()
        };
        debug!(purged = purged.len(), "purged released executables");
        purged.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let mut stats = CacheStats {
            live_entries: 0,
            reclaimable_entries: 0,
            pending_compiles: 0,
            live_references: 0,
            max_entries: self.config.max_entries,
            metrics: self.metrics.snapshot(),
        };
        for slot in state.slots.values() {
            match slot {
                Slot::Compiling { .. } => stats.pending_compiles += 1,
                Slot::Live { refs, .. } => {
                    stats.live_entries += 1;
                    stats.live_references += refs;
                }
                Slot::Reclaimable { .. } => stats.reclaimable_entries += 1,
            }
        }
        stats
    }
}

fn allocate_handle(next: &mut i64) -> Handle {
    let handle = Handle::from_raw(*next);
    *next += 1;
    handle
}

/// Fails the in-flight slot if the compile closure unwinds, so waiters are
/// woken and the key can be compiled again.
struct CompileGuard<'a, E> {
    cache: &'a CompilationCache<E>,
    key: CacheKey,
    pending: Arc<PendingCompile>,
    armed: bool,
}

impl<E> Drop for CompileGuard<'_, E> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.abandon(self.key, &self.pending);
        }
    }
}
