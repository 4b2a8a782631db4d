use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::Handle;
use crate::error::CacheResult;

/// Result slot for one in-flight compile. Callers that find the key already
/// compiling block here instead of on the cache lock.
#[derive(Debug)]
pub(crate) struct PendingCompile {
    outcome: Mutex<Option<CacheResult<Handle>>>,
    condvar: Condvar,
}

impl PendingCompile {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(None),
            condvar: Condvar::new(),
        })
    }

    /// Publishes the outcome. Only the first call has any effect.
    pub(crate) fn complete(&self, outcome: CacheResult<Handle>) {
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            return;
        }
        *slot = Some(outcome);
        self.condvar.notify_all();
    }

    pub(crate) fn wait(&self) -> CacheResult<Handle> {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.condvar.wait(&mut slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::error::CacheError;

    #[test]
    fn waiters_see_the_first_outcome() {
        let pending = PendingCompile::new();
        let waiter = {
            let pending = Arc::clone(&pending);
            thread::spawn(move || pending.wait())
        };

        pending.complete(Ok(Handle::from_raw(9)));
        pending.complete(Err(CacheError::backend("ignored")));

        assert_eq!(waiter.join().unwrap(), Ok(Handle::from_raw(9)));
        assert_eq!(pending.wait(), Ok(Handle::from_raw(9)));
    }
}
