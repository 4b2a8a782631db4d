use std::time::Instant;

use tracing::{debug, warn};

use super::CompilationService;
use crate::backend::Backend;
use crate::cache::{CompilationCache, Handle};
use crate::error::BatchReleaseError;

/// Releases every handle in order. A failing handle does not stop the rest
/// of the batch; all failures are returned together.
pub fn release_batch<E>(
    cache: &CompilationCache<E>,
    handles: &[Handle],
) -> Result<(), BatchReleaseError> {
    let failures: Vec<_> = handles
        .iter()
        .filter_map(|&handle| match cache.release(handle) {
            Ok(()) => {
                debug!(%handle, "released compilation handle");
                None
            }
            Err(err) => {
                warn!(%handle, error = %err, "failed to release compilation handle");
                Some((handle, err))
            }
        })
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(BatchReleaseError {
            attempted: handles.len(),
            failures,
        })
    }
}

impl<B: Backend> CompilationService<B> {
    pub fn release_handles(&self, handles: &[Handle]) -> Result<(), BatchReleaseError> {
        let started = Instant::now();
        let result = release_batch(&self.cache, handles);
        let failed = result.as_ref().err().map_or(0, |err| err.failures.len());
        self.sink
            .record_release(started.elapsed(), handles.len() - failed, failed);
        result
    }

    /// Same as [`release_handles`](Self::release_handles) for raw wire values.
    pub fn release_raw(&self, handles: &[i64]) -> Result<(), BatchReleaseError> {
        let handles: Vec<Handle> = handles.iter().copied().map(Handle::from_raw).collect();
        self.release_handles(&handles)
    }
}
