//! Request handlers in front of the compilation cache.
//!
//! [`CompilationService`] is constructed once by the host and shared by
//! every request thread; it owns no global state of its own.

mod compile;
mod release;

use std::sync::Arc;

use crate::backend::Backend;
use crate::build_options::DeviceContext;
use crate::cache::CompilationCache;
use crate::config::ServiceConfig;
use crate::fingerprint::Fingerprinter;
use crate::metrics::MetricsSink;

pub use compile::CompileOutput;
pub use release::release_batch;

pub struct CompilationService<B: Backend> {
    backend: Arc<B>,
    cache: Arc<CompilationCache<B::Executable>>,
    device: DeviceContext,
    fingerprinter: Fingerprinter,
    sink: Arc<dyn MetricsSink>,
}

impl<B: Backend> CompilationService<B> {
    pub fn new(backend: B, device: DeviceContext, config: &ServiceConfig) -> Self {
        let cache = Arc::new(CompilationCache::new(config.cache));
        Self::from_parts(
            Arc::new(backend),
            cache,
            device,
            Fingerprinter::new(config.max_descriptor_bytes),
        )
    }

    /// Builds a service around an existing cache, e.g. one shared with other
    /// services for the same device.
    pub fn from_parts(
        backend: Arc<B>,
        cache: Arc<CompilationCache<B::Executable>>,
        device: DeviceContext,
        fingerprinter: Fingerprinter,
    ) -> Self {
        let sink: Arc<dyn MetricsSink> = cache.metrics();
        Self {
            backend,
            cache,
            device,
            fingerprinter,
            sink,
        }
    }

    /// Replaces the timing sink, which defaults to the cache's own counters.
    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn cache(&self) -> &Arc<CompilationCache<B::Executable>> {
        &self.cache
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn device(&self) -> DeviceContext {
        self.device
    }

    pub fn fingerprinter(&self) -> &Fingerprinter {
        &self.fingerprinter
    }
}
