//! Process-wide compilation cache.
//!
//! Compile requests are fingerprinted, deduplicated against in-flight and
//! finished compiles, and answered with a reference-counted [`Handle`] to the
//! resulting executable. See [`CompilationService`] for the request side and
//! [`CompilationCache`] for the store itself.

pub mod backend;
pub mod build_options;
pub mod cache;
pub mod cli;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod service;
pub mod topology;

pub use backend::{Backend, BackendError, Executable, ReferenceBackend};
pub use build_options::{AllocatorHandle, BuildOptions, DeviceContext};
pub use cache::{CacheStats, CompilationCache, EntryRef, Handle};
pub use config::{CacheConfig, ServiceConfig};
pub use descriptor::{BuildConfig, ProgramDescriptor, ProgramShape, ProgramSnapshot};
pub use error::{BatchReleaseError, CacheError, CacheResult, ErrorClass, ErrorKind};
pub use fingerprint::{CacheKey, Fingerprinter, fingerprint};
pub use service::{CompilationService, CompileOutput};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
