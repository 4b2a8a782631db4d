//! Keyed, reference-counted store of compiled executables.

mod compilation_cache;
mod entry;
pub mod eviction;
mod pending;

pub use compilation_cache::{CacheStats, CompilationCache};
pub use entry::{CacheEntry, EntryRef, Handle};
pub use eviction::{EvictionPolicy, LruEvictionPolicy};
