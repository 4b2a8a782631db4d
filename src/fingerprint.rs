use std::fmt;
use std::hash::{BuildHasher, Hasher};

use ahash::RandomState;
use serde_json::{Map, Value};

use crate::descriptor::ProgramDescriptor;
use crate::error::{CacheError, CacheResult};

/// Largest canonical encoding accepted for fingerprinting.
pub const DEFAULT_MAX_DESCRIPTOR_BYTES: usize = i32::MAX as usize;

// Fixed seeds keep keys stable for the lifetime of the process; keys are
// never persisted, so cross-version stability of ahash does not matter.
const SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// 64-bit fingerprint of a canonically serialized [`ProgramDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(u64);

impl CacheKey {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Fingerprinter {
    max_bytes: usize,
    hasher: RandomState,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DESCRIPTOR_BYTES)
    }
}

impl Fingerprinter {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            hasher: RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3]),
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Serializes `descriptor` with object keys in sorted order at every
    /// depth, independent of how the input was ordered.
    pub fn canonical_bytes(&self, descriptor: &ProgramDescriptor) -> CacheResult<Vec<u8>> {
        let value = serde_json::to_value(descriptor)
            .map_err(|err| CacheError::Serialization(err.to_string()))?;
        let bytes = serde_json::to_vec(&canonicalize(value))
            .map_err(|err| CacheError::Serialization(err.to_string()))?;
        if bytes.len() > self.max_bytes {
            return Err(CacheError::Serialization(format!(
                "program descriptor serializes to {} bytes, limit is {}",
                bytes.len(),
                self.max_bytes
            )));
        }
        Ok(bytes)
    }

    pub fn fingerprint(&self, descriptor: &ProgramDescriptor) -> CacheResult<CacheKey> {
        let bytes = self.canonical_bytes(descriptor)?;
        let mut hasher = self.hasher.build_hasher();
        hasher.write(&bytes);
        Ok(CacheKey(hasher.finish()))
    }
}

/// Fingerprints with the default size limit.
pub fn fingerprint(descriptor: &ProgramDescriptor) -> CacheResult<CacheKey> {
    Fingerprinter::default().fingerprint(descriptor)
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut sorted = Map::with_capacity(entries.len());
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
