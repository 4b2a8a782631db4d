use std::fmt;

use thiserror::Error;

use crate::cache::Handle;

pub type CacheResult<T> = Result<T, CacheError>;

/// Failure of a compile, lookup or release request.
///
/// Cloneable so that one failed compile can be reported to every caller that
/// was waiting on it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
    #[error("invalid topology: {0}")]
    InvalidTopology(#[from] TopologyError),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("backend compile failure: {0}")]
    BackendCompileFailure(String),
    #[error("compilation handle {0} not found")]
    NotFound(Handle),
    #[error("compilation cache is full: all {max_entries} entries are referenced or compiling")]
    CacheFull { max_entries: usize },
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::MalformedInput(_) => ErrorKind::MalformedInput,
            CacheError::UnsupportedConfiguration(_) => ErrorKind::UnsupportedConfiguration,
            CacheError::InvalidTopology(_) => ErrorKind::InvalidTopology,
            CacheError::Serialization(_) => ErrorKind::Serialization,
            CacheError::BackendCompileFailure(_) => ErrorKind::BackendCompileFailure,
            CacheError::NotFound(_) => ErrorKind::NotFound,
            CacheError::CacheFull { .. } => ErrorKind::CacheFull,
        }
    }

    pub fn backend(message: impl fmt::Display) -> Self {
        CacheError::BackendCompileFailure(message.to_string())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        CacheError::UnsupportedConfiguration(message.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedInput,
    UnsupportedConfiguration,
    InvalidTopology,
    Serialization,
    BackendCompileFailure,
    NotFound,
    CacheFull,
}

/// Coarse grouping of error kinds for callers deciding what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself is wrong and will fail the same way again.
    Input,
    /// The backend compiler failed.
    Backend,
    /// Capacity is exhausted; retrying later may succeed.
    Resource,
}

impl ErrorKind {
    pub fn class(self) -> ErrorClass {
        match self {
            ErrorKind::MalformedInput
            | ErrorKind::UnsupportedConfiguration
            | ErrorKind::InvalidTopology
            | ErrorKind::Serialization
            | ErrorKind::NotFound => ErrorClass::Input,
            ErrorKind::BackendCompileFailure => ErrorClass::Backend,
            ErrorKind::CacheFull => ErrorClass::Resource,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::MalformedInput => "malformed_input",
            ErrorKind::UnsupportedConfiguration => "unsupported_configuration",
            ErrorKind::InvalidTopology => "invalid_topology",
            ErrorKind::Serialization => "serialization_error",
            ErrorKind::BackendCompileFailure => "backend_compile_failure",
            ErrorKind::NotFound => "not_found",
            ErrorKind::CacheFull => "cache_full",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of a device assignment failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyDimension {
    CoreGroups,
    ReplicaDevices,
    CoordinateArity,
    CoordinateSentinel,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error(
        "device assignment does not have the correct number of computation devices: \
         num_cores_per_replica={expected} computation_devices={observed}"
    )]
    CoreGroupCount { expected: usize, observed: usize },
    #[error(
        "device assignment does not have the correct number of replica devices for core {core}: \
         num_replicas={expected} replica_devices={observed}"
    )]
    ReplicaCount {
        core: usize,
        expected: usize,
        observed: usize,
    },
    #[error(
        "mesh coordinates for replica {replica} core {core} must have {expected} entries, got {observed}"
    )]
    CoordinateArity {
        replica: usize,
        core: usize,
        expected: usize,
        observed: usize,
    },
    #[error(
        "mesh coordinate at index {index} for replica {replica} core {core} must be {expected}, got {observed}"
    )]
    CoordinateSentinel {
        replica: usize,
        core: usize,
        index: usize,
        expected: i32,
        observed: i32,
    },
}

impl TopologyError {
    pub fn dimension(&self) -> TopologyDimension {
        match self {
            TopologyError::CoreGroupCount { .. } => TopologyDimension::CoreGroups,
            TopologyError::ReplicaCount { .. } => TopologyDimension::ReplicaDevices,
            TopologyError::CoordinateArity { .. } => TopologyDimension::CoordinateArity,
            TopologyError::CoordinateSentinel { .. } => TopologyDimension::CoordinateSentinel,
        }
    }

    /// Expected and observed values, widened for uniform reporting.
    pub fn expected_observed(&self) -> (i64, i64) {
        match *self {
            TopologyError::CoreGroupCount { expected, observed }
            | TopologyError::ReplicaCount {
                expected, observed, ..
            }
            | TopologyError::CoordinateArity {
                expected, observed, ..
            } => (expected as i64, observed as i64),
            TopologyError::CoordinateSentinel {
                expected, observed, ..
            } => (i64::from(expected), i64::from(observed)),
        }
    }
}

/// Every per-handle failure from one release batch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to release {} of {attempted} compilation handles", .failures.len())]
pub struct BatchReleaseError {
    pub attempted: usize,
    pub failures: Vec<(Handle, CacheError)>,
}

impl BatchReleaseError {
    pub fn failed_handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.failures.iter().map(|(handle, _)| *handle)
    }
}
