//! Seam between the cache and the compiler that produces executables.

mod reference;

use thiserror::Error;

use crate::build_options::BuildOptions;
use crate::descriptor::{ProgramShape, ProgramSnapshot};
use crate::error::CacheError;

pub use reference::{ReferenceBackend, ReferenceExecutable};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<BackendError> for CacheError {
    fn from(err: BackendError) -> Self {
        CacheError::BackendCompileFailure(err.message)
    }
}

/// A loaded, runnable program.
pub trait Executable: Send + Sync {
    /// Parameter and result shapes with the layouts the backend chose.
    fn program_shape(&self) -> ProgramShape;
}

/// Compiles programs into executables.
///
/// Implementations may be called concurrently for different programs; the
/// cache never calls `compile` twice at once for the same program.
pub trait Backend: Send + Sync {
    type Executable: Executable + 'static;

    /// Builds the program. A well-behaved backend returns exactly one
    /// executable for single-core builds.
    fn compile(
        &self,
        program: &ProgramSnapshot,
        options: &BuildOptions,
    ) -> Result<Vec<Self::Executable>, BackendError>;
}
