use std::time::Instant;

use tracing::{debug, warn};

use super::CompilationService;
use crate::backend::{Backend, Executable};
use crate::build_options::BuildOptions;
use crate::cache::Handle;
use crate::descriptor::{ProgramDescriptor, ProgramShape};
use crate::error::{CacheError, CacheResult};
use crate::metrics::CompileOutcome;

/// Reply to a successful compile request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    pub handle: Handle,
    /// Serialized [`ProgramShape`] of the executable.
    pub program_shape: Vec<u8>,
}

impl CompileOutput {
    pub fn decode_program_shape(&self) -> CacheResult<ProgramShape> {
        ProgramShape::from_bytes(&self.program_shape)
    }
}

impl<B: Backend> CompilationService<B> {
    /// Handles a serialized compile request end to end.
    ///
    /// On success the caller owns one reference to the returned handle. On
    /// failure nothing is retained on the caller's behalf.
    pub fn compile(&self, payload: &[u8]) -> CacheResult<CompileOutput> {
        self.timed(|compiled| {
            let descriptor = ProgramDescriptor::from_bytes(payload)?;
            self.compile_parsed(&descriptor, compiled)
        })
    }

    pub fn compile_descriptor(&self, descriptor: &ProgramDescriptor) -> CacheResult<CompileOutput> {
        self.timed(|compiled| self.compile_parsed(descriptor, compiled))
    }

    fn timed<F>(&self, request: F) -> CacheResult<CompileOutput>
    where
        F: FnOnce(&mut bool) -> CacheResult<CompileOutput>,
    {
        let started = Instant::now();
        let mut compiled = false;
        let result = request(&mut compiled);
        let outcome = match (&result, compiled) {
            (Err(_), _) => CompileOutcome::Failed,
            (Ok(_), true) => CompileOutcome::Compiled,
            (Ok(_), false) => CompileOutcome::Hit,
        };
        self.sink.record_compile(started.elapsed(), outcome);
        result
    }

    fn compile_parsed(
        &self,
        descriptor: &ProgramDescriptor,
        compiled: &mut bool,
    ) -> CacheResult<CompileOutput> {
        descriptor.config.check_supported()?;
        let key = self.fingerprinter.fingerprint(descriptor)?;
        debug!(%key, program = %descriptor.program.name, "compile request");

        let handle = self.cache.compile_if_absent(key, || {
            *compiled = true;
            self.build(descriptor)
        })?;

        match self.describe(handle) {
            Ok(program_shape) => Ok(CompileOutput {
                handle,
                program_shape,
            }),
            Err(err) => {
                if let Err(release_err) = self.cache.release(handle) {
                    warn!(%handle, error = %release_err, "failed to drop reference of failed request");
                }
                Err(err)
            }
        }
    }

    fn build(&self, descriptor: &ProgramDescriptor) -> CacheResult<B::Executable> {
        let options = BuildOptions::from_config(&self.device, &descriptor.config)?;

        debug!(
            program = %descriptor.program.name,
            device_ordinal = options.device_ordinal(),
            num_replicas = options.num_replicas(),
            "building executable"
        );
        let mut executables = self.backend.compile(&descriptor.program, &options)?;
        let count = executables.len();
        match executables.pop() {
            Some(executable) if count == 1 => Ok(executable),
            _ => Err(CacheError::backend(format!(
                "backend returned {count} executables, expected exactly 1"
            ))),
        }
    }

    fn describe(&self, handle: Handle) -> CacheResult<Vec<u8>> {
        let entry = self.cache.lookup(handle)?;
        entry.executable().program_shape().to_bytes()
    }
}
