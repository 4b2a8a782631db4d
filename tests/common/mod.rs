#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::json;
use xcache::backend::{Backend, BackendError, ReferenceBackend, ReferenceExecutable};
use xcache::descriptor::{
    BuildConfig, DeviceAssignmentRequest, ElementType, ProgramDescriptor, ProgramShape,
    ProgramSnapshot, Shape,
};
use xcache::{BuildOptions, CompilationService, DeviceContext, ServiceConfig};

/// Wraps the reference backend, counting calls and optionally slowing or
/// failing them.
#[derive(Debug, Default)]
pub struct CountingBackend {
    calls: AtomicUsize,
    delay: Duration,
    fail_first: AtomicUsize,
}

impl CountingBackend {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing(times: usize) -> Self {
        Self {
            fail_first: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Backend for CountingBackend {
    type Executable = ReferenceExecutable;

    fn compile(
        &self,
        program: &ProgramSnapshot,
        options: &BuildOptions,
    ) -> Result<Vec<ReferenceExecutable>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let fail = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if fail {
            return Err(BackendError::new("injected backend failure"));
        }
        ReferenceBackend.compile(program, options)
    }
}

/// Blocks the first compile until the test lets it go, then fails it.
/// Later compiles run straight through.
pub struct GatedBackend {
    inner: CountingBackend,
    gated: AtomicBool,
    started: Mutex<mpsc::Sender<()>>,
    resume: Mutex<mpsc::Receiver<()>>,
}

impl GatedBackend {
    /// Returns the backend, a receiver signalled once the first compile has
    /// started, and a sender that lets it fail.
    pub fn failing_once() -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        let backend = Self {
            inner: CountingBackend::failing(1),
            gated: AtomicBool::new(true),
            started: Mutex::new(started_tx),
            resume: Mutex::new(resume_rx),
        };
        (backend, started_rx, resume_tx)
    }

    pub fn calls(&self) -> usize {
        self.inner.calls()
    }
}

impl Backend for GatedBackend {
    type Executable = ReferenceExecutable;

    fn compile(
        &self,
        program: &ProgramSnapshot,
        options: &BuildOptions,
    ) -> Result<Vec<ReferenceExecutable>, BackendError> {
        if self.gated.swap(false, Ordering::SeqCst) {
            self.started.lock().unwrap().send(()).unwrap();
            self.resume.lock().unwrap().recv().unwrap();
        }
        self.inner.compile(program, options)
    }
}

pub fn service_with<B: Backend>(backend: B, config: &ServiceConfig) -> CompilationService<B> {
    CompilationService::new(backend, DeviceContext::default(), config)
}

pub fn vector_shape() -> ProgramShape {
    let vector = Shape::array(ElementType::F32, vec![4]);
    ProgramShape::new(vec![vector.clone(), vector.clone()], vector)
}

pub fn descriptor(name: &str) -> ProgramDescriptor {
    ProgramDescriptor::new(
        ProgramSnapshot::new(name, json!({ "ops": ["parameter", "parameter", "add"] }))
            .with_signature(vector_shape()),
        BuildConfig {
            program_shape: vector_shape(),
            ..BuildConfig::default()
        },
    )
}

pub fn replicated(name: &str, ordinals: &[i32]) -> ProgramDescriptor {
    let mut descriptor = descriptor(name);
    descriptor.config.num_replicas = u32::try_from(ordinals.len()).unwrap();
    descriptor.config.device_assignment = Some(DeviceAssignmentRequest::single_core(ordinals));
    descriptor
}

pub fn payload(descriptor: &ProgramDescriptor) -> Vec<u8> {
    descriptor.to_bytes().unwrap()
}
