use tracing::debug;

use super::{Backend, BackendError, Executable};
use crate::build_options::BuildOptions;
use crate::descriptor::{ProgramShape, ProgramSnapshot, Shape};
use crate::topology::DeviceAssignment;

/// In-process backend that checks a program against its build options and
/// produces a metadata-only executable. Used by the CLI and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceBackend;

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceExecutable {
    name: String,
    program_shape: ProgramShape,
    device_ordinal: i32,
    num_replicas: u32,
    device_assignment: Option<DeviceAssignment>,
}

impl ReferenceExecutable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_ordinal(&self) -> i32 {
        self.device_ordinal
    }

    pub fn num_replicas(&self) -> u32 {
        self.num_replicas
    }

    pub fn device_assignment(&self) -> Option<&DeviceAssignment> {
        self.device_assignment.as_ref()
    }
}

impl Executable for ReferenceExecutable {
    fn program_shape(&self) -> ProgramShape {
        self.program_shape.clone()
    }
}

impl Backend for ReferenceBackend {
    type Executable = ReferenceExecutable;

    fn compile(
        &self,
        program: &ProgramSnapshot,
        options: &BuildOptions,
    ) -> Result<Vec<ReferenceExecutable>, BackendError> {
        if program.name.trim().is_empty() {
            return Err(BackendError::new("program has no name"));
        }
        if program.body.is_null() {
            return Err(BackendError::new(format!(
                "program `{}` has an empty body",
                program.name
            )));
        }

        for (index, layout) in options.argument_layouts().iter().enumerate() {
            layout
                .validate()
                .map_err(|msg| BackendError::new(format!("parameter {index}: {msg}")))?;
        }
        options
            .result_layout()
            .validate()
            .map_err(|msg| BackendError::new(format!("result: {msg}")))?;

        if let Some(signature) = &program.signature {
            check_signature(signature, options)?;
        }

        if let Some(assignment) = options.device_assignment() {
            if assignment.replica_count() != options.num_replicas() as usize {
                return Err(BackendError::new(format!(
                    "device assignment covers {} replicas, build requests {}",
                    assignment.replica_count(),
                    options.num_replicas()
                )));
            }
        }

        debug!(program = %program.name, replicas = options.num_replicas(), "reference build");
        Ok(vec![ReferenceExecutable {
            name: program.name.clone(),
            program_shape: ProgramShape::new(
                options
                    .argument_layouts()
                    .iter()
                    .map(Shape::with_default_layout)
                    .collect(),
                options.result_layout().with_default_layout(),
            ),
            device_ordinal: options.device_ordinal(),
            num_replicas: options.num_replicas(),
            device_assignment: options.device_assignment().cloned(),
        }])
    }
}

fn check_signature(signature: &ProgramShape, options: &BuildOptions) -> Result<(), BackendError> {
    let arguments = options.argument_layouts();
    if signature.parameters.len() != arguments.len() {
        return Err(BackendError::new(format!(
            "program takes {} parameters, {} argument layouts given",
            signature.parameters.len(),
            arguments.len()
        )));
    }
    for (index, (declared, layout)) in signature.parameters.iter().zip(arguments).enumerate() {
        if !same_array_shape(declared, layout) {
            return Err(BackendError::new(format!(
                "argument layout {index} does not match the program parameter"
            )));
        }
    }
    if !same_array_shape(&signature.result, options.result_layout()) {
        return Err(BackendError::new(
            "result layout does not match the program result",
        ));
    }
    Ok(())
}

/// Element type and dimensions agree, ignoring layouts.
fn same_array_shape(a: &Shape, b: &Shape) -> bool {
    a.element_type == b.element_type
        && a.dimensions == b.dimensions
        && a.tuple_shapes.len() == b.tuple_shapes.len()
        && a
            .tuple_shapes
            .iter()
            .zip(&b.tuple_shapes)
            .all(|(a, b)| same_array_shape(a, b))
}
