use crate::descriptor::{BuildConfig, DebugOptions, ProgramShape, Shape};
use crate::error::CacheResult;
use crate::topology::{DeviceAssignment, generate_device_assignment, normalize_cores_per_replica};

/// Opaque reference to the device memory allocator a backend should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocatorHandle(u64);

impl AllocatorHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Device the service compiles for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceContext {
    pub device_ordinal: i32,
    pub allocator: AllocatorHandle,
}

impl DeviceContext {
    pub fn new(device_ordinal: i32, allocator: AllocatorHandle) -> Self {
        Self {
            device_ordinal,
            allocator,
        }
    }
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self::new(0, AllocatorHandle::new(0))
    }
}

/// Immutable set of options handed to the backend compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    device_ordinal: i32,
    num_replicas: u32,
    allocator: AllocatorHandle,
    argument_layouts: Vec<Shape>,
    result_layout: Shape,
    debug_options: Option<DebugOptions>,
    device_assignment: Option<DeviceAssignment>,
}

impl BuildOptions {
    /// Combines already validated pieces. A replica count of zero means one.
    pub fn assemble(
        device: &DeviceContext,
        num_replicas: u32,
        program_shape: &ProgramShape,
        debug_options: Option<&DebugOptions>,
        device_assignment: Option<DeviceAssignment>,
    ) -> Self {
        Self {
            device_ordinal: device.device_ordinal,
            num_replicas: num_replicas.max(1),
            allocator: device.allocator,
            argument_layouts: program_shape.parameters.clone(),
            result_layout: program_shape.result.clone(),
            debug_options: debug_options.map(normalize_debug_options),
            device_assignment,
        }
    }

    /// Validates the topology in `config` and assembles the options for it.
    pub fn from_config(device: &DeviceContext, config: &BuildConfig) -> CacheResult<Self> {
        config.check_supported()?;
        let cores = normalize_cores_per_replica(config.num_cores_per_replica)?;
        let num_replicas = config.effective_num_replicas();
        let device_assignment = config
            .device_assignment
            .as_ref()
            .map(|request| generate_device_assignment(request, num_replicas as usize, cores))
            .transpose()?;

        Ok(Self::assemble(
            device,
            num_replicas,
            &config.program_shape,
            config.debug_options.as_ref(),
            device_assignment,
        ))
    }

    pub fn device_ordinal(&self) -> i32 {
        self.device_ordinal
    }

    pub fn num_replicas(&self) -> u32 {
        self.num_replicas
    }

    pub fn allocator(&self) -> AllocatorHandle {
        self.allocator
    }

    pub fn argument_layouts(&self) -> &[Shape] {
        &self.argument_layouts
    }

    pub fn result_layout(&self) -> &Shape {
        &self.result_layout
    }

    pub fn debug_options(&self) -> Option<&DebugOptions> {
        self.debug_options.as_ref()
    }

    pub fn device_assignment(&self) -> Option<&DeviceAssignment> {
        self.device_assignment.as_ref()
    }
}

fn normalize_debug_options(options: &DebugOptions) -> DebugOptions {
    let mut options = options.clone();
    if options.dump_to.as_deref().is_some_and(|dir| dir.trim().is_empty()) {
        options.dump_to = None;
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DeviceAssignmentRequest, ElementType};
    use crate::error::ErrorKind;

    fn device() -> DeviceContext {
        DeviceContext::new(2, AllocatorHandle::new(0xfeed))
    }

    #[test]
    fn zero_replicas_behaves_like_one() {
        let shape = ProgramShape::new(
            vec![Shape::array(ElementType::F32, vec![8])],
            Shape::scalar(ElementType::F32),
        );
        let zero = BuildOptions::assemble(&device(), 0, &shape, None, None);
        let one = BuildOptions::assemble(&device(), 1, &shape, None, None);
        assert_eq!(zero, one);
        assert_eq!(zero.num_replicas(), 1);
        assert_eq!(zero.device_ordinal(), 2);
        assert_eq!(zero.allocator().raw(), 0xfeed);
        assert_eq!(zero.argument_layouts().len(), 1);
    }

    #[test]
    fn empty_dump_directory_is_dropped() {
        let debug = DebugOptions {
            dump_to: Some("  ".to_string()),
            dump_as_text: true,
            ..DebugOptions::default()
        };
        let options =
            BuildOptions::assemble(&device(), 1, &ProgramShape::default(), Some(&debug), None);
        let normalized = options.debug_options().unwrap();
        assert_eq!(normalized.dump_to, None);
        assert!(normalized.dump_as_text);
    }

    #[test]
    fn from_config_validates_topology() {
        let config = BuildConfig {
            num_replicas: 2,
            device_assignment: Some(DeviceAssignmentRequest::single_core(&[4, 5])),
            ..BuildConfig::default()
        };
        let options = BuildOptions::from_config(&device(), &config).unwrap();
        let assignment = options.device_assignment().unwrap();
        assert_eq!(assignment.ordinal(1, 0), Some(5));

        let bad = BuildConfig {
            num_replicas: 3,
            ..config
        };
        assert_eq!(
            BuildOptions::from_config(&device(), &bad).unwrap_err().kind(),
            ErrorKind::InvalidTopology
        );
    }
}
