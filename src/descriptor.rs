//! Wire-level description of a program submitted for compilation.
//!
//! A [`ProgramDescriptor`] arrives as a JSON payload and is immutable once
//! parsed. The structured program body is opaque to the cache; only the
//! [`BuildConfig`] is interpreted before handing the program to a backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramDescriptor {
    pub program: ProgramSnapshot,
    #[serde(default)]
    pub config: BuildConfig,
}

impl ProgramDescriptor {
    pub fn new(program: ProgramSnapshot, config: BuildConfig) -> Self {
        Self { program, config }
    }

    /// Parses a serialized request payload.
    pub fn from_bytes(payload: &[u8]) -> CacheResult<Self> {
        if payload.is_empty() {
            return Err(CacheError::MalformedInput(
                "computation input is empty".to_string(),
            ));
        }
        serde_json::from_slice(payload).map_err(|err| {
            CacheError::MalformedInput(format!(
                "unable to parse computation input to a program descriptor: {err}"
            ))
        })
    }

    pub fn to_bytes(&self) -> CacheResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| CacheError::Serialization(err.to_string()))
    }
}

/// Snapshot of the structured program. The body is passed through to the
/// backend untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramSnapshot {
    pub name: String,
    /// Parameter/result signature declared by the program itself, if any.
    #[serde(default)]
    pub signature: Option<ProgramShape>,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl ProgramSnapshot {
    pub fn new(name: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            signature: None,
            body,
        }
    }

    pub fn with_signature(mut self, signature: ProgramShape) -> Self {
        self.signature = Some(signature);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Zero means "not set" and is treated as one replica.
    pub num_replicas: u32,
    /// Zero means "not set" and is treated as one core.
    pub num_cores_per_replica: u32,
    pub program_shape: ProgramShape,
    pub per_core_program_shape: Vec<ProgramShape>,
    pub debug_options: Option<DebugOptions>,
    pub device_assignment: Option<DeviceAssignmentRequest>,
}

impl BuildConfig {
    pub fn effective_num_replicas(&self) -> u32 {
        self.num_replicas.max(1)
    }

    pub fn effective_cores_per_replica(&self) -> u32 {
        self.num_cores_per_replica.max(1)
    }

    /// Rejects configurations this cache cannot build. Runs before any key
    /// is computed or backend is touched.
    pub fn check_supported(&self) -> CacheResult<()> {
        let cores = self.effective_cores_per_replica();
        if cores != 1 {
            return Err(CacheError::unsupported(format!(
                "num_cores_per_replica={cores} is not supported, only 1 core per replica"
            )));
        }
        if !self.per_core_program_shape.is_empty() {
            return Err(CacheError::unsupported(format!(
                "per_core_program_shape is not supported, got {} entries",
                self.per_core_program_shape.len()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Pred,
    S8,
    S16,
    S32,
    S64,
    U8,
    U16,
    U32,
    U64,
    F16,
    Bf16,
    #[default]
    F32,
    F64,
    Tuple,
    Token,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Shape {
    pub element_type: ElementType,
    pub dimensions: Vec<i64>,
    /// Minor-to-major dimension order. `None` lets the backend choose.
    pub layout: Option<Vec<i64>>,
    pub tuple_shapes: Vec<Shape>,
}

impl Shape {
    pub fn array(element_type: ElementType, dimensions: Vec<i64>) -> Self {
        Self {
            element_type,
            dimensions,
            layout: None,
            tuple_shapes: Vec::new(),
        }
    }

    pub fn scalar(element_type: ElementType) -> Self {
        Self::array(element_type, Vec::new())
    }

    pub fn tuple(elements: Vec<Shape>) -> Self {
        Self {
            element_type: ElementType::Tuple,
            dimensions: Vec::new(),
            layout: None,
            tuple_shapes: elements,
        }
    }

    pub fn with_layout(mut self, minor_to_major: Vec<i64>) -> Self {
        self.layout = Some(minor_to_major);
        self
    }

    pub fn is_tuple(&self) -> bool {
        self.element_type == ElementType::Tuple
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Checks dimension sizes, layout permutations and tuple nesting.
    pub fn validate(&self) -> Result<(), String> {
        if self.is_tuple() {
            if !self.dimensions.is_empty() || self.layout.is_some() {
                return Err("tuple shapes cannot carry dimensions or a layout".to_string());
            }
            return self.tuple_shapes.iter().try_for_each(Shape::validate);
        }
        if !self.tuple_shapes.is_empty() {
            return Err(format!(
                "{:?} shape cannot carry tuple elements",
                self.element_type
            ));
        }
        if let Some(dim) = self.dimensions.iter().find(|dim| **dim < 0) {
            return Err(format!("negative dimension size {dim}"));
        }
        if let Some(layout) = &self.layout {
            let mut seen = vec![false; self.rank()];
            if layout.len() != self.rank() {
                return Err(format!(
                    "layout has {} entries for a rank {} shape",
                    layout.len(),
                    self.rank()
                ));
            }
            for &axis in layout {
                let index = usize::try_from(axis)
                    .ok()
                    .filter(|index| *index < seen.len())
                    .ok_or_else(|| format!("layout axis {axis} out of range"))?;
                if std::mem::replace(&mut seen[index], true) {
                    return Err(format!("layout axis {axis} repeated"));
                }
            }
        }
        Ok(())
    }

    /// Returns a copy with every missing layout filled in as row-major.
    pub fn with_default_layout(&self) -> Shape {
        if self.is_tuple() {
            return Shape::tuple(
                self.tuple_shapes
                    .iter()
                    .map(Shape::with_default_layout)
                    .collect(),
            );
        }
        let mut shape = self.clone();
        if shape.layout.is_none() {
            let rank = shape.rank() as i64;
            shape.layout = Some((0..rank).rev().collect());
        }
        shape
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramShape {
    pub parameters: Vec<Shape>,
    pub result: Shape,
}

impl ProgramShape {
    pub fn new(parameters: Vec<Shape>, result: Shape) -> Self {
        Self { parameters, result }
    }

    pub fn to_bytes(&self) -> CacheResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| CacheError::Serialization(err.to_string()))
    }

    pub fn from_bytes(payload: &[u8]) -> CacheResult<Self> {
        serde_json::from_slice(payload).map_err(|err| {
            CacheError::MalformedInput(format!("unable to parse program shape: {err}"))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugOptions {
    /// Directory the backend dumps intermediate artifacts into.
    pub dump_to: Option<String>,
    pub dump_as_text: bool,
    pub dump_as_graph: bool,
    /// Backend specific flags, passed through verbatim.
    pub flags: BTreeMap<String, String>,
}

/// Raw device assignment as sent by the client: one group per core, each
/// holding one mesh coordinate per replica.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceAssignmentRequest {
    pub computation_devices: Vec<ComputationDevices>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputationDevices {
    pub replica_devices: Vec<MeshCoordinates>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeshCoordinates(pub Vec<i32>);

impl DeviceAssignmentRequest {
    /// Builds a single-core request with `(0, 0, 0, ordinal)` per replica.
    pub fn single_core(ordinals: &[i32]) -> Self {
        Self {
            computation_devices: vec![ComputationDevices {
                replica_devices: ordinals
                    .iter()
                    .map(|&ordinal| MeshCoordinates(vec![0, 0, 0, ordinal]))
                    .collect(),
            }],
        }
    }
}
