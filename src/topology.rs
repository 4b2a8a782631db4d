use crate::descriptor::DeviceAssignmentRequest;
use crate::error::{CacheError, CacheResult, TopologyError};

/// Number of components in a mesh coordinate.
pub const MESH_COORDINATE_ARITY: usize = 4;
/// Value every non-ordinal mesh component must hold.
pub const MESH_SENTINEL: i32 = 0;

const SUPPORTED_CORES_PER_REPLICA: usize = 1;

/// Replica-major matrix of device ordinals: `ordinal(replica, core)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAssignment {
    replicas: usize,
    cores_per_replica: usize,
    ordinals: Vec<i32>,
}

impl DeviceAssignment {
    fn zeroed(replicas: usize, cores_per_replica: usize) -> Self {
        Self {
            replicas,
            cores_per_replica,
            ordinals: vec![0; replicas * cores_per_replica],
        }
    }

    pub fn replica_count(&self) -> usize {
        self.replicas
    }

    pub fn cores_per_replica(&self) -> usize {
        self.cores_per_replica
    }

    pub fn ordinal(&self, replica: usize, core: usize) -> Option<i32> {
        if replica >= self.replicas || core >= self.cores_per_replica {
            return None;
        }
        self.ordinals
            .get(replica * self.cores_per_replica + core)
            .copied()
    }

    /// Ordinals of every core assigned to `replica`.
    pub fn replica(&self, replica: usize) -> Option<&[i32]> {
        let start = replica.checked_mul(self.cores_per_replica)?;
        self.ordinals.get(start..start + self.cores_per_replica)
    }

    fn set(&mut self, replica: usize, core: usize, ordinal: i32) {
        self.ordinals[replica * self.cores_per_replica + core] = ordinal;
    }
}

/// Maps the requested core count to the one this cache can build, treating
/// zero as "unset".
pub fn normalize_cores_per_replica(requested: u32) -> CacheResult<usize> {
    let cores = requested.max(1) as usize;
    if cores != SUPPORTED_CORES_PER_REPLICA {
        return Err(CacheError::unsupported(format!(
            "num_cores_per_replica={cores} is not supported, only {SUPPORTED_CORES_PER_REPLICA} core per replica"
        )));
    }
    Ok(cores)
}

/// Validates a raw device assignment against the expected topology and
/// builds the normalized matrix.
pub fn generate_device_assignment(
    request: &DeviceAssignmentRequest,
    num_replicas: usize,
    num_cores_per_replica: usize,
) -> CacheResult<DeviceAssignment> {
    if num_cores_per_replica != SUPPORTED_CORES_PER_REPLICA {
        return Err(CacheError::unsupported(format!(
            "num_cores_per_replica={num_cores_per_replica} is not supported"
        )));
    }

    let groups = &request.computation_devices;
    if groups.len() != num_cores_per_replica {
        return Err(TopologyError::CoreGroupCount {
            expected: num_cores_per_replica,
            observed: groups.len(),
        }
        .into());
    }

    // Replica counts are checked before the matrix is sized.
    for (core, group) in groups.iter().enumerate() {
        if group.replica_devices.len() != num_replicas {
            return Err(TopologyError::ReplicaCount {
                core,
                expected: num_replicas,
                observed: group.replica_devices.len(),
            }
            .into());
        }
    }

    let mut assignment = DeviceAssignment::zeroed(num_replicas, num_cores_per_replica);
    for (core, group) in groups.iter().enumerate() {
        for (replica, coords) in group.replica_devices.iter().enumerate() {
            let ordinal = device_ordinal(&coords.0, replica, core)?;
            assignment.set(replica, core, ordinal);
        }
    }

    Ok(assignment)
}

/// Checks one mesh coordinate and returns its device ordinal.
fn device_ordinal(values: &[i32], replica: usize, core: usize) -> CacheResult<i32> {
    if values.len() != MESH_COORDINATE_ARITY {
        return Err(TopologyError::CoordinateArity {
            replica,
            core,
            expected: MESH_COORDINATE_ARITY,
            observed: values.len(),
        }
        .into());
    }
    let (pinned, ordinal) = values.split_at(MESH_COORDINATE_ARITY - 1);
    if let Some((index, &observed)) = pinned
        .iter()
        .enumerate()
        .find(|(_, value)| **value != MESH_SENTINEL)
    {
        return Err(TopologyError::CoordinateSentinel {
            replica,
            core,
            index,
            expected: MESH_SENTINEL,
            observed,
        }
        .into());
    }
    Ok(ordinal[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ComputationDevices, MeshCoordinates};
    use crate::error::{ErrorKind, TopologyDimension};

    fn topology_error(err: CacheError) -> TopologyError {
        match err {
            CacheError::InvalidTopology(inner) => inner,
            other => panic!("expected invalid topology, got {other:?}"),
        }
    }

    #[test]
    fn two_replicas_one_core() {
        let request = DeviceAssignmentRequest::single_core(&[3, 7]);
        let assignment = generate_device_assignment(&request, 2, 1).unwrap();
        assert_eq!(assignment.replica_count(), 2);
        assert_eq!(assignment.cores_per_replica(), 1);
        assert_eq!(assignment.ordinal(0, 0), Some(3));
        assert_eq!(assignment.ordinal(1, 0), Some(7));
        assert_eq!(assignment.replica(1), Some(&[7][..]));
        assert_eq!(assignment.ordinal(2, 0), None);
    }

    #[test]
    fn sentinel_must_be_zero() {
        let request = DeviceAssignmentRequest {
            computation_devices: vec![ComputationDevices {
                replica_devices: vec![
                    MeshCoordinates(vec![0, 0, 0, 1]),
                    MeshCoordinates(vec![0, 5, 0, 2]),
                ],
            }],
        };
        let err = topology_error(generate_device_assignment(&request, 2, 1).unwrap_err());
        assert_eq!(err.dimension(), TopologyDimension::CoordinateSentinel);
        assert_eq!(
            err,
            TopologyError::CoordinateSentinel {
                replica: 1,
                core: 0,
                index: 1,
                expected: 0,
                observed: 5,
            }
        );
    }

    #[test]
    fn arity_must_be_four() {
        let request = DeviceAssignmentRequest {
            computation_devices: vec![ComputationDevices {
                replica_devices: vec![MeshCoordinates(vec![0, 0, 1])],
            }],
        };
        let err = topology_error(generate_device_assignment(&request, 1, 1).unwrap_err());
        assert_eq!(err.dimension(), TopologyDimension::CoordinateArity);
        assert_eq!(err.expected_observed(), (4, 3));
    }

    #[test]
    fn group_counts_must_match() {
        let request = DeviceAssignmentRequest::single_core(&[0, 1, 2]);
        let err = topology_error(generate_device_assignment(&request, 2, 1).unwrap_err());
        assert_eq!(err.dimension(), TopologyDimension::ReplicaDevices);
        assert_eq!(err.expected_observed(), (2, 3));

        let empty = DeviceAssignmentRequest::default();
        let err = topology_error(generate_device_assignment(&empty, 1, 1).unwrap_err());
        assert_eq!(err.dimension(), TopologyDimension::CoreGroups);
        assert_eq!(err.expected_observed(), (1, 0));
    }

    #[test]
    fn replica_count_is_checked_before_sizing_the_matrix() {
        let request = DeviceAssignmentRequest::single_core(&[0]);
        let err = topology_error(
            generate_device_assignment(&request, u32::MAX as usize, 1).unwrap_err(),
        );
        assert_eq!(err.dimension(), TopologyDimension::ReplicaDevices);
        assert_eq!(err.expected_observed(), (i64::from(u32::MAX), 1));
    }

    #[test]
    fn multiple_cores_are_unsupported() {
        let request = DeviceAssignmentRequest::single_core(&[0]);
        let err = generate_device_assignment(&request, 1, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedConfiguration);
        assert_eq!(normalize_cores_per_replica(0).unwrap(), 1);
        assert_eq!(
            normalize_cores_per_replica(2).unwrap_err().kind(),
            ErrorKind::UnsupportedConfiguration
        );
    }
}
