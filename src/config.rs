use crate::{Error, NodeWeight};

/// How the partitioner seeds labels before the first round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitialPartition {
    /// Deterministic contiguous split of the global id range into k blocks.
    RangeSplit,
    /// Adopt the labels already stored in the graph.
    FromExistingLabels,
}

/// Whether convergence is judged over all processes or per process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergenceScope {
    /// Stop once the globally summed fraction of relabeled vertices drops
    /// below the stop factor.
    Global,
    /// Stop once every process is below the stop factor on its own shard.
    /// Processes still agree on the verdict through a reduction, so nobody
    /// leaves the round loop alone.
    Local,
}

/// Parameters of one distributed label propagation run.
///
/// `stop_factor` is used as-is; a driver that follows the usual convention
/// of scaling the stop threshold with the partition count divides by k
/// before building the config.
#[derive(Clone, Copy, Debug)]
pub struct PartitionConfig {
    /// Number of partitions to produce.
    pub k: usize,
    /// Allowed imbalance, e.g. 0.03 for 3 percent.
    pub epsilon: f64,
    /// Number of waves each boundary synchronization is split into.
    pub comm_rounds: usize,
    /// Relabel fraction below which the run stops.
    pub stop_factor: f64,
    /// Maximum number of label propagation rounds.
    pub label_iterations: usize,
    /// Base seed of the per-process tie-break streams.
    pub seed: u64,
    pub initial_partition: InitialPartition,
    pub convergence: ConvergenceScope,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            k: 2,
            epsilon: 0.03,
            comm_rounds: 128,
            stop_factor: 0.01,
            label_iterations: 10,
            seed: 0,
            initial_partition: InitialPartition::RangeSplit,
            convergence: ConvergenceScope::Global,
        }
    }
}

impl PartitionConfig {
    /// Rejects parameter combinations that cannot produce a valid run.
    pub fn validate(&self) -> Result<(), Error> {
        if self.k == 0 {
            return Err(Error::Configuration {
                detail: "partition count k must be at least 1",
            });
        }
        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(Error::Configuration {
                detail: "imbalance tolerance must be finite and non-negative",
            });
        }
        if self.comm_rounds == 0 {
            return Err(Error::Configuration {
                detail: "communication round count must be at least 1",
            });
        }
        if !self.stop_factor.is_finite() || self.stop_factor < 0.0 {
            return Err(Error::Configuration {
                detail: "stop factor must be finite and non-negative",
            });
        }
        if self.label_iterations == 0 {
            return Err(Error::Configuration {
                detail: "label iteration count must be at least 1",
            });
        }
        Ok(())
    }

    /// Heaviest weight any partition may reach:
    /// `floor((1 + epsilon) * ceil(vertices / k))`.
    pub fn upper_bound_capacity(&self, global_vertices: u64) -> NodeWeight {
        let ideal = global_vertices.div_ceil(self.k as u64);
        ((1.0 + self.epsilon) * ideal as f64).floor() as NodeWeight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        // Arrange
        let config = PartitionConfig::default();

        // Act
        let result = config.validate();

        // Assert
        assert!(result.is_ok());
    }

    #[test]
    fn test_zero_partition_count_is_rejected() {
        // Arrange
        let config = PartitionConfig {
            k: 0,
            ..PartitionConfig::default()
        };

        // Act
        let result = config.validate();

        // Assert
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_negative_imbalance_is_rejected() {
        // Arrange
        let config = PartitionConfig {
            epsilon: -0.01,
            ..PartitionConfig::default()
        };

        // Act
        let result = config.validate();

        // Assert
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_zero_rounds_are_rejected() {
        // Arrange
        let no_comm = PartitionConfig {
            comm_rounds: 0,
            ..PartitionConfig::default()
        };
        let no_label = PartitionConfig {
            label_iterations: 0,
            ..PartitionConfig::default()
        };

        // Act and Assert
        assert!(matches!(
            no_comm.validate(),
            Err(Error::Configuration { .. })
        ));
        assert!(matches!(
            no_label.validate(),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_capacity_with_zero_tolerance_is_the_ideal_weight() {
        // Arrange
        let config = PartitionConfig {
            k: 2,
            epsilon: 0.0,
            ..PartitionConfig::default()
        };

        // Act
        let capacity = config.upper_bound_capacity(4);

        // Assert
        assert_eq!(capacity, 2);
    }

    #[test]
    fn test_capacity_rounds_the_ideal_weight_up_first() {
        // Arrange
        let config = PartitionConfig {
            k: 3,
            epsilon: 0.03,
            ..PartitionConfig::default()
        };

        // Act
        let capacity = config.upper_bound_capacity(10);

        // Assert
        // ceil(10 / 3) = 4, floor(1.03 * 4) = 4.
        assert_eq!(capacity, 4);
    }

    #[test]
    fn test_capacity_admits_an_even_split() {
        // Arrange
        let config = PartitionConfig {
            k: 7,
            epsilon: 0.0,
            ..PartitionConfig::default()
        };

        // Act and Assert
        for total in 1..100 {
            let capacity = config.upper_bound_capacity(total);
            assert!(capacity as f64 * config.k as f64 >= total as f64);
        }
    }
}
