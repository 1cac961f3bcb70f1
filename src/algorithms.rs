// This file has code from https://github.com/LIHPC-Computational-Geometry/coupe
mod label_propagation;
mod random_choices;

pub use label_propagation::{DistributedPartitioner, PartitionerPhase, RoundOutcome, RoundStats};
pub use random_choices::RandomChoiceTable;
