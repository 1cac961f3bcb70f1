// This file has code from https://github.com/LIHPC-Computational-Geometry/coupe
pub mod algorithms;
pub mod comm;
pub mod config;
pub mod exchange;
pub mod graph;
pub mod io;
pub mod metrics;

use std::fmt;

// Global vertex identifiers are ordered so that ownership of an id is plain
// arithmetic on contiguous ranges; no process keeps a routing table.
pub type NodeId = u64;

// Vertex and edge weights are at least 1; the partitioner and the metrics
// only ever add them, so unsigned arithmetic stays exact.
pub type NodeWeight = u64;
pub type EdgeWeight = u64;

// A partition label in `0..k`.
pub type PartitionId = usize;

/// Common errors thrown by the distributed core.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The run configuration cannot produce a valid partitioning.
    Configuration { detail: &'static str },

    /// The graph was sharded for a different number of processes than are
    /// running.
    ProcessCountMismatch { expected: usize, actual: usize },

    /// A label mutation was attempted through a ghost reference. Ghost
    /// entries are only ever written by the boundary exchange.
    InvalidVertex { vertex: usize },

    /// Lookup of a global id that is neither locally owned nor ghosted here.
    UnknownGlobalId { id: NodeId },

    /// An edge was declared whose source vertex is owned by another process.
    NonLocalVertex { id: NodeId },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration { detail } => write!(f, "invalid configuration: {detail}"),
            Error::ProcessCountMismatch { expected, actual } => write!(
                f,
                "graph was sharded for {expected} processes but {actual} are running",
            ),
            Error::InvalidVertex { vertex } => {
                write!(f, "vertex slot {vertex} is not locally owned")
            }
            Error::UnknownGlobalId { id } => {
                write!(f, "global vertex id {id} has no local or ghost entry")
            }
            Error::NonLocalVertex { id } => {
                write!(f, "vertex {id} belongs to another process")
            }
        }
    }
}

impl std::error::Error for Error {}
