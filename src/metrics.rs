// This file has code from https://github.com/LIHPC-Computational-Geometry/coupe
use num_traits::ToPrimitive;
use rayon::iter::IntoParallelIterator;
use rayon::iter::ParallelIterator as _;

use crate::comm::Communicator;
use crate::graph::DistributedGraph;
use crate::{EdgeWeight, NodeWeight};

/// Calculates the global weight of each partition.
///
/// Labels outside `0..num_parts` are skipped rather than counted, so the
/// function stays total on arbitrary labelings.
pub fn partition_loads(
    num_parts: usize,
    graph: &DistributedGraph,
    comm: &impl Communicator,
) -> Vec<NodeWeight> {
    let mut local = vec![0; num_parts];
    for row in 0..graph.local_vertex_count() {
        let label = graph.get_label(row);
        if label < num_parts {
            local[label] += graph.vertex_weight(row);
        }
    }
    comm.all_reduce_sum(&local)
}

/// The total weight of edges whose endpoints carry different labels.
///
/// Each process scores only the edges whose lower-global-id endpoint it
/// owns, so every edge contributes exactly once no matter how the graph is
/// sharded; the per-process sums are then reduced. The adjacency is assumed
/// to be symmetric, and ghost labels must be synchronized beforehand.
pub fn edge_cut(graph: &DistributedGraph, comm: &impl Communicator) -> EdgeWeight {
    let local: EdgeWeight = (0..graph.local_vertex_count())
        .into_par_iter()
        .map(|vertex| {
            let vertex_id = graph.global_id_of(vertex);
            let vertex_label = graph.get_label(vertex);
            graph
                .neighbors_of(vertex)
                .filter(|&(slot, _)| vertex_id < graph.global_id_of(slot))
                .filter(|&(slot, _)| graph.get_label(slot) != vertex_label)
                .map(|(_slot, edge_weight)| edge_weight)
                .sum::<EdgeWeight>()
        })
        .sum();
    comm.all_reduce_sum(&[local])[0]
}

/// The heaviest partition weight relative to the ideal `ceil(total / k)`.
///
/// A perfectly balanced partitioning scores 1.0; a run that honors the
/// capacity bound scores at most `1 + epsilon`.
pub fn balance(num_parts: usize, graph: &DistributedGraph, comm: &impl Communicator) -> f64 {
    if num_parts == 0 {
        return 0.0;
    }
    let loads = partition_loads(num_parts, graph, comm);
    let ideal = (graph.global_vertex_weight().to_f64().unwrap_or(0.0)
        / num_parts.to_f64().unwrap_or(1.0))
    .ceil();
    if ideal == 0.0 {
        return 0.0;
    }
    let heaviest = loads.iter().max().copied().unwrap_or(0);
    heaviest.to_f64().unwrap_or(0.0) / ideal
}

/// Global `(boundary, internal)` adjacency-entry counts, where a boundary
/// entry points at a ghost. Reported by drivers as a sharding quality hint.
pub fn edge_locality(graph: &DistributedGraph, comm: &impl Communicator) -> (u64, u64) {
    let mut boundary = 0;
    let mut internal = 0;
    for vertex in 0..graph.local_vertex_count() {
        for (slot, _) in graph.neighbors_of(vertex) {
            if graph.is_ghost(slot) {
                boundary += 1;
            } else {
                internal += 1;
            }
        }
    }
    let totals = comm.all_reduce_sum(&[boundary, internal]);
    (totals[0], totals[1])
}
