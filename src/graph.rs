// This file has code from https://github.com/LIHPC-Computational-Geometry/coupe

use std::fmt;
use std::iter::{Cloned, Zip};
use std::mem;
use std::ops::Range;
use std::slice::Iter;

use ::sprs::{CsMat, TriMat};
use rustc_hash::FxHashMap;

use crate::comm::{Communicator, MessageTag};
use crate::{EdgeWeight, Error, NodeId, NodeWeight, PartitionId};

/// Arithmetic mapping of contiguous global-id ranges onto processes.
///
/// With `chunk = ceil(total / ranks)`, process r owns the ids in
/// `[r * chunk, min((r + 1) * chunk, total))`. Ownership is a pure function
/// of the id, so processes never exchange routing tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexDistribution {
    total: NodeId,
    ranks: usize,
}

impl VertexDistribution {
    pub fn new(total: NodeId, ranks: usize) -> Self {
        assert!(ranks > 0, "a distribution needs at least one process");
        Self { total, ranks }
    }

    /// The number of vertices in the whole graph.
    pub fn total_vertices(&self) -> NodeId {
        self.total
    }

    /// The number of processes the graph is sharded over.
    pub fn ranks(&self) -> usize {
        self.ranks
    }

    fn chunk(&self) -> NodeId {
        self.total.div_ceil(self.ranks as NodeId).max(1)
    }

    /// The half-open global-id range owned by the given process.
    pub fn range_of(&self, rank: usize) -> Range<NodeId> {
        debug_assert!(rank < self.ranks);
        let chunk = self.chunk();
        let first = (rank as NodeId * chunk).min(self.total);
        let last = (rank as NodeId + 1).saturating_mul(chunk).min(self.total);
        first..last
    }

    /// The process owning the given global id.
    pub fn owner_of(&self, id: NodeId) -> usize {
        debug_assert!(id < self.total);
        ((id / self.chunk()) as usize).min(self.ranks - 1)
    }
}

/// Assembles one process's shard of a distributed graph.
///
/// The loader declares weights and outgoing edges for the vertices this
/// process owns; [`GraphBuilder::finish`] then registers every referenced
/// remote vertex as a ghost and agrees on boundary orderings with the peers.
pub struct GraphBuilder {
    distribution: VertexDistribution,
    range: Range<NodeId>,
    weights: Vec<NodeWeight>,
    // (local row, global target, edge weight)
    triplets: Vec<(usize, NodeId, EdgeWeight)>,
}

impl GraphBuilder {
    pub fn new(global_vertices: NodeId, comm: &impl Communicator) -> Self {
        let distribution = VertexDistribution::new(global_vertices, comm.size());
        let range = distribution.range_of(comm.rank());
        let local_n = (range.end - range.start) as usize;
        Self {
            distribution,
            range,
            weights: vec![1; local_n],
            triplets: Vec::new(),
        }
    }

    /// The global-id range this process owns.
    pub fn local_range(&self) -> Range<NodeId> {
        self.range.clone()
    }

    /// Sets the weight of an owned vertex. Weights below 1 are lifted to 1.
    pub fn set_vertex_weight(&mut self, id: NodeId, weight: NodeWeight) -> Result<(), Error> {
        let row = self.local_row(id)?;
        self.weights[row] = weight.max(1);
        Ok(())
    }

    /// Declares an edge going out of an owned vertex. Declaring the same
    /// pair twice accumulates the weights.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId, weight: EdgeWeight) -> Result<(), Error> {
        let row = self.local_row(source)?;
        if target >= self.distribution.total_vertices() {
            return Err(Error::UnknownGlobalId { id: target });
        }
        self.triplets.push((row, target, weight.max(1)));
        Ok(())
    }

    fn local_row(&self, id: NodeId) -> Result<usize, Error> {
        if id >= self.distribution.total_vertices() {
            return Err(Error::UnknownGlobalId { id });
        }
        if !self.range.contains(&id) {
            return Err(Error::NonLocalVertex { id });
        }
        Ok((id - self.range.start) as usize)
    }

    /// Builds the shard: assigns ghost slots, compresses the adjacency into
    /// CSR form and runs the one-time registration exchange that fixes the
    /// boundary orderings between every pair of processes.
    pub fn finish(self, comm: &impl Communicator) -> Result<DistributedGraph, Error> {
        let rank = comm.rank();
        let size = comm.size();
        let local_n = self.weights.len();

        // Ghost slots are assigned in ascending global-id order, which makes
        // the per-owner registration lists sorted as well.
        let mut ghost_global: Vec<NodeId> = self
            .triplets
            .iter()
            .map(|&(_, target, _)| target)
            .filter(|target| !self.range.contains(target))
            .collect();
        ghost_global.sort_unstable();
        ghost_global.dedup();
        let ghost_n = ghost_global.len();
        let mut ghost_slots =
            FxHashMap::with_capacity_and_hasher(ghost_n, Default::default());
        for (offset, &gid) in ghost_global.iter().enumerate() {
            ghost_slots.insert(gid, local_n + offset);
        }
        let ghost_owner: Vec<usize> = ghost_global
            .iter()
            .map(|&gid| self.distribution.owner_of(gid))
            .collect();

        let mut adjacency =
            TriMat::with_capacity((local_n, local_n + ghost_n), self.triplets.len());
        for &(row, target, weight) in &self.triplets {
            let column = if self.range.contains(&target) {
                (target - self.range.start) as usize
            } else {
                ghost_slots[&target]
            };
            adjacency.add_triplet(row, column, weight);
        }
        let adjacency: CsMat<EdgeWeight> = adjacency.to_csr();

        // Tell each owner which of its vertices we mirror. The owner keeps
        // the list as its send order; our ascending registration order is the
        // matching receive order, so no indices ever travel with the labels.
        let mut referenced: Vec<Vec<NodeId>> = vec![Vec::new(); size];
        for (offset, &gid) in ghost_global.iter().enumerate() {
            referenced[ghost_owner[offset]].push(gid);
        }
        for peer in 0..size {
            if peer != rank {
                comm.send(peer, MessageTag::GhostRegistration, referenced[peer].clone());
            }
        }
        let mut send_lists: Vec<Vec<usize>> = vec![Vec::new(); size];
        for peer in 0..size {
            if peer == rank {
                continue;
            }
            let wanted = comm.recv(peer, MessageTag::GhostRegistration);
            send_lists[peer] = wanted
                .iter()
                .map(|&gid| {
                    debug_assert!(self.range.contains(&gid));
                    (gid - self.range.start) as usize
                })
                .collect();
        }
        let mut recv_lists: Vec<Vec<usize>> = vec![Vec::new(); size];
        for (offset, &owner) in ghost_owner.iter().enumerate() {
            recv_lists[owner].push(local_n + offset);
        }

        let local_weight: NodeWeight = self.weights.iter().sum();
        let totals = comm.all_reduce_sum(&[
            local_n as u64,
            adjacency.nnz() as u64,
            local_weight,
        ]);
        debug_assert_eq!(totals[0], self.distribution.total_vertices());

        let mut weights = self.weights;
        // Ghost weights start at 1 and are overwritten by the first boundary
        // synchronization.
        weights.resize(local_n + ghost_n, 1);

        Ok(DistributedGraph {
            distribution: self.distribution,
            first_global: self.range.start,
            adjacency,
            labels: vec![0; local_n + ghost_n],
            weights,
            ghost_global,
            ghost_slots,
            send_lists,
            recv_lists,
            global_edges: totals[1],
            global_weight: totals[2],
        })
    }
}

/// One process's shard of a vertex-sharded graph.
///
/// Slots `0..local_vertex_count()` are the owned vertices in ascending
/// global-id order; the slots after them are ghosts, cached copies of remote
/// vertices that local edges point at. The adjacency is a rectangular CSR
/// matrix with one row per owned vertex and one column per slot.
pub struct DistributedGraph {
    distribution: VertexDistribution,
    first_global: NodeId,
    adjacency: CsMat<EdgeWeight>,
    // Indexed by slot: owned rows first, then ghosts.
    labels: Vec<PartitionId>,
    weights: Vec<NodeWeight>,
    // Indexed by slot minus local_vertex_count(). Ghost owners are not
    // stored; they stay recomputable from the id arithmetic.
    ghost_global: Vec<NodeId>,
    ghost_slots: FxHashMap<NodeId, usize>,
    // Per peer: local rows whose labels the peer mirrors, in the peer's
    // registration order.
    send_lists: Vec<Vec<usize>>,
    // Per peer: ghost slots owned by the peer, in our registration order.
    recv_lists: Vec<Vec<usize>>,
    global_edges: u64,
    global_weight: NodeWeight,
}

impl DistributedGraph {
    /// The number of vertices owned by this process.
    pub fn local_vertex_count(&self) -> usize {
        self.adjacency.rows()
    }

    /// The number of remote vertices cached as ghosts on this process.
    pub fn ghost_vertex_count(&self) -> usize {
        self.ghost_global.len()
    }

    /// The number of vertices in the whole graph.
    pub fn global_vertex_count(&self) -> NodeId {
        self.distribution.total_vertices()
    }

    /// The number of adjacency entries stored on this process.
    pub fn local_edge_count(&self) -> usize {
        self.adjacency.nnz()
    }

    /// The number of adjacency entries over all processes.
    pub fn global_edge_count(&self) -> u64 {
        self.global_edges
    }

    /// The summed vertex weight over all processes.
    pub fn global_vertex_weight(&self) -> NodeWeight {
        self.global_weight
    }

    pub fn distribution(&self) -> &VertexDistribution {
        &self.distribution
    }

    /// Whether this process owns the given global id.
    pub fn is_local(&self, id: NodeId) -> bool {
        id >= self.first_global
            && id < self.first_global + self.local_vertex_count() as NodeId
    }

    /// The process owning the given global id.
    pub fn owner_of(&self, id: NodeId) -> usize {
        self.distribution.owner_of(id)
    }

    /// Maps a global id to its slot, local or ghost.
    pub fn resolve(&self, id: NodeId) -> Result<usize, Error> {
        if self.is_local(id) {
            return Ok((id - self.first_global) as usize);
        }
        match self.ghost_slots.get(&id) {
            Some(&slot) => Ok(slot),
            None => Err(Error::UnknownGlobalId { id }),
        }
    }

    /// The global id behind a slot.
    pub fn global_id_of(&self, slot: usize) -> NodeId {
        let local_n = self.local_vertex_count();
        if slot < local_n {
            self.first_global + slot as NodeId
        } else {
            self.ghost_global[slot - local_n]
        }
    }

    /// Whether a slot refers to a ghost rather than an owned vertex.
    pub fn is_ghost(&self, slot: usize) -> bool {
        slot >= self.local_vertex_count()
    }

    /// An iterator over the `(slot, edge weight)` pairs adjacent to an owned
    /// vertex.
    pub fn neighbors_of(
        &self,
        vertex: usize,
    ) -> Zip<Cloned<Iter<'_, usize>>, Cloned<Iter<'_, EdgeWeight>>> {
        let (indices, data) = self.adjacency.outer_view(vertex).unwrap().into_raw_storage();
        indices.iter().cloned().zip(data.iter().cloned())
    }

    /// The number of adjacency entries of an owned vertex.
    pub fn degree_of(&self, vertex: usize) -> usize {
        self.adjacency.outer_view(vertex).unwrap().nnz()
    }

    /// The label currently stored for a slot. For ghosts this is the owner's
    /// label as of the last boundary synchronization.
    pub fn get_label(&self, slot: usize) -> PartitionId {
        self.labels[slot]
    }

    /// Relabels an owned vertex.
    pub fn set_label(&mut self, slot: usize, label: PartitionId) -> Result<(), Error> {
        if slot >= self.local_vertex_count() {
            return Err(Error::InvalidVertex { vertex: slot });
        }
        self.labels[slot] = label;
        Ok(())
    }

    /// The weight stored for a slot. Ghost weights are valid once the first
    /// boundary synchronization has run.
    pub fn vertex_weight(&self, slot: usize) -> NodeWeight {
        self.weights[slot]
    }

    /// An iterator over `(global id, label)` for the owned vertices, in
    /// ascending global-id order.
    pub fn labeled_vertices(&self) -> impl Iterator<Item = (NodeId, PartitionId)> + '_ {
        let first = self.first_global;
        self.labels[..self.local_vertex_count()]
            .iter()
            .enumerate()
            .map(move |(row, &label)| (first + row as NodeId, label))
    }

    pub(crate) fn send_list(&self, peer: usize) -> &[usize] {
        &self.send_lists[peer]
    }

    pub(crate) fn recv_list_len(&self, peer: usize) -> usize {
        self.recv_lists[peer].len()
    }

    /// Writes one received boundary wave into the ghost entries registered
    /// from `peer`, starting at position `offset` of the registration order.
    pub(crate) fn write_ghost_entries(
        &mut self,
        peer: usize,
        offset: usize,
        payload: &[u64],
        with_weights: bool,
    ) {
        let step = if with_weights { 2 } else { 1 };
        debug_assert_eq!(payload.len() % step, 0);
        for (index, entry) in payload.chunks_exact(step).enumerate() {
            let slot = self.recv_lists[peer][offset + index];
            self.labels[slot] = entry[0] as PartitionId;
            if with_weights {
                self.weights[slot] = entry[1];
            }
        }
    }

    /// A rough account of this shard's memory footprint.
    pub fn report_memory_usage(&self) -> MemoryUsage {
        let local_n = self.local_vertex_count();
        let nnz = self.adjacency.nnz();
        let adjacency_bytes = (local_n + 1) * mem::size_of::<usize>()
            + nnz * (mem::size_of::<usize>() + mem::size_of::<EdgeWeight>());
        let slot_bytes = self.labels.len() * mem::size_of::<PartitionId>()
            + self.weights.len() * mem::size_of::<NodeWeight>();
        let ghost_bytes = self.ghost_global.len()
            * (mem::size_of::<NodeId>() * 2 + mem::size_of::<usize>());
        let boundary_bytes = self
            .send_lists
            .iter()
            .chain(&self.recv_lists)
            .map(|list| list.len() * mem::size_of::<usize>())
            .sum::<usize>();
        MemoryUsage {
            local_vertices: local_n,
            ghost_vertices: self.ghost_global.len(),
            adjacency_entries: nnz,
            bytes: adjacency_bytes + slot_bytes + ghost_bytes + boundary_bytes,
        }
    }
}

/// Per-process memory accounting, reported by the driver at load time.
#[derive(Clone, Copy, Debug)]
pub struct MemoryUsage {
    pub local_vertices: usize,
    pub ghost_vertices: usize,
    pub adjacency_entries: usize,
    pub bytes: usize,
}

impl fmt::Display for MemoryUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} local vertices, {} ghosts, {} adjacency entries, about {} bytes",
            self.local_vertices, self.ghost_vertices, self.adjacency_entries, self.bytes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalTopology;

    #[test]
    fn test_ranges_partition_the_id_space() {
        // Arrange
        let distribution = VertexDistribution::new(10, 4);

        // Act and Assert
        assert_eq!(distribution.range_of(0), 0..3);
        assert_eq!(distribution.range_of(1), 3..6);
        assert_eq!(distribution.range_of(2), 6..9);
        assert_eq!(distribution.range_of(3), 9..10);
        for id in 0..10 {
            let owner = distribution.owner_of(id);
            assert!(distribution.range_of(owner).contains(&id));
        }
    }

    #[test]
    fn test_more_ranks_than_vertices_leaves_trailing_ranks_empty() {
        // Arrange
        let distribution = VertexDistribution::new(3, 8);

        // Act and Assert
        for rank in 0..3 {
            assert_eq!(distribution.range_of(rank).count(), 1);
        }
        for rank in 3..8 {
            assert!(distribution.range_of(rank).is_empty());
        }
    }

    #[test]
    fn test_single_shard_stores_the_whole_graph() {
        // Arrange
        let graph = LocalTopology::run(1, |comm| {
            let mut builder = GraphBuilder::new(4, &comm);
            builder.set_vertex_weight(1, 5).unwrap();
            builder.add_edge(0, 1, 1).unwrap();
            builder.add_edge(1, 0, 1).unwrap();
            builder.add_edge(1, 2, 3).unwrap();
            builder.add_edge(2, 1, 3).unwrap();
            builder.finish(&comm).unwrap()
        })
        .pop()
        .unwrap();

        // Assert
        assert_eq!(graph.local_vertex_count(), 4);
        assert_eq!(graph.ghost_vertex_count(), 0);
        assert_eq!(graph.global_vertex_count(), 4);
        assert_eq!(graph.local_edge_count(), 4);
        assert_eq!(graph.global_edge_count(), 4);
        assert_eq!(graph.global_vertex_weight(), 5 + 3);
        assert_eq!(graph.vertex_weight(1), 5);
        assert_eq!(graph.vertex_weight(3), 1);
        assert_eq!(graph.degree_of(1), 2);
        assert_eq!(
            graph.neighbors_of(1).collect::<Vec<_>>(),
            vec![(0, 1), (2, 3)],
        );
    }

    #[test]
    fn test_duplicate_edges_accumulate_their_weights() {
        // Arrange
        let graph = LocalTopology::run(1, |comm| {
            let mut builder = GraphBuilder::new(2, &comm);
            builder.add_edge(0, 1, 2).unwrap();
            builder.add_edge(0, 1, 3).unwrap();
            builder.finish(&comm).unwrap()
        })
        .pop()
        .unwrap();

        // Assert
        assert_eq!(graph.local_edge_count(), 1);
        assert_eq!(graph.neighbors_of(0).collect::<Vec<_>>(), vec![(1, 5)]);
    }

    #[test]
    fn test_builder_rejects_foreign_sources_and_unknown_ids() {
        LocalTopology::run(2, |comm| {
            // Arrange
            let mut builder = GraphBuilder::new(4, &comm);
            let foreign = if comm.rank() == 0 { 2 } else { 0 };

            // Act and Assert
            assert!(matches!(
                builder.add_edge(foreign, 1, 1),
                Err(Error::NonLocalVertex { .. }),
            ));
            assert!(matches!(
                builder.set_vertex_weight(foreign, 2),
                Err(Error::NonLocalVertex { .. }),
            ));
            let owned = builder.local_range().start;
            assert!(matches!(
                builder.add_edge(owned, 9, 1),
                Err(Error::UnknownGlobalId { id: 9 }),
            ));
            builder.finish(&comm).unwrap()
        });
    }

    #[test]
    fn test_two_shards_register_ghosts_symmetrically() {
        // Arrange: the path 0 - 1 - 2 - 3 split across two processes.
        let graphs = LocalTopology::run(2, |comm| {
            let mut builder = GraphBuilder::new(4, &comm);
            if comm.rank() == 0 {
                builder.add_edge(0, 1, 1).unwrap();
                builder.add_edge(1, 0, 1).unwrap();
                builder.add_edge(1, 2, 1).unwrap();
            } else {
                builder.add_edge(2, 1, 1).unwrap();
                builder.add_edge(2, 3, 1).unwrap();
                builder.add_edge(3, 2, 1).unwrap();
            }
            builder.finish(&comm).unwrap()
        });

        // Assert
        for graph in &graphs {
            assert_eq!(graph.local_vertex_count(), 2);
            assert_eq!(graph.ghost_vertex_count(), 1);
            assert_eq!(graph.global_edge_count(), 6);
        }
        // Rank 0 mirrors vertex 2, rank 1 mirrors vertex 1; each peer agreed
        // to send the matching row.
        assert_eq!(graphs[0].global_id_of(2), 2);
        assert_eq!(graphs[1].global_id_of(2), 1);
        assert_eq!(graphs[0].send_list(1), &[1]);
        assert_eq!(graphs[1].send_list(0), &[0]);
        assert_eq!(graphs[0].recv_list_len(1), 1);
        assert_eq!(graphs[1].recv_list_len(0), 1);
        // The owner of a ghost is recovered from its global id alone.
        assert_eq!(graphs[0].owner_of(graphs[0].global_id_of(2)), 1);
        assert_eq!(graphs[1].owner_of(graphs[1].global_id_of(2)), 0);
    }

    #[test]
    fn test_resolve_distinguishes_local_ghost_and_unknown() {
        // Arrange
        let graphs = LocalTopology::run(2, |comm| {
            let mut builder = GraphBuilder::new(6, &comm);
            if comm.rank() == 0 {
                builder.add_edge(2, 3, 1).unwrap();
            } else {
                builder.add_edge(3, 2, 1).unwrap();
            }
            builder.finish(&comm).unwrap()
        });

        // Assert
        let rank0 = &graphs[0];
        assert_eq!(rank0.resolve(1).unwrap(), 1);
        assert_eq!(rank0.resolve(3).unwrap(), 3);
        assert!(rank0.is_ghost(rank0.resolve(3).unwrap()));
        assert!(matches!(
            rank0.resolve(5),
            Err(Error::UnknownGlobalId { id: 5 }),
        ));
    }

    #[test]
    fn test_labels_are_writable_for_owned_vertices_only() {
        // Arrange
        let mut graph = LocalTopology::run(2, |comm| {
            let mut builder = GraphBuilder::new(4, &comm);
            let row = builder.local_range().start;
            let ghost = (row + 2) % 4;
            builder.add_edge(row, ghost, 1).unwrap();
            builder.finish(&comm).unwrap()
        })
        .pop()
        .unwrap();

        // Act
        let local = graph.set_label(0, 1);
        let ghost = graph.set_label(2, 1);

        // Assert
        assert!(local.is_ok());
        assert_eq!(graph.get_label(0), 1);
        assert!(matches!(ghost, Err(Error::InvalidVertex { vertex: 2 })));
    }

    #[test]
    fn test_labeled_vertices_walk_the_owned_range_in_order() {
        // Arrange
        let graphs = LocalTopology::run(2, |comm| {
            let mut builder = GraphBuilder::new(5, &comm);
            let range = builder.local_range();
            builder
                .add_edge(range.start, (range.start + 1) % 5, 1)
                .unwrap();
            let mut graph = builder.finish(&comm).unwrap();
            for row in 0..graph.local_vertex_count() {
                graph.set_label(row, comm.rank()).unwrap();
            }
            graph
        });

        // Act
        let pairs: Vec<_> = graphs
            .iter()
            .flat_map(|graph| graph.labeled_vertices())
            .collect();

        // Assert
        assert_eq!(pairs, vec![(0, 0), (1, 0), (2, 0), (3, 1), (4, 1)]);
    }

    #[test]
    fn test_memory_report_counts_the_shard() {
        // Arrange
        let graph = LocalTopology::run(1, |comm| {
            let mut builder = GraphBuilder::new(3, &comm);
            builder.add_edge(0, 1, 1).unwrap();
            builder.add_edge(1, 0, 1).unwrap();
            builder.finish(&comm).unwrap()
        })
        .pop()
        .unwrap();

        // Act
        let report = graph.report_memory_usage();

        // Assert
        assert_eq!(report.local_vertices, 3);
        assert_eq!(report.ghost_vertices, 0);
        assert_eq!(report.adjacency_entries, 2);
        assert!(report.bytes > 0);
        assert!(format!("{report}").contains("3 local vertices"));
    }
}
