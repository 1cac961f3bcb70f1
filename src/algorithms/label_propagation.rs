use log::debug;

use super::random_choices::RandomChoiceTable;
use crate::comm::Communicator;
use crate::config::{ConvergenceScope, InitialPartition, PartitionConfig};
use crate::exchange::BoundaryExchange;
use crate::graph::DistributedGraph;
use crate::{EdgeWeight, Error, NodeWeight, PartitionId};

/// Where a partitioning run currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionerPhase {
    /// Constructed and validated; labels not assigned yet.
    Initial,
    /// Improvement rounds are running.
    Rounds,
    /// The run converged or hit the round cap; further rounds are allowed
    /// and leave a converged labeling unchanged.
    Terminal,
}

/// What one round did.
#[derive(Clone, Copy, Debug)]
pub struct RoundOutcome {
    /// Zero-based index of the round that just ran.
    pub round: usize,
    /// Vertices relabeled on this process.
    pub moved_local: u64,
    /// Vertices relabeled over all processes.
    pub moved_global: u64,
    /// Whether the stop criterion was met.
    pub converged: bool,
}

/// Aggregate statistics of a whole run.
#[derive(Clone, Copy, Debug)]
pub struct RoundStats {
    pub rounds: usize,
    pub total_moved: u64,
    pub final_moved: u64,
    pub converged: bool,
}

/// Distributed label propagation under a balance constraint.
///
/// Each round first refreshes the ghost layer, then sweeps the owned
/// vertices in slot order: a vertex adopts the label with the heaviest
/// support among its neighbors, but only if that support strictly beats the
/// support of its current label. Sticking with the current label on a tie
/// is what makes a converged labeling a fixed point. Relabels apply
/// immediately, so later vertices of the same sweep see them.
///
/// The balance constraint works on stale global weights, refreshed once per
/// round. To keep processes from overshooting a partition's capacity
/// together, each process may move at most `headroom / process count` weight
/// into a partition per round; the per-process inflows then sum to at most
/// the real headroom no matter how the estimates lag.
pub struct DistributedPartitioner {
    config: PartitionConfig,
    choices: RandomChoiceTable,
    exchange: BoundaryExchange,
    phase: PartitionerPhase,
    round: usize,
    upper_bound: NodeWeight,
    // Global per-partition weights as of the last round boundary.
    block_weights: Vec<NodeWeight>,
    // Net local weight change per partition since the last refresh.
    block_deltas: Vec<i64>,
    // Weight this process may still move into each partition this round.
    inflow_budgets: Vec<NodeWeight>,
    // Scratch: weighted support per label, zeroed between vertices.
    support: Vec<EdgeWeight>,
    // Scratch: labels touched by the current vertex, first-seen order.
    touched: Vec<PartitionId>,
    // Scratch: labels tied for the heaviest support.
    candidates: Vec<PartitionId>,
}

impl DistributedPartitioner {
    /// Validates the configuration and prepares a run.
    pub fn new(config: PartitionConfig, comm: &impl Communicator) -> Result<Self, Error> {
        config.validate()?;
        let choices = RandomChoiceTable::generate(&config, comm.rank(), comm.size());
        let exchange = BoundaryExchange::new(config.comm_rounds);
        let k = config.k;
        Ok(Self {
            config,
            choices,
            exchange,
            phase: PartitionerPhase::Initial,
            round: 0,
            upper_bound: 0,
            block_weights: vec![0; k],
            block_deltas: vec![0; k],
            inflow_budgets: vec![0; k],
            support: vec![0; k],
            touched: Vec::new(),
            candidates: Vec::new(),
        })
    }

    pub fn phase(&self) -> PartitionerPhase {
        self.phase
    }

    /// The number of rounds run so far.
    pub fn round(&self) -> usize {
        self.round
    }

    /// The heaviest weight any partition may reach in this run.
    pub fn upper_bound(&self) -> NodeWeight {
        self.upper_bound
    }

    /// Assigns initial labels and fixes the capacity bound.
    ///
    /// Fails before anything runs if the graph was sharded for a different
    /// process count or existing labels do not fit the partition count.
    pub fn initialize(
        &mut self,
        graph: &mut DistributedGraph,
        comm: &impl Communicator,
    ) -> Result<(), Error> {
        if graph.distribution().ranks() != comm.size() {
            return Err(Error::ProcessCountMismatch {
                expected: graph.distribution().ranks(),
                actual: comm.size(),
            });
        }
        self.upper_bound = self.config.upper_bound_capacity(graph.global_vertex_count());
        match self.config.initial_partition {
            InitialPartition::RangeSplit => {
                // Contiguous blocks of near-equal id count; every process
                // computes the same mapping without communicating.
                let span = graph
                    .global_vertex_count()
                    .div_ceil(self.config.k as u64)
                    .max(1);
                for row in 0..graph.local_vertex_count() {
                    let label = ((graph.global_id_of(row) / span) as PartitionId)
                        .min(self.config.k - 1);
                    graph.set_label(row, label)?;
                }
            }
            InitialPartition::FromExistingLabels => {
                for row in 0..graph.local_vertex_count() {
                    if graph.get_label(row) >= self.config.k {
                        return Err(Error::Configuration {
                            detail: "existing labels exceed the partition count",
                        });
                    }
                }
            }
        }
        self.phase = PartitionerPhase::Rounds;
        self.round = 0;
        Ok(())
    }

    /// Runs one round: ghost synchronization, weight refresh, local sweep
    /// and the convergence verdict. Ghost labels lag by one round by
    /// design; the sweep works on the snapshot this round's exchange
    /// produced.
    pub fn step_round(
        &mut self,
        graph: &mut DistributedGraph,
        comm: &impl Communicator,
    ) -> Result<RoundOutcome, Error> {
        if self.phase == PartitionerPhase::Initial {
            return Err(Error::Configuration {
                detail: "initialize must run before stepping rounds",
            });
        }
        self.exchange.synchronize(graph, comm);
        self.refresh_block_weights(graph, comm);
        let moved_local = self.sweep(graph)?;
        let outcome = self.judge_convergence(moved_local, graph, comm);
        debug!(
            "round {}: {} local moves, {} global moves",
            outcome.round, outcome.moved_local, outcome.moved_global,
        );
        self.round += 1;
        if outcome.converged || self.round >= self.config.label_iterations {
            self.phase = PartitionerPhase::Terminal;
        }
        Ok(outcome)
    }

    /// Drives initialization and rounds until convergence or the round cap,
    /// then brings the ghost layer up to the final labels.
    pub fn perform_partitioning(
        &mut self,
        graph: &mut DistributedGraph,
        comm: &impl Communicator,
    ) -> Result<RoundStats, Error> {
        self.initialize(graph, comm)?;
        let mut total_moved = 0;
        let mut final_moved = 0;
        let mut converged = false;
        while self.phase == PartitionerPhase::Rounds {
            let outcome = self.step_round(graph, comm)?;
            total_moved += outcome.moved_global;
            final_moved = outcome.moved_global;
            converged = outcome.converged;
        }
        self.finalize_labels(graph, comm);
        Ok(RoundStats {
            rounds: self.round,
            total_moved,
            final_moved,
            converged,
        })
    }

    /// Refreshes the ghost layer without sweeping. The last sweep of a run
    /// leaves ghost labels one round behind; callers driving rounds by hand
    /// run this before evaluating quality metrics.
    pub fn finalize_labels(&mut self, graph: &mut DistributedGraph, comm: &impl Communicator) {
        self.exchange.synchronize(graph, comm);
    }

    fn refresh_block_weights(&mut self, graph: &DistributedGraph, comm: &impl Communicator) {
        let mut local = vec![0u64; self.config.k];
        for row in 0..graph.local_vertex_count() {
            local[graph.get_label(row)] += graph.vertex_weight(row);
        }
        self.block_weights = comm.all_reduce_sum(&local);
        let ranks = comm.size() as u64;
        for block in 0..self.config.k {
            self.block_deltas[block] = 0;
            self.inflow_budgets[block] =
                self.upper_bound.saturating_sub(self.block_weights[block]) / ranks;
        }
    }

    fn sweep(&mut self, graph: &mut DistributedGraph) -> Result<u64, Error> {
        let mut moved = 0;
        for row in 0..graph.local_vertex_count() {
            self.touched.clear();
            for (slot, weight) in graph.neighbors_of(row) {
                let label = graph.get_label(slot);
                if self.support[label] == 0 {
                    self.touched.push(label);
                }
                self.support[label] += weight;
            }
            if self.touched.is_empty() {
                continue;
            }
            let current = graph.get_label(row);
            let current_support = self.support[current];
            let mut best = 0;
            for &label in &self.touched {
                best = best.max(self.support[label]);
            }
            let mut target = None;
            if best > current_support {
                self.candidates.clear();
                for &label in &self.touched {
                    if self.support[label] == best {
                        self.candidates.push(label);
                    }
                }
                let pick = self.choices.next_choice(row, self.round)
                    % self.candidates.len() as u64;
                target = Some(self.candidates[pick as usize]);
            }
            for &label in &self.touched {
                self.support[label] = 0;
            }
            if let Some(target) = target {
                let weight = graph.vertex_weight(row) as i64;
                // A stale-estimate veto: the chosen label simply keeps its
                // argmax status and the vertex retries next round.
                if self.block_deltas[target] + weight
                    <= self.inflow_budgets[target] as i64
                {
                    graph.set_label(row, target)?;
                    self.block_deltas[target] += weight;
                    self.block_deltas[current] -= weight;
                    moved += 1;
                }
            }
        }
        Ok(moved)
    }

    fn judge_convergence(
        &self,
        moved_local: u64,
        graph: &DistributedGraph,
        comm: &impl Communicator,
    ) -> RoundOutcome {
        match self.config.convergence {
            ConvergenceScope::Global => {
                let moved_global = comm.all_reduce_sum(&[moved_local])[0];
                let threshold =
                    self.config.stop_factor * graph.global_vertex_count() as f64;
                RoundOutcome {
                    round: self.round,
                    moved_local,
                    moved_global,
                    converged: (moved_global as f64) < threshold,
                }
            }
            ConvergenceScope::Local => {
                let local_n = graph.local_vertex_count();
                let fraction = if local_n == 0 {
                    0.0
                } else {
                    moved_local as f64 / local_n as f64
                };
                let votes =
                    comm.all_reduce_max(&[(fraction >= self.config.stop_factor) as u64]);
                let moved_global = comm.all_reduce_sum(&[moved_local])[0];
                RoundOutcome {
                    round: self.round,
                    moved_local,
                    moved_global,
                    converged: votes[0] == 0,
                }
            }
        }
    }
}
