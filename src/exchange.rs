use crate::comm::{Communicator, MessageTag};
use crate::graph::DistributedGraph;

/// Ships boundary labels between owning and referencing processes.
///
/// Every synchronization sends each peer's boundary in `comm_rounds` waves of
/// near-equal size, so peak message size is bounded by the boundary length
/// divided by the wave count. Both sides slice the agreed registration order
/// with the same arithmetic, which is what lets the payloads stay bare label
/// words without any vertex ids attached.
pub struct BoundaryExchange {
    comm_rounds: usize,
    weights_synced: bool,
}

impl BoundaryExchange {
    pub fn new(comm_rounds: usize) -> Self {
        Self {
            comm_rounds: comm_rounds.max(1),
            weights_synced: false,
        }
    }

    /// Brings every ghost entry up to its owner's state as of this call.
    ///
    /// The first synchronization interleaves vertex weights with the labels;
    /// weights never change afterwards, so later calls send labels only.
    pub fn synchronize(&mut self, graph: &mut DistributedGraph, comm: &impl Communicator) {
        let with_weights = !self.weights_synced;
        let step = if with_weights { 2 } else { 1 };
        let rank = comm.rank();
        let size = comm.size();
        let waves = self.comm_rounds;

        for wave in 0..waves {
            for peer in 0..size {
                if peer == rank {
                    continue;
                }
                let rows = wave_slice(graph.send_list(peer), waves, wave);
                if rows.is_empty() {
                    continue;
                }
                let mut payload = Vec::with_capacity(rows.len() * step);
                for &row in rows {
                    payload.push(graph.get_label(row) as u64);
                    if with_weights {
                        payload.push(graph.vertex_weight(row));
                    }
                }
                comm.send(peer, MessageTag::BoundaryData, payload);
            }
        }

        for peer in 0..size {
            if peer == rank {
                continue;
            }
            let total = graph.recv_list_len(peer);
            for wave in 0..waves {
                let (start, end) = wave_bounds(total, waves, wave);
                if start == end {
                    continue;
                }
                let payload = comm.recv(peer, MessageTag::BoundaryData);
                debug_assert_eq!(payload.len(), (end - start) * step);
                graph.write_ghost_entries(peer, start, &payload, with_weights);
            }
        }

        self.weights_synced = true;
    }
}

fn wave_bounds(total: usize, waves: usize, wave: usize) -> (usize, usize) {
    let chunk = total.div_ceil(waves.max(1)).max(1);
    let start = wave.saturating_mul(chunk).min(total);
    let end = ((wave + 1).saturating_mul(chunk)).min(total);
    (start, end)
}

fn wave_slice<'a>(list: &'a [usize], waves: usize, wave: usize) -> &'a [usize] {
    let (start, end) = wave_bounds(list.len(), waves, wave);
    &list[start..end]
}
