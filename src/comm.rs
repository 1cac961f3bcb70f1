use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use rustc_hash::FxHashMap;

/// Separates the message streams that flow between a pair of processes, so a
/// receiver can wait for one stream while others are in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageTag {
    /// Construction time: the sorted global ids a process ghosts from a peer.
    GhostRegistration,
    /// One wave of boundary labels (and, on the first exchange, weights).
    BoundaryData,
    /// Leaf-to-root leg of a reduction.
    Reduce,
    /// Root-to-leaf leg of a reduction or broadcast.
    Broadcast,
}

struct Envelope {
    src: usize,
    tag: MessageTag,
    payload: Vec<u64>,
}

/// Point-to-point transport plus the collectives the core needs.
///
/// The contract mirrors a blocking, reliable and ordered process group:
/// `send` never blocks, `recv` blocks until the matching message arrives,
/// and every process of the group takes part in every collective. All
/// payloads are flat `u64` words; callers do their own framing.
pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn send(&self, dest: usize, tag: MessageTag, payload: Vec<u64>);
    fn recv(&self, src: usize, tag: MessageTag) -> Vec<u64>;

    /// Element-wise sum over all processes; every process gets the result.
    fn all_reduce_sum(&self, values: &[u64]) -> Vec<u64>
    where
        Self: Sized,
    {
        reduce_and_broadcast(self, values, |acc, incoming| {
            for (a, b) in acc.iter_mut().zip(incoming) {
                *a += *b;
            }
        })
    }

    /// Element-wise maximum over all processes; every process gets the result.
    fn all_reduce_max(&self, values: &[u64]) -> Vec<u64>
    where
        Self: Sized,
    {
        reduce_and_broadcast(self, values, |acc, incoming| {
            for (a, b) in acc.iter_mut().zip(incoming) {
                *a = (*a).max(*b);
            }
        })
    }

    /// Blocks until every process has reached this call.
    fn barrier(&self)
    where
        Self: Sized,
    {
        self.all_reduce_sum(&[]);
    }
}

// Rank 0 folds the contributions in rank order and broadcasts the result, so
// every process sees the exact same bytes even for float-free reductions that
// would otherwise be order-sensitive.
fn reduce_and_broadcast<C: Communicator>(
    comm: &C,
    values: &[u64],
    fold: fn(&mut [u64], &[u64]),
) -> Vec<u64> {
    let size = comm.size();
    if size == 1 {
        return values.to_vec();
    }
    if comm.rank() == 0 {
        let mut acc = values.to_vec();
        for src in 1..size {
            let incoming = comm.recv(src, MessageTag::Reduce);
            debug_assert_eq!(incoming.len(), acc.len());
            fold(&mut acc, &incoming);
        }
        for dest in 1..size {
            comm.send(dest, MessageTag::Broadcast, acc.clone());
        }
        acc
    } else {
        comm.send(0, MessageTag::Reduce, values.to_vec());
        comm.recv(0, MessageTag::Broadcast)
    }
}

/// Runs a process group as threads of one program, one thread per rank,
/// wired pairwise with FIFO channels.
///
/// This stands in for a multi-process launcher: algorithm code only sees the
/// [`Communicator`] trait and cannot tell the difference.
pub struct LocalTopology;

impl LocalTopology {
    /// Executes `f` once per rank and returns the results in rank order.
    ///
    /// A panic inside any rank is resumed on the caller's thread once all
    /// ranks have been joined.
    pub fn run<T, F>(size: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(LocalEndpoint) -> T + Sync,
    {
        assert!(size > 0, "a process group needs at least one rank");
        let mut channels = Vec::with_capacity(size);
        for _ in 0..size {
            channels.push(unbounded::<Envelope>());
        }
        let senders: Vec<Sender<Envelope>> = channels.iter().map(|(tx, _)| tx.clone()).collect();
        let endpoints: Vec<LocalEndpoint> = channels
            .into_iter()
            .enumerate()
            .map(|(rank, (_, inbox))| LocalEndpoint {
                rank,
                size,
                peers: senders.clone(),
                inbox,
                stash: RefCell::new(FxHashMap::default()),
            })
            .collect();
        drop(senders);
        thread::scope(|scope| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|endpoint| {
                    let f = &f;
                    scope.spawn(move || f(endpoint))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(value) => value,
                    Err(payload) => panic::resume_unwind(payload),
                })
                .collect()
        })
    }
}

/// One rank's endpoint of a [`LocalTopology`].
pub struct LocalEndpoint {
    rank: usize,
    size: usize,
    peers: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    // Messages drained from the inbox before their matching recv call.
    stash: RefCell<FxHashMap<(usize, MessageTag), VecDeque<Vec<u64>>>>,
}

impl Communicator for LocalEndpoint {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, dest: usize, tag: MessageTag, payload: Vec<u64>) {
        let envelope = Envelope {
            src: self.rank,
            tag,
            payload,
        };
        // Channels are unbounded, so a send cannot deadlock; it only fails if
        // the peer already exited, which means the collective protocol was
        // broken on one side.
        self.peers[dest]
            .send(envelope)
            .expect("peer rank exited before the group finished");
    }

    fn recv(&self, src: usize, tag: MessageTag) -> Vec<u64> {
        if let Some(payload) = self
            .stash
            .borrow_mut()
            .get_mut(&(src, tag))
            .and_then(|queue| queue.pop_front())
        {
            return payload;
        }
        loop {
            let envelope = self
                .inbox
                .recv()
                .expect("all peer ranks exited before the group finished");
            if envelope.src == src && envelope.tag == tag {
                return envelope.payload;
            }
            self.stash
                .borrow_mut()
                .entry((envelope.src, envelope.tag))
                .or_default()
                .push_back(envelope.payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_rank_reduction_is_the_identity() {
        // Arrange and Act
        let results = LocalTopology::run(1, |comm| comm.all_reduce_sum(&[3, 5]));

        // Assert
        assert_eq!(results, vec![vec![3, 5]]);
    }

    #[test]
    fn test_messages_are_matched_by_source_and_tag() {
        // Arrange and Act
        let results = LocalTopology::run(2, |comm| {
            if comm.rank() == 0 {
                comm.send(1, MessageTag::BoundaryData, vec![10]);
                comm.send(1, MessageTag::GhostRegistration, vec![20]);
                vec![]
            } else {
                // Receive in the opposite order of sending; the stash keeps
                // the earlier message until it is asked for.
                let second = comm.recv(0, MessageTag::GhostRegistration);
                let first = comm.recv(0, MessageTag::BoundaryData);
                vec![first[0], second[0]]
            }
        });

        // Assert
        assert_eq!(results[1], vec![10, 20]);
    }

    #[test]
    fn test_same_tag_messages_keep_their_order() {
        // Arrange and Act
        let results = LocalTopology::run(2, |comm| {
            if comm.rank() == 0 {
                for wave in 0..4u64 {
                    comm.send(1, MessageTag::BoundaryData, vec![wave]);
                }
                vec![]
            } else {
                (0..4)
                    .map(|_| comm.recv(0, MessageTag::BoundaryData)[0])
                    .collect()
            }
        });

        // Assert
        assert_eq!(results[1], vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_all_ranks_see_the_same_sum() {
        // Arrange and Act
        let results = LocalTopology::run(4, |comm| {
            let rank = comm.rank() as u64;
            comm.all_reduce_sum(&[rank, 1])
        });

        // Assert: ranks 0 through 3 sum to 6, and each contributes a one.
        for result in results {
            assert_eq!(result, vec![6, 4]);
        }
    }

    #[test]
    fn test_all_ranks_see_the_same_maximum() {
        // Arrange and Act
        let results = LocalTopology::run(3, |comm| {
            let rank = comm.rank() as u64;
            comm.all_reduce_max(&[rank, 7 - rank])
        });

        // Assert
        for result in results {
            assert_eq!(result, vec![2, 7]);
        }
    }

    #[test]
    fn test_results_come_back_in_rank_order() {
        // Arrange and Act
        let results = LocalTopology::run(8, |comm| {
            comm.barrier();
            comm.rank()
        });

        // Assert
        assert_eq!(results, (0..8).collect::<Vec<_>>());
    }
}
