//! In-process rank transport. Every rank runs on its own thread of a
//! single process and owns its subdomain exclusively; all traffic between
//! ranks goes over channels, so swapping this for a distributed transport
//! only touches the `Communicator` implementation.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier};

use super::{Communicator, Op, Side};

enum Msg {
    Values(Vec<f64>),
    Text(String),
    TextList(Vec<String>),
}

struct Link {
    tx: Sender<Vec<f64>>,
    rx: Receiver<Vec<f64>>,
}

/// Star topology for reductions and gathers: leaves talk to rank 0,
/// rank 0 combines and scatters the result back.
enum Collective {
    Root {
        gather: Vec<Receiver<Msg>>,
        scatter: Vec<Sender<Msg>>,
    },
    Leaf {
        up: Sender<Msg>,
        down: Receiver<Msg>,
    },
}

pub struct ThreadComm {
    rank: usize,
    size: usize,
    barrier: Arc<Barrier>,
    left: Option<Link>,
    right: Option<Link>,
    collective: Collective,
}

impl ThreadComm {
    /// Builds one endpoint per rank. Each endpoint must be moved into the
    /// thread that acts as that rank.
    pub fn create(size: usize) -> Vec<ThreadComm> {
        assert!(size >= 1, "communicator needs at least one rank");
        let barrier = Arc::new(Barrier::new(size));

        // Point-to-point links between column neighbors.
        let mut lefts: Vec<Option<Link>> = (0..size).map(|_| None).collect();
        let mut rights: Vec<Option<Link>> = (0..size).map(|_| None).collect();
        for r in 0..size.saturating_sub(1) {
            let (to_right, from_left) = channel();
            let (to_left, from_right) = channel();
            rights[r] = Some(Link {
                tx: to_right,
                rx: from_right,
            });
            lefts[r + 1] = Some(Link {
                tx: to_left,
                rx: from_left,
            });
        }

        let mut gather = Vec::with_capacity(size.saturating_sub(1));
        let mut scatter = Vec::with_capacity(size.saturating_sub(1));
        let mut leaves = Vec::with_capacity(size.saturating_sub(1));
        for _ in 1..size {
            let (tx_up, rx_up) = channel();
            let (tx_down, rx_down) = channel();
            gather.push(rx_up);
            scatter.push(tx_down);
            leaves.push((tx_up, rx_down));
        }

        let mut comms = Vec::with_capacity(size);
        comms.push(ThreadComm {
            rank: 0,
            size,
            barrier: Arc::clone(&barrier),
            left: lefts[0].take(),
            right: rights[0].take(),
            collective: Collective::Root { gather, scatter },
        });
        for (i, (up, down)) in leaves.into_iter().enumerate() {
            let rank = i + 1;
            comms.push(ThreadComm {
                rank,
                size,
                barrier: Arc::clone(&barrier),
                left: lefts[rank].take(),
                right: rights[rank].take(),
                collective: Collective::Leaf { up, down },
            });
        }
        comms
    }
}

fn combine(acc: &mut [f64], other: &[f64], op: Op) {
    debug_assert_eq!(acc.len(), other.len());
    for (a, b) in acc.iter_mut().zip(other.iter()) {
        *a = match op {
            Op::Sum => *a + *b,
            Op::Min => a.min(*b),
            Op::Max => a.max(*b),
        };
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.barrier.wait();
    }

    fn allreduce(&self, values: &[f64], op: Op) -> Vec<f64> {
        // A disconnected channel means a peer rank died; the whole
        // communicator goes down with it, as an MPI abort would.
        match &self.collective {
            Collective::Root { gather, scatter } => {
                let mut acc = values.to_vec();
                for rx in gather {
                    match rx.recv().expect("peer rank disconnected") {
                        Msg::Values(theirs) => combine(&mut acc, &theirs, op),
                        _ => unreachable!("collective message order violated"),
                    }
                }
                for tx in scatter {
                    tx.send(Msg::Values(acc.clone()))
                        .expect("peer rank disconnected");
                }
                acc
            }
            Collective::Leaf { up, down } => {
                up.send(Msg::Values(values.to_vec()))
                    .expect("peer rank disconnected");
                match down.recv().expect("peer rank disconnected") {
                    Msg::Values(acc) => acc,
                    _ => unreachable!("collective message order violated"),
                }
            }
        }
    }

    fn allgather_string(&self, value: &str) -> Vec<String> {
        match &self.collective {
            Collective::Root { gather, scatter } => {
                let mut all = Vec::with_capacity(self.size);
                all.push(value.to_string());
                for rx in gather {
                    match rx.recv().expect("peer rank disconnected") {
                        Msg::Text(s) => all.push(s),
                        _ => unreachable!("collective message order violated"),
                    }
                }
                for tx in scatter {
                    tx.send(Msg::TextList(all.clone()))
                        .expect("peer rank disconnected");
                }
                all
            }
            Collective::Leaf { up, down } => {
                up.send(Msg::Text(value.to_string()))
                    .expect("peer rank disconnected");
                match down.recv().expect("peer rank disconnected") {
                    Msg::TextList(all) => all,
                    _ => unreachable!("collective message order violated"),
                }
            }
        }
    }

    fn exchange(&self, side: Side, send: &[f64]) -> Option<Vec<f64>> {
        let link = match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        }?;
        // Channels are unbounded, so send-then-receive cannot deadlock as
        // long as both neighbors issue the matching exchange.
        link.tx.send(send.to_vec()).expect("peer rank disconnected");
        Some(link.rx.recv().expect("peer rank disconnected"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::exchange_columns;
    use nalgebra::DMatrix;

    fn run_ranks<F, T>(size: usize, f: F) -> Vec<T>
    where
        F: Fn(ThreadComm) -> T + Sync,
        T: Send,
    {
        let comms = ThreadComm::create(size);
        std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| scope.spawn(|| f(comm)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn test_allreduce_sum_min_max() {
        let results = run_ranks(4, |comm| {
            let r = comm.rank() as f64;
            let sum = comm.allreduce(&[r, 1.0], Op::Sum);
            let min = comm.allreduce_scalar(r, Op::Min);
            let max = comm.allreduce_scalar(r, Op::Max);
            (sum, min, max)
        });
        for (sum, min, max) in results {
            assert_eq!(sum, vec![6.0, 4.0]);
            assert_eq!(min, 0.0);
            assert_eq!(max, 3.0);
        }
    }

    #[test]
    fn test_allgather_string_orders_by_rank() {
        let results = run_ranks(3, |comm| comm.allgather_string(&format!("r{}", comm.rank())));
        for all in results {
            assert_eq!(all, vec!["r0", "r1", "r2"]);
        }
    }

    #[test]
    fn test_exchange_pairs_with_neighbor() {
        let results = run_ranks(3, |comm| {
            let me = vec![comm.rank() as f64; 2];
            let from_right = comm.exchange(Side::Right, &me);
            let from_left = comm.exchange(Side::Left, &me);
            (comm.rank(), from_left, from_right)
        });
        for (rank, from_left, from_right) in results {
            match rank {
                0 => {
                    assert_eq!(from_left, None);
                    assert_eq!(from_right, Some(vec![1.0, 1.0]));
                }
                1 => {
                    assert_eq!(from_left, Some(vec![0.0, 0.0]));
                    assert_eq!(from_right, Some(vec![2.0, 2.0]));
                }
                2 => {
                    assert_eq!(from_left, Some(vec![1.0, 1.0]));
                    assert_eq!(from_right, None);
                }
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn test_exchange_columns_fills_ghosts_and_is_idempotent() {
        // Each rank's field is constant at (rank + 1); after the exchange
        // the ghost columns hold the neighbor's constant.
        let results = run_ranks(3, |comm| {
            let base = (comm.rank() + 1) as f64;
            let mut field = DMatrix::from_element(3, 5, base);
            exchange_columns(&mut field, &comm);
            let once = field.clone();
            exchange_columns(&mut field, &comm);
            (comm.rank(), once, field)
        });
        for (rank, once, twice) in results {
            assert_eq!(once, twice, "second exchange must be a no-op");
            let base = (rank + 1) as f64;
            // Interior columns untouched.
            for j in 1..4 {
                for i in 0..3 {
                    assert_eq!(once[(i, j)], base);
                }
            }
            if rank > 0 {
                assert_eq!(once[(0, 0)], rank as f64, "left ghost from rank-1");
            } else {
                assert_eq!(once[(0, 0)], base, "edge rank keeps its ghost");
            }
            if rank < 2 {
                assert_eq!(once[(0, 4)], (rank + 2) as f64, "right ghost from rank+1");
            } else {
                assert_eq!(once[(0, 4)], base);
            }
        }
    }

    #[test]
    fn test_barrier_releases_all_ranks() {
        let results = run_ranks(4, |comm| {
            comm.barrier();
            comm.allreduce_scalar(1.0, Op::Sum)
        });
        assert_eq!(results, vec![4.0; 4]);
    }
}
