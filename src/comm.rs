use nalgebra::DMatrix;

pub mod thread;

/// Neighbor direction along the partitioned (column) axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Reduction operator for `allreduce`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Sum,
    Min,
    Max,
}

/// Bulk-synchronous collectives between the peer ranks of one run.
///
/// Every rank must issue the same sequence of collective calls; message
/// pairing between column neighbors relies on that ordering. The trait is
/// the seam where an MPI transport would plug in; the shipped
/// implementations are [`SoloComm`] and [`thread::ThreadComm`].
pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self);
    fn allreduce(&self, values: &[f64], op: Op) -> Vec<f64>;
    fn allgather_string(&self, value: &str) -> Vec<String>;

    /// Paired send/receive with the neighbor on `side`. Returns `None`
    /// when there is no neighbor in that direction.
    fn exchange(&self, side: Side, send: &[f64]) -> Option<Vec<f64>>;

    fn allreduce_scalar(&self, value: f64, op: Op) -> f64 {
        self.allreduce(&[value], op)[0]
    }

    fn has_neighbor(&self, side: Side) -> bool {
        match side {
            Side::Left => self.rank() > 0,
            Side::Right => self.rank() + 1 < self.size(),
        }
    }
}

/// Single-rank communicator: every collective is a local no-op.
pub struct SoloComm;

impl Communicator for SoloComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn allreduce(&self, values: &[f64], _op: Op) -> Vec<f64> {
        values.to_vec()
    }

    fn allgather_string(&self, value: &str) -> Vec<String> {
        vec![value.to_string()]
    }

    fn exchange(&self, _side: Side, _send: &[f64]) -> Option<Vec<f64>> {
        None
    }
}

/// Swaps the innermost non-ghost column with each neighbor's ghost column:
/// column `nx-2` goes right (landing in the right neighbor's column 0),
/// column 1 goes left, and the ghost columns 0 and `nx-1` are overwritten
/// with whatever the neighbors sent. Edge ranks skip their outward
/// direction. Calling this twice without intervening writes leaves the
/// field unchanged, since only ghost columns are written.
pub fn exchange_columns(field: &mut DMatrix<f64>, comm: &dyn Communicator) {
    let nx = field.ncols();

    let send_right: Vec<f64> = field.column(nx - 2).iter().copied().collect();
    if let Some(recv) = comm.exchange(Side::Right, &send_right) {
        for (i, v) in recv.into_iter().enumerate() {
            field[(i, nx - 1)] = v;
        }
    }

    let send_left: Vec<f64> = field.column(1).iter().copied().collect();
    if let Some(recv) = comm.exchange(Side::Left, &send_left) {
        for (i, v) in recv.into_iter().enumerate() {
            field[(i, 0)] = v;
        }
    }
}
