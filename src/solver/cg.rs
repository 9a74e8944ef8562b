//! Distributed conjugate-gradient solver. Each rank holds its
//! subdomain's rows and vector segments; every sparse matrix-vector
//! product is preceded by a halo exchange of the iterate's boundary
//! columns, and the inner products are summed across ranks. On the
//! upwinded momentum systems the matrix is not symmetric; there the
//! solver runs as a loose Krylov smoother under a tight iteration cap and
//! the SIMPLE outer loop absorbs the remaining residual.

use nalgebra::{DMatrix, DVector};

use crate::comm::{exchange_columns, Communicator, Op};
use crate::domain::mesh::{CellKind, Mesh};
use crate::solver::equation::Equation;

fn global_dot(a: &DVector<f64>, b: &DVector<f64>, comm: &dyn Communicator) -> f64 {
    comm.allreduce_scalar(a.dot(b), Op::Sum)
}

/// y = A x including the couplings through the ghost columns. The
/// iterate is scattered into `scratch`, halo-exchanged, and the west/east
/// weights toward `Ghost` cells are applied against the received values.
fn apply(
    equ: &Equation,
    mesh: &Mesh,
    x: &DVector<f64>,
    comm: &dyn Communicator,
    scratch: &mut DMatrix<f64>,
    y: &mut DVector<f64>,
) {
    scratch.fill(0.0);
    for k in 0..mesh.internumber {
        scratch[(mesh.interi[k], mesh.interj[k])] = x[k];
    }
    exchange_columns(scratch, comm);

    equ.spmv(x, y);

    let nx = mesh.nx;
    for i in 1..mesh.ny - 1 {
        if mesh.bctype[(i, 0)] == CellKind::Ghost {
            let id = mesh.interid[(i, 1)];
            if id >= 0 {
                y[id as usize] -= equ.a_w[(i, 1)] * scratch[(i, 0)];
            }
        }
        if mesh.bctype[(i, nx - 1)] == CellKind::Ghost {
            let id = mesh.interid[(i, nx - 2)];
            if id >= 0 {
                y[id as usize] -= equ.a_e[(i, nx - 2)] * scratch[(i, nx - 1)];
            }
        }
    }
}

/// Solves `A x = b` for the interior unknowns, starting from the caller's
/// `x`. Returns the final global L2 residual norm, which the SIMPLE
/// driver uses for convergence monitoring. All ranks run the iteration in
/// lockstep (the scalars steering it are global), so ranks that own no
/// unknowns still participate in every collective.
pub fn solve(
    equ: &Equation,
    mesh: &Mesh,
    b: &DVector<f64>,
    x: &mut DVector<f64>,
    eps: f64,
    max_iter: usize,
    comm: &dyn Communicator,
) -> f64 {
    let n = mesh.internumber;
    let mut scratch = DMatrix::<f64>::zeros(mesh.ny, mesh.nx);
    let mut ap = DVector::<f64>::zeros(n);

    apply(equ, mesh, x, comm, &mut scratch, &mut ap);
    let mut r = b - &ap;
    let mut p = r.clone();
    let mut rs_old = global_dot(&r, &r, comm);
    if rs_old.sqrt() <= eps {
        return rs_old.sqrt();
    }

    for _ in 0..max_iter {
        apply(equ, mesh, &p, comm, &mut scratch, &mut ap);
        let p_ap = global_dot(&p, &ap, comm);
        if p_ap.abs() < f64::MIN_POSITIVE {
            break;
        }
        let alpha = rs_old / p_ap;
        x.axpy(alpha, &p, 1.0);
        r.axpy(-alpha, &ap, 1.0);

        let rs_new = global_dot(&r, &r, comm);
        if rs_new.sqrt() <= eps {
            rs_old = rs_new;
            break;
        }
        let beta = rs_new / rs_old;
        p *= beta;
        p += &r;
        rs_old = rs_new;
    }
    rs_old.sqrt()
}
