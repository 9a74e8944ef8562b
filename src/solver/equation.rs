use nalgebra::{DMatrix, DVector};
use rsparse::data::{Sprs, Trpl};

use crate::domain::mesh::Mesh;

/// Linearization of one cell-centered scalar transport equation over a
/// mesh: pentadiagonal stencil weights, a dense source over the interior
/// unknowns, and the sparse matrix assembled from them.
///
/// The convention is `a_p*phi[i,j] = a_e*phi[i,j+1] + a_w*phi[i,j-1]
/// + a_n*phi[i+1,j] + a_s*phi[i-1,j] + source[k]`. The coefficient arrays
/// are the single source of truth; [`Equation::build_matrix`] regenerates
/// the sparse form from them, so the two can never drift apart across an
/// outer iteration.
pub struct Equation {
    pub a_p: DMatrix<f64>,
    pub a_e: DMatrix<f64>,
    pub a_w: DMatrix<f64>,
    pub a_n: DMatrix<f64>,
    pub a_s: DMatrix<f64>,
    pub source: DVector<f64>,
    pub a: Sprs<f64>,
    pub n: usize,
}

impl Equation {
    pub fn new(mesh: &Mesh) -> Self {
        Self {
            a_p: DMatrix::zeros(mesh.ny, mesh.nx),
            a_e: DMatrix::zeros(mesh.ny, mesh.nx),
            a_w: DMatrix::zeros(mesh.ny, mesh.nx),
            a_n: DMatrix::zeros(mesh.ny, mesh.nx),
            a_s: DMatrix::zeros(mesh.ny, mesh.nx),
            source: DVector::zeros(mesh.internumber),
            a: Sprs::new(),
            n: mesh.internumber,
        }
    }

    pub fn reset(&mut self) {
        self.a_p.fill(0.0);
        self.a_e.fill(0.0);
        self.a_w.fill(0.0);
        self.a_n.fill(0.0);
        self.a_s.fill(0.0);
        self.source.fill(0.0);
    }

    /// Assembles the sparse matrix over the dense interior numbering.
    /// Only couplings to locally interior neighbors become entries; a
    /// `Ghost` neighbor's coupling is applied by the solver against the
    /// halo-exchanged iterate, and anything else was already folded into
    /// the source (its coefficient is zero by then).
    pub fn build_matrix(&mut self, mesh: &Mesh) {
        let n = mesh.internumber;
        self.n = n;
        if n == 0 {
            self.a = Sprs {
                m: 0,
                n: 0,
                nzmax: 0,
                p: vec![0],
                i: vec![],
                x: vec![],
            };
            return;
        }

        let mut trpl = Trpl::<f64> {
            m: n,
            n,
            p: Vec::with_capacity(5 * n),
            i: Vec::with_capacity(5 * n),
            x: Vec::with_capacity(5 * n),
        };
        let mut push = |row: usize, col: usize, value: f64| {
            trpl.i.push(row);
            trpl.p.push(col as isize);
            trpl.x.push(value);
        };

        for k in 0..n {
            let i = mesh.interi[k];
            let j = mesh.interj[k];
            push(k, k, self.a_p[(i, j)]);

            let neighbors = [
                ((i, j + 1), self.a_e[(i, j)]),
                ((i, j - 1), self.a_w[(i, j)]),
                ((i + 1, j), self.a_n[(i, j)]),
                ((i - 1, j), self.a_s[(i, j)]),
            ];
            for ((ni, nj), coeff) in neighbors {
                let id = mesh.interid[(ni, nj)];
                if id >= 0 && coeff != 0.0 {
                    push(k, id as usize, -coeff);
                }
            }
        }

        let mut sprs = Sprs::new();
        sprs.from_trpl(&trpl);
        self.a = sprs;
    }

    /// y = A x over the compressed-column storage.
    pub fn spmv(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        y.fill(0.0);
        for col in 0..self.a.n {
            let xc = x[col];
            if xc == 0.0 {
                continue;
            }
            let start = self.a.p[col] as usize;
            let end = self.a.p[col + 1] as usize;
            for idx in start..end {
                y[self.a.i[idx]] += self.a.x[idx] * xc;
            }
        }
    }
}
