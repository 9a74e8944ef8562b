//! Column-strip domain decomposition. The global mesh's interior columns
//! are divided into contiguous strips, one per rank; each strip keeps one
//! ghost column on either side. Ghost cells that are interior in the
//! global mesh become [`CellKind::Ghost`] so assembly knows they belong to
//! a peer, while physical boundary and obstacle cells keep their kind and
//! fold into sources exactly as they would in a single-rank run.

use nalgebra::DMatrix;

use crate::domain::mesh::{CellKind, Mesh};
use crate::error::MeshError;

/// Splits `mesh` into `ranks` column strips, balanced to within one
/// column (the first `columns % ranks` strips take the extra). Every
/// strip must keep at least two interior columns so the five-point
/// stencil stays local.
pub fn split_columns(mesh: &Mesh, ranks: usize) -> Result<Vec<Mesh>, MeshError> {
    let interior_cols = mesh.nx - 2;
    if ranks == 0 || interior_cols / 2 < ranks {
        return Err(MeshError::InvalidSplit {
            columns: interior_cols,
            ranks,
        });
    }

    let base = interior_cols / ranks;
    let rem = interior_cols % ranks;
    let mut out = Vec::with_capacity(ranks);
    let mut start = 1usize; // first interior column of this strip
    for r in 0..ranks {
        let cols = base + usize::from(r < rem);
        let j0 = start - 1; // left ghost
        let j1 = start + cols; // right ghost
        let local_nx = cols + 2;

        let mut bctype = DMatrix::from_element(mesh.ny, local_nx, CellKind::Interior);
        let mut zoneid = DMatrix::from_element(mesh.ny, local_nx, 0);
        for (jj, j) in (j0..=j1).enumerate() {
            for i in 0..mesh.ny {
                bctype[(i, jj)] = mesh.bctype[(i, j)];
                zoneid[(i, jj)] = mesh.zoneid[(i, j)];
            }
        }
        if r > 0 {
            for i in 0..mesh.ny {
                if bctype[(i, 0)].is_interior() {
                    bctype[(i, 0)] = CellKind::Ghost;
                }
            }
        }
        if r + 1 < ranks {
            for i in 0..mesh.ny {
                if bctype[(i, local_nx - 1)].is_interior() {
                    bctype[(i, local_nx - 1)] = CellKind::Ghost;
                }
            }
        }

        let mut sub = Mesh::zeroed(
            mesh.ny,
            local_nx,
            bctype,
            zoneid,
            mesh.zoneu.clone(),
            mesh.zonev.clone(),
        );
        sub.col_offset = j0;
        sub.create_inter_id();
        out.push(sub);

        start += cols;
    }
    Ok(out)
}
