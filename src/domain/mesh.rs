use nalgebra::{DMatrix, DVector};

use crate::error::MeshError;

/// Role of a cell in the discretization.
///
/// The outermost row and column of every subdomain are ghosts: either
/// physical boundary cells (which keep their boundary kind) or, on an
/// inter-rank seam, copies of the neighbor's adjacent interior column
/// tagged `Ghost`. Only `Interior` cells carry unknowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Interior,
    Wall,
    Inlet,
    Outlet,
    Zone,
    Obstacle,
    Ghost,
}

impl CellKind {
    pub fn is_interior(self) -> bool {
        matches!(self, CellKind::Interior)
    }

    /// Interior unknown or a peer rank's copy of one; these are the cells
    /// a stencil couples to through the linear system.
    pub fn is_live(self) -> bool {
        matches!(self, CellKind::Interior | CellKind::Ghost)
    }

    pub fn from_code(code: i32) -> Result<Self, MeshError> {
        match code {
            0 => Ok(CellKind::Interior),
            1 => Ok(CellKind::Wall),
            2 => Ok(CellKind::Inlet),
            3 => Ok(CellKind::Outlet),
            4 => Ok(CellKind::Zone),
            5 => Ok(CellKind::Obstacle),
            _ => Err(MeshError::InvalidBlock(format!(
                "unknown cell kind code {code}"
            ))),
        }
    }
}

/// One subdomain's rectangular slice of the global grid.
///
/// All fields are `ny x nx` with row i = y and column j = x; `u_face[(i, j)]`
/// sits on the east face of cell (i, j) and `v_face[(i, j)]` on its north
/// face. `interid` maps interior cells to a dense row-major index in
/// `[0, internumber)`; `interi`/`interj` invert it.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub ny: usize,
    pub nx: usize,
    /// Global index of local column 0 (partition metadata).
    pub col_offset: usize,

    pub u: DMatrix<f64>,
    pub v: DMatrix<f64>,
    pub u0: DMatrix<f64>,
    pub v0: DMatrix<f64>,
    pub u_star: DMatrix<f64>,
    pub v_star: DMatrix<f64>,
    pub p: DMatrix<f64>,
    pub p_star: DMatrix<f64>,
    pub p_prime: DMatrix<f64>,
    pub u_face: DMatrix<f64>,
    pub v_face: DMatrix<f64>,

    pub bctype: DMatrix<CellKind>,
    pub zoneid: DMatrix<i32>,
    pub zoneu: Vec<f64>,
    pub zonev: Vec<f64>,

    pub interid: DMatrix<i32>,
    pub interi: Vec<usize>,
    pub interj: Vec<usize>,
    pub internumber: usize,
}

impl Mesh {
    pub(crate) fn zeroed(
        ny: usize,
        nx: usize,
        bctype: DMatrix<CellKind>,
        zoneid: DMatrix<i32>,
        zoneu: Vec<f64>,
        zonev: Vec<f64>,
    ) -> Self {
        Self {
            ny,
            nx,
            col_offset: 0,
            u: DMatrix::zeros(ny, nx),
            v: DMatrix::zeros(ny, nx),
            u0: DMatrix::zeros(ny, nx),
            v0: DMatrix::zeros(ny, nx),
            u_star: DMatrix::zeros(ny, nx),
            v_star: DMatrix::zeros(ny, nx),
            p: DMatrix::zeros(ny, nx),
            p_star: DMatrix::zeros(ny, nx),
            p_prime: DMatrix::zeros(ny, nx),
            u_face: DMatrix::zeros(ny, nx),
            v_face: DMatrix::zeros(ny, nx),
            bctype,
            zoneid,
            zoneu,
            zonev,
            interid: DMatrix::from_element(ny, nx, -1),
            interi: Vec::new(),
            interj: Vec::new(),
            internumber: 0,
        }
    }

    /// Rebuilds the dense interior numbering, row-major by (i, j). Ghost
    /// rows and columns never receive an index.
    pub fn create_inter_id(&mut self) {
        self.interid.fill(-1);
        self.interi.clear();
        self.interj.clear();
        let mut next = 0i32;
        for i in 1..self.ny - 1 {
            for j in 1..self.nx - 1 {
                if self.bctype[(i, j)].is_interior() {
                    self.interid[(i, j)] = next;
                    self.interi.push(i);
                    self.interj.push(j);
                    next += 1;
                }
            }
        }
        self.internumber = next as usize;
    }

    pub fn is_interior(&self, i: usize, j: usize) -> bool {
        self.bctype[(i, j)].is_interior()
    }

    /// Prescribed velocity of a boundary cell, looked up through its zone.
    /// Unknown zones fall back to a stationary wall.
    pub fn cell_velocity(&self, i: usize, j: usize) -> (f64, f64) {
        let z = self.zoneid[(i, j)];
        if z >= 0 {
            let z = z as usize;
            if z < self.zoneu.len() && z < self.zonev.len() {
                return (self.zoneu[z], self.zonev[z]);
            }
        }
        (0.0, 0.0)
    }
}

/// Scatters a dense interior vector back into a 2-D field.
pub fn vector_to_matrix(
    x: &DVector<f64>,
    field: &mut DMatrix<f64>,
    interi: &[usize],
    interj: &[usize],
) {
    for (k, (&i, &j)) in interi.iter().zip(interj.iter()).enumerate() {
        field[(i, j)] = x[k];
    }
}

/// Builds a [`Mesh`] from rectangular blocks of cell kinds and per-zone
/// velocities. `new` starts from an all-interior grid whose ghost ring is
/// a stationary wall (zone 0); `set_block` overwrites rectangles, so
/// obstacles, inlets and moving lids are layered on top.
#[derive(Debug, Clone)]
pub struct MeshBuilder {
    ny: usize,
    nx: usize,
    bctype: DMatrix<CellKind>,
    zoneid: DMatrix<i32>,
    zoneu: Vec<f64>,
    zonev: Vec<f64>,
}

impl MeshBuilder {
    pub fn new(ny: usize, nx: usize) -> Result<Self, MeshError> {
        if ny < 4 || nx < 4 {
            return Err(MeshError::InvalidGridSize(format!(
                "mesh must be at least 4x4 including ghosts, got {ny}x{nx}"
            )));
        }
        let mut bctype = DMatrix::from_element(ny, nx, CellKind::Interior);
        let zoneid = DMatrix::from_element(ny, nx, 0);
        for j in 0..nx {
            bctype[(0, j)] = CellKind::Wall;
            bctype[(ny - 1, j)] = CellKind::Wall;
        }
        for i in 0..ny {
            bctype[(i, 0)] = CellKind::Wall;
            bctype[(i, nx - 1)] = CellKind::Wall;
        }
        Ok(Self {
            ny,
            nx,
            bctype,
            zoneid,
            zoneu: vec![0.0],
            zonev: vec![0.0],
        })
    }

    /// Builder over already-tagged matrices (used by the mesh-folder loader).
    pub fn from_tags(bctype: DMatrix<CellKind>, zoneid: DMatrix<i32>) -> Result<Self, MeshError> {
        let (ny, nx) = (bctype.nrows(), bctype.ncols());
        if ny < 4 || nx < 4 {
            return Err(MeshError::InvalidGridSize(format!(
                "mesh must be at least 4x4 including ghosts, got {ny}x{nx}"
            )));
        }
        if zoneid.nrows() != ny || zoneid.ncols() != nx {
            return Err(MeshError::InvalidGridSize(format!(
                "zone tags are {}x{}, cell tags are {ny}x{nx}",
                zoneid.nrows(),
                zoneid.ncols()
            )));
        }
        Ok(Self {
            ny,
            nx,
            bctype,
            zoneid,
            zoneu: vec![0.0],
            zonev: vec![0.0],
        })
    }

    /// Tags the inclusive rectangle [i1, i2] x [j1, j2].
    pub fn set_block(
        &mut self,
        i1: usize,
        j1: usize,
        i2: usize,
        j2: usize,
        kind: CellKind,
        zone: usize,
    ) -> Result<&mut Self, MeshError> {
        if i2 >= self.ny || j2 >= self.nx || i1 > i2 || j1 > j2 {
            return Err(MeshError::InvalidBlock(format!(
                "block ({i1},{j1})..({i2},{j2}) outside {}x{} mesh",
                self.ny, self.nx
            )));
        }
        for i in i1..=i2 {
            for j in j1..=j2 {
                self.bctype[(i, j)] = kind;
                self.zoneid[(i, j)] = zone as i32;
            }
        }
        self.ensure_zone(zone);
        Ok(self)
    }

    pub fn set_zone_velocity(&mut self, zone: usize, u: f64, v: f64) -> &mut Self {
        self.ensure_zone(zone);
        self.zoneu[zone] = u;
        self.zonev[zone] = v;
        self
    }

    fn ensure_zone(&mut self, zone: usize) {
        if zone >= self.zoneu.len() {
            self.zoneu.resize(zone + 1, 0.0);
            self.zonev.resize(zone + 1, 0.0);
        }
    }

    pub fn build(self) -> Result<Mesh, MeshError> {
        for j in 0..self.nx {
            if self.bctype[(0, j)].is_interior() || self.bctype[(self.ny - 1, j)].is_interior() {
                return Err(MeshError::InvalidBlock(
                    "ghost rows cannot be interior".to_string(),
                ));
            }
        }
        for i in 0..self.ny {
            if self.bctype[(i, 0)].is_interior() || self.bctype[(i, self.nx - 1)].is_interior() {
                return Err(MeshError::InvalidBlock(
                    "ghost columns cannot be interior".to_string(),
                ));
            }
        }
        let mut mesh = Mesh::zeroed(
            self.ny,
            self.nx,
            self.bctype,
            self.zoneid,
            self.zoneu,
            self.zonev,
        );
        mesh.create_inter_id();
        Ok(mesh)
    }
}

/// Standard lid-driven cavity: stationary walls, the top ghost row moving
/// with `lid_u` (zone 1).
pub fn lid_driven_cavity(ny: usize, nx: usize, lid_u: f64) -> Result<Mesh, MeshError> {
    let mut builder = MeshBuilder::new(ny, nx)?;
    builder.set_block(ny - 1, 0, ny - 1, nx - 1, CellKind::Wall, 1)?;
    builder.set_zone_velocity(1, lid_u, 0.0);
    builder.build()
}
