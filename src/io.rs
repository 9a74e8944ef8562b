//! ASCII I/O for mesh descriptions, per-rank field matrices, and the
//! run-metadata summary. Field files are whitespace-separated doubles,
//! one matrix row per line, matching the formats the solver consumes and
//! produces on disk.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::DMatrix;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::mesh::{CellKind, Mesh, MeshBuilder};
use crate::error::{IoError, SolverError};

fn io_err(path: &Path, source: std::io::Error) -> IoError {
    IoError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn malformed(path: &Path, reason: impl Into<String>) -> IoError {
    IoError::MalformedMatrix {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Reads a whitespace-separated ASCII matrix; every non-empty line is one
/// row and all rows must have the same length.
pub fn read_matrix(path: &Path) -> Result<DMatrix<f64>, IoError> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let reader = BufReader::new(file);

    let mut values: Vec<f64> = Vec::new();
    let mut rows = 0usize;
    let mut cols: Option<usize> = None;
    for line in reader.lines() {
        let line = line.map_err(|e| io_err(path, e))?;
        let row: Vec<f64> = line
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<_, _>>()
            .map_err(|e| malformed(path, e.to_string()))?;
        if row.is_empty() {
            continue;
        }
        match cols {
            None => cols = Some(row.len()),
            Some(c) if c != row.len() => {
                return Err(malformed(
                    path,
                    format!("row {rows} has {} entries, expected {c}", row.len()),
                ));
            }
            Some(_) => {}
        }
        values.extend_from_slice(&row);
        rows += 1;
    }
    let cols = cols.unwrap_or(0);
    if rows == 0 || cols == 0 {
        return Err(malformed(path, "no data rows"));
    }
    Ok(DMatrix::from_row_slice(rows, cols, &values))
}

pub fn write_matrix(path: &Path, matrix: &DMatrix<f64>) -> Result<(), IoError> {
    let file = File::create(path).map_err(|e| io_err(path, e))?;
    let mut writer = BufWriter::new(file);
    for i in 0..matrix.nrows() {
        let mut line = String::with_capacity(matrix.ncols() * 24);
        for j in 0..matrix.ncols() {
            if j > 0 {
                line.push(' ');
            }
            line.push_str(&format!("{}", matrix[(i, j)]));
        }
        line.push('\n');
        writer.write_all(line.as_bytes()).map_err(|e| io_err(path, e))?;
    }
    writer.flush().map_err(|e| io_err(path, e))
}

/// `params.dat`: the two grid spacings `dx dy`.
pub fn read_params(folder: &Path) -> Result<(f64, f64), IoError> {
    let path = folder.join("params.dat");
    let text = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let mut scalars = text.split_whitespace().map(str::parse::<f64>);
    let parse = |value: Option<Result<f64, std::num::ParseFloatError>>| match value {
        Some(Ok(v)) => Ok(v),
        Some(Err(e)) => Err(IoError::MalformedParams {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
        None => Err(IoError::MalformedParams {
            path: path.display().to_string(),
            reason: "expected two scalars: dx dy".to_string(),
        }),
    };
    let dx = parse(scalars.next())?;
    let dy = parse(scalars.next())?;
    Ok((dx, dy))
}

/// Loads the global mesh description: `bctype.dat` and `zoneid.dat` as
/// `ny x nx` matrices of integer codes, `zones.dat` with one `u v` pair
/// per zone.
pub fn read_mesh(folder: &Path) -> Result<Mesh, SolverError> {
    let bct_path = folder.join("bctype.dat");
    let raw_bct = read_matrix(&bct_path)?;
    let raw_zid = read_matrix(&folder.join("zoneid.dat"))?;

    let (ny, nx) = (raw_bct.nrows(), raw_bct.ncols());
    let mut bctype = DMatrix::from_element(ny, nx, CellKind::Interior);
    for i in 0..ny {
        for j in 0..nx {
            bctype[(i, j)] = CellKind::from_code(raw_bct[(i, j)] as i32)?;
        }
    }
    let zoneid = raw_zid.map(|v| v as i32);

    let mut builder = MeshBuilder::from_tags(bctype, zoneid)?;
    let zones_path = folder.join("zones.dat");
    let zones = read_matrix(&zones_path)?;
    if zones.ncols() != 2 {
        return Err(IoError::MalformedMatrix {
            path: zones_path.display().to_string(),
            reason: format!("expected two columns (u v), got {}", zones.ncols()),
        }
        .into());
    }
    for z in 0..zones.nrows() {
        builder.set_zone_velocity(z, zones[(z, 0)], zones[(z, 1)]);
    }
    Ok(builder.build()?)
}

fn load_field(path: &Path, ny: usize, nx: usize) -> Option<DMatrix<f64>> {
    match read_matrix(path) {
        Ok(m) if m.nrows() == ny && m.ncols() == nx => Some(m),
        Ok(m) => {
            warn!(
                path = %path.display(),
                got = %format!("{}x{}", m.nrows(), m.ncols()),
                want = %format!("{ny}x{nx}"),
                "initial field has the wrong shape, keeping zeros"
            );
            None
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "failed to read initial field, keeping zeros"
            );
            None
        }
    }
}

/// Loads this rank's steady-state initial fields from
/// `<folder>/steady/{u,v,p,uf,vf}_<rank>.dat`. A missing or malformed
/// file leaves that field zero-initialized; the run continues.
pub fn load_steady(mesh: &mut Mesh, folder: &Path, rank: usize) {
    let steady = folder.join("steady");
    let (ny, nx) = (mesh.ny, mesh.nx);

    if let Some(m) = load_field(&steady.join(format!("u_{rank}.dat")), ny, nx) {
        mesh.u0.copy_from(&m);
        mesh.u.copy_from(&m);
        mesh.u_star.copy_from(&m);
    }
    if let Some(m) = load_field(&steady.join(format!("v_{rank}.dat")), ny, nx) {
        mesh.v0.copy_from(&m);
        mesh.v.copy_from(&m);
        mesh.v_star.copy_from(&m);
    }
    if let Some(m) = load_field(&steady.join(format!("p_{rank}.dat")), ny, nx) {
        mesh.p.copy_from(&m);
    }
    if let Some(m) = load_field(&steady.join(format!("uf_{rank}.dat")), ny, nx) {
        mesh.u_face.copy_from(&m);
    }
    if let Some(m) = load_field(&steady.join(format!("vf_{rank}.dat")), ny, nx) {
        mesh.v_face.copy_from(&m);
    }
}

/// Writes this rank's `u_<r>.dat` (u_star), `v_<r>.dat` (v_star) and
/// `p_<r>.dat` into `dir`, creating it if needed.
pub fn save_fields(mesh: &Mesh, rank: usize, dir: &Path) -> Result<(), IoError> {
    fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    write_matrix(&dir.join(format!("u_{rank}.dat")), &mesh.u_star)?;
    write_matrix(&dir.join(format!("v_{rank}.dat")), &mesh.v_star)?;
    write_matrix(&dir.join(format!("p_{rank}.dat")), &mesh.p)?;
    Ok(())
}

#[derive(Serialize, Debug)]
struct RunMetadata<'a> {
    mesh_folder: &'a str,
    dx: f64,
    dy: f64,
    dt: f64,
    mu: f64,
    lx: f64,
    ly: f64,
    timesteps: usize,
    n_splits: usize,
    steps_completed: usize,
}

/// Rank 0's run summary, written next to the field files.
pub fn write_run_metadata(
    dir: &Path,
    cfg: &Config,
    steps_completed: usize,
) -> Result<(), IoError> {
    fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    let metadata = RunMetadata {
        mesh_folder: &cfg.mesh_folder,
        dx: cfg.dx,
        dy: cfg.dy,
        dt: cfg.dt,
        mu: cfg.mu,
        lx: cfg.lx,
        ly: cfg.ly,
        timesteps: cfg.timesteps,
        n_splits: cfg.n_splits,
        steps_completed,
    };
    let path = dir.join("run.json");
    let json = serde_json::to_string_pretty(&metadata).map_err(|e| IoError::MalformedParams {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let file = File::create(&path).map_err(|e| io_err(&path, e))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(json.as_bytes()).map_err(|e| io_err(&path, e))?;
    writer.flush().map_err(|e| io_err(&path, e))?;
    info!(path = %path.display(), "wrote run metadata");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mesh::lid_driven_cavity;
    use approx::assert_relative_eq;
    use nalgebra::dmatrix;
    use tempfile::tempdir;

    #[test]
    fn test_matrix_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.dat");
        let m = dmatrix![
            1.5, -2.25, 3.0;
            0.0, 1e-9, -7.125
        ];
        write_matrix(&path, &m).unwrap();
        let back = read_matrix(&path).unwrap();
        assert_eq!(back.nrows(), 2);
        assert_eq!(back.ncols(), 3);
        assert_relative_eq!(back, m, epsilon = 0.0);
    }

    #[test]
    fn test_read_matrix_rejects_ragged_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ragged.dat");
        fs::write(&path, "1 2 3\n4 5\n").unwrap();
        match read_matrix(&path) {
            Err(IoError::MalformedMatrix { reason, .. }) => {
                assert!(reason.contains("expected 3"))
            }
            other => panic!("expected malformed-matrix error, got {other:?}"),
        }
    }

    #[test]
    fn test_read_matrix_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            read_matrix(&dir.path().join("absent.dat")),
            Err(IoError::Io { .. })
        ));
    }

    #[test]
    fn test_read_params() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("params.dat"), "0.025 0.05\n").unwrap();
        let (dx, dy) = read_params(dir.path()).unwrap();
        assert_eq!(dx, 0.025);
        assert_eq!(dy, 0.05);

        fs::write(dir.path().join("params.dat"), "0.025\n").unwrap();
        assert!(matches!(
            read_params(dir.path()),
            Err(IoError::MalformedParams { .. })
        ));
    }

    #[test]
    fn test_read_mesh_from_folder() {
        let dir = tempdir().unwrap();
        // 5x6 cavity with a moving lid (zone 1) along the top ghost row.
        let bct = "\
1 1 1 1 1 1
1 0 0 0 0 1
1 0 0 0 0 1
1 0 0 0 0 1
1 1 1 1 1 1
";
        let zid = "\
0 0 0 0 0 0
0 0 0 0 0 0
0 0 0 0 0 0
0 0 0 0 0 0
1 1 1 1 1 1
";
        fs::write(dir.path().join("bctype.dat"), bct).unwrap();
        fs::write(dir.path().join("zoneid.dat"), zid).unwrap();
        fs::write(dir.path().join("zones.dat"), "0 0\n1 0\n").unwrap();

        let mesh = read_mesh(dir.path()).unwrap();
        assert_eq!((mesh.ny, mesh.nx), (5, 6));
        assert_eq!(mesh.internumber, 3 * 4);
        assert_eq!(mesh.cell_velocity(4, 2), (1.0, 0.0));
        assert_eq!(mesh.cell_velocity(0, 2), (0.0, 0.0));
    }

    #[test]
    fn test_read_mesh_rejects_unknown_code() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bctype.dat"), "9 9 9 9\n9 0 0 9\n9 0 0 9\n9 9 9 9\n").unwrap();
        fs::write(
            dir.path().join("zoneid.dat"),
            "0 0 0 0\n0 0 0 0\n0 0 0 0\n0 0 0 0\n",
        )
        .unwrap();
        fs::write(dir.path().join("zones.dat"), "0 0\n").unwrap();
        assert!(read_mesh(dir.path()).is_err());
    }

    #[test]
    fn test_load_steady_missing_files_keep_zeros() {
        let dir = tempdir().unwrap();
        let mut mesh = lid_driven_cavity(5, 5, 1.0).unwrap();
        load_steady(&mut mesh, dir.path(), 0);
        assert!(mesh.u.iter().all(|&v| v == 0.0));
        assert!(mesh.p.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_load_steady_reads_all_fields() {
        let dir = tempdir().unwrap();
        let steady = dir.path().join("steady");
        fs::create_dir_all(&steady).unwrap();
        let mut mesh = lid_driven_cavity(4, 4, 1.0).unwrap();

        let m = DMatrix::from_fn(4, 4, |i, j| (i * 4 + j) as f64 * 0.5);
        for name in ["u_1.dat", "v_1.dat", "p_1.dat", "uf_1.dat", "vf_1.dat"] {
            write_matrix(&steady.join(name), &m).unwrap();
        }
        load_steady(&mut mesh, dir.path(), 1);
        assert_relative_eq!(mesh.u, m, epsilon = 0.0);
        assert_relative_eq!(mesh.u0, m, epsilon = 0.0);
        assert_relative_eq!(mesh.u_star, m, epsilon = 0.0);
        assert_relative_eq!(mesh.p, m, epsilon = 0.0);
        assert_relative_eq!(mesh.u_face, m, epsilon = 0.0);
        assert_relative_eq!(mesh.v_face, m, epsilon = 0.0);
    }

    #[test]
    fn test_load_steady_wrong_shape_keeps_zeros() {
        let dir = tempdir().unwrap();
        let steady = dir.path().join("steady");
        fs::create_dir_all(&steady).unwrap();
        let mut mesh = lid_driven_cavity(5, 5, 1.0).unwrap();
        write_matrix(&steady.join("u_0.dat"), &DMatrix::from_element(3, 3, 7.0)).unwrap();
        load_steady(&mut mesh, dir.path(), 0);
        assert!(mesh.u.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_save_fields_writes_per_rank_files() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("step_2");
        let mut mesh = lid_driven_cavity(4, 4, 1.0).unwrap();
        mesh.u_star.fill(1.0);
        mesh.v_star.fill(2.0);
        mesh.p.fill(3.0);
        save_fields(&mesh, 3, &out).unwrap();
        assert_relative_eq!(
            read_matrix(&out.join("u_3.dat")).unwrap()[(1, 1)],
            1.0,
            epsilon = 0.0
        );
        assert_relative_eq!(
            read_matrix(&out.join("v_3.dat")).unwrap()[(0, 0)],
            2.0,
            epsilon = 0.0
        );
        assert_relative_eq!(
            read_matrix(&out.join("p_3.dat")).unwrap()[(3, 3)],
            3.0,
            epsilon = 0.0
        );
    }

    #[test]
    fn test_run_metadata_roundtrip() {
        let dir = tempdir().unwrap();
        let cfg = Config::new("meshes/cavity", 0.1, 0.1, 0.05, 0.01, 20, 2, 12, 12).unwrap();
        write_run_metadata(dir.path(), &cfg, 21).unwrap();
        let text = fs::read_to_string(dir.path().join("run.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["mesh_folder"], "meshes/cavity");
        assert_eq!(value["n_splits"], 2);
        assert_eq!(value["steps_completed"], 21);
        assert_eq!(value["dt"], 0.05);
    }
}
