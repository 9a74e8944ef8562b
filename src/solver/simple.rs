//! SIMPLE outer iteration and time-marching driver. One driver serves
//! both the steady and unsteady variants; the relaxation policy is the
//! only thing that differs between them.

use std::path::{Path, PathBuf};

use nalgebra::DVector;
use tracing::{info, warn};

use crate::comm::thread::ThreadComm;
use crate::comm::{exchange_columns, Communicator, Op, SoloComm};
use crate::config::Config;
use crate::domain::mesh::{vector_to_matrix, Mesh};
use crate::domain::partition::split_columns;
use crate::error::SolverError;
use crate::io;
use crate::solver::cg;
use crate::solver::discretize;
use crate::solver::equation::Equation;

/// Outcome of one time step's outer loop.
#[derive(Debug, Clone, Copy)]
pub struct OuterStats {
    pub outer_iterations: usize,
    pub converged: bool,
    pub res_u: f64,
    pub res_v: f64,
    pub res_p: f64,
    /// Global continuity residual entering the last pressure solve.
    pub imbalance: f64,
}

pub struct SimpleSolver<'a> {
    cfg: &'a Config,
    comm: &'a dyn Communicator,
    pub mesh: Mesh,
    equ_u: Equation,
    equ_v: Equation,
    equ_p: Equation,
    output_dir: Option<PathBuf>,
    /// Time steps taken so far; drives the relaxation schedule.
    steps_taken: usize,
}

impl<'a> SimpleSolver<'a> {
    pub fn new(cfg: &'a Config, mesh: Mesh, comm: &'a dyn Communicator) -> Self {
        let equ_u = Equation::new(&mesh);
        let equ_v = Equation::new(&mesh);
        let equ_p = Equation::new(&mesh);
        Self {
            cfg,
            comm,
            mesh,
            equ_u,
            equ_v,
            equ_p,
            output_dir: None,
            steps_taken: 0,
        }
    }

    pub fn with_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn into_mesh(self) -> Mesh {
        self.mesh
    }

    /// Marches `timesteps + 1` steps, persisting fields on the configured
    /// cadence and always at the end.
    pub fn run(&mut self) -> Result<usize, SolverError> {
        let rank = self.comm.rank();
        for step in 0..=self.cfg.timesteps {
            if rank == 0 {
                info!(step, "time step");
            }
            let stats = self.advance(step)?;
            if rank == 0 && !stats.converged {
                warn!(
                    step,
                    outer_iterations = stats.outer_iterations,
                    "outer loop hit the iteration cap, advancing with best iterate"
                );
            }
            if let Some(dir) = &self.output_dir {
                if self.cfg.save_every != 0 && step % self.cfg.save_every == 0 {
                    // Output failures stay local to this rank; aborting
                    // here would strand the peers at the next barrier.
                    if let Err(e) = io::save_fields(&self.mesh, rank, dir) {
                        warn!(rank, error = %e, "failed to persist fields, continuing");
                    }
                }
            }
            self.mesh.u0.copy_from(&self.mesh.u_star);
            self.mesh.v0.copy_from(&self.mesh.v_star);
        }
        if let Some(dir) = &self.output_dir {
            if let Err(e) = io::save_fields(&self.mesh, rank, dir) {
                warn!(rank, error = %e, "failed to persist final fields");
            }
            if rank == 0 {
                if let Err(e) = io::write_run_metadata(dir, self.cfg, self.cfg.timesteps + 1) {
                    warn!(error = %e, "failed to write run metadata");
                }
            }
        }
        Ok(self.cfg.timesteps + 1)
    }

    /// One time step: SIMPLE outer iterations until the normalized
    /// residuals converge on every rank or the cap is reached.
    pub fn advance(&mut self, step: usize) -> Result<OuterStats, SolverError> {
        self.steps_taken += 1;
        let alpha_uv = self.cfg.relax.alpha_uv(self.steps_taken);
        let alpha_p = self.cfg.relax.alpha_p(self.steps_taken);
        let rank = self.comm.rank();

        self.comm.barrier();
        let mut init_res = [-1.0f64; 3];
        let mut stats = OuterStats {
            outer_iterations: 0,
            converged: false,
            res_u: 0.0,
            res_v: 0.0,
            res_p: 0.0,
            imbalance: 0.0,
        };

        for n in 1..=self.cfg.max_outer_iterations {
            self.comm.barrier();
            stats.outer_iterations = n;

            // Iterate restart: the momentum solves start from zero.
            self.mesh.u.fill(0.0);
            self.mesh.v.fill(0.0);
            self.equ_u.reset();
            self.equ_v.reset();
            discretize::momentum(&self.mesh, &mut self.equ_u, &mut self.equ_v, self.cfg, alpha_uv);
            self.equ_u.build_matrix(&self.mesh);
            self.equ_v.build_matrix(&self.mesh);

            let mut x_u = DVector::<f64>::zeros(self.mesh.internumber);
            let mut x_v = DVector::<f64>::zeros(self.mesh.internumber);
            let res_u = cg::solve(
                &self.equ_u,
                &self.mesh,
                &self.equ_u.source,
                &mut x_u,
                self.cfg.momentum.tol,
                self.cfg.momentum.max_iter,
                self.comm,
            );
            let res_v = cg::solve(
                &self.equ_v,
                &self.mesh,
                &self.equ_v.source,
                &mut x_v,
                self.cfg.momentum.tol,
                self.cfg.momentum.max_iter,
                self.comm,
            );
            vector_to_matrix(&x_u, &mut self.mesh.u, &self.mesh.interi, &self.mesh.interj);
            vector_to_matrix(&x_v, &mut self.mesh.v, &self.mesh.interi, &self.mesh.interj);

            exchange_columns(&mut self.mesh.u, self.comm);
            exchange_columns(&mut self.mesh.v, self.comm);
            exchange_columns(&mut self.equ_u.a_p, self.comm);

            discretize::face_velocity(&mut self.mesh, &self.equ_u, self.cfg, self.comm);
            exchange_columns(&mut self.mesh.u_face, self.comm);
            exchange_columns(&mut self.mesh.v_face, self.comm);
            self.comm.barrier();

            self.equ_p.reset();
            discretize::pressure_correction(
                &self.mesh,
                &mut self.equ_p,
                &self.equ_u,
                self.cfg,
                rank,
            );
            self.equ_p.build_matrix(&self.mesh);
            stats.imbalance = self
                .comm
                .allreduce_scalar(self.equ_p.source.norm_squared(), Op::Sum)
                .sqrt();

            self.mesh.p_prime.fill(0.0);
            self.mesh.p_star.fill(0.0);
            let mut x_p = DVector::<f64>::zeros(self.mesh.internumber);
            let res_p = cg::solve(
                &self.equ_p,
                &self.mesh,
                &self.equ_p.source,
                &mut x_p,
                self.cfg.pressure.tol,
                self.cfg.pressure.max_iter,
                self.comm,
            );
            vector_to_matrix(
                &x_p,
                &mut self.mesh.p_prime,
                &self.mesh.interi,
                &self.mesh.interj,
            );
            exchange_columns(&mut self.mesh.p_prime, self.comm);

            discretize::correct_pressure(&mut self.mesh, alpha_p);
            discretize::correct_velocity(&mut self.mesh, &self.equ_u, self.cfg);
            self.mesh.p.copy_from(&self.mesh.p_star);
            exchange_columns(&mut self.mesh.p, self.comm);
            self.comm.barrier();

            // The residual norms are global, so every rank takes the same
            // branch here; a blow-up aborts all ranks together.
            for (system, res) in [
                ("u-momentum", res_u),
                ("v-momentum", res_v),
                ("pressure-correction", res_p),
            ] {
                if !res.is_finite() {
                    return Err(SolverError::NonFinite {
                        system,
                        step,
                        outer: n,
                    });
                }
            }

            if n == 1 {
                init_res = [res_u, res_v, res_p];
            }
            let normalize = |res: f64, init: f64| if init > 1e-200 { res / init } else { 0.0 };
            let norm_u = normalize(res_u, init_res[0]);
            let norm_v = normalize(res_v, init_res[1]);
            let norm_p = normalize(res_p, init_res[2]);
            stats.res_u = res_u;
            stats.res_v = res_v;
            stats.res_p = res_p;

            if rank == 0 {
                info!(
                    step,
                    outer = n,
                    norm_u, norm_v, norm_p, res_u, res_v, res_p, "residuals"
                );
            }

            let local_converged = norm_u < 1e-1 && norm_v < 1e-1 && norm_p < 1e-3;
            let global_converged = self
                .comm
                .allreduce_scalar(if local_converged { 1.0 } else { 0.0 }, Op::Min)
                > 0.5;
            if global_converged {
                if rank == 0 {
                    info!(step, outer = n, "all ranks converged");
                }
                stats.converged = true;
                return Ok(stats);
            }
            self.comm.barrier();
        }
        Ok(stats)
    }
}

/// Splits the global mesh, spawns one in-process rank per strip, runs the
/// SIMPLE driver on each, and returns the final subdomains in rank order.
/// Configuration verification runs on every rank before any field work.
pub fn run_partitioned(
    cfg: &Config,
    global: &Mesh,
    output: Option<&Path>,
) -> Result<Vec<Mesh>, SolverError> {
    let mut subs = split_columns(global, cfg.n_splits)?;

    if cfg.n_splits == 1 {
        let comm = SoloComm;
        cfg.sync_and_verify(&comm)?;
        let mut mesh = subs.remove(0);
        if cfg.load_initial {
            io::load_steady(&mut mesh, Path::new(&cfg.mesh_folder), 0);
        }
        let mut solver = SimpleSolver::new(cfg, mesh, &comm);
        if let Some(dir) = output {
            solver = solver.with_output(dir);
        }
        solver.run()?;
        return Ok(vec![solver.into_mesh()]);
    }

    let comms = ThreadComm::create(cfg.n_splits);
    let results: Vec<Result<Mesh, SolverError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = subs
            .drain(..)
            .zip(comms)
            .map(|(mut mesh, comm)| {
                scope.spawn(move || -> Result<Mesh, SolverError> {
                    cfg.sync_and_verify(&comm)?;
                    if cfg.load_initial {
                        io::load_steady(&mut mesh, Path::new(&cfg.mesh_folder), comm.rank());
                    }
                    let mut solver = SimpleSolver::new(cfg, mesh, &comm);
                    if let Some(dir) = output {
                        solver = solver.with_output(dir);
                    }
                    solver.run()?;
                    Ok(solver.into_mesh())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(Err(SolverError::RankPanicked)))
            .collect()
    });

    results.into_iter().collect()
}
