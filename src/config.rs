use serde::Serialize;
use tracing::error;

use crate::comm::{Communicator, Op};
use crate::error::ConfigError;

/// Tolerance and iteration cap for one linear system per outer sweep.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SolveParams {
    pub tol: f64,
    pub max_iter: usize,
}

/// Under-relaxation factors per time step.
///
/// `Scheduled` is the steady-state schedule (cautious pressure relaxation
/// until the flow settles); `Fixed` is the unsteady variant.
#[derive(Debug, Clone, Copy, Serialize)]
pub enum RelaxationPolicy {
    Scheduled,
    Fixed { alpha_uv: f64, alpha_p: f64 },
}

impl RelaxationPolicy {
    pub fn alpha_uv(&self, _step: usize) -> f64 {
        match self {
            RelaxationPolicy::Scheduled => 0.3,
            RelaxationPolicy::Fixed { alpha_uv, .. } => *alpha_uv,
        }
    }

    pub fn alpha_p(&self, step: usize) -> f64 {
        match self {
            RelaxationPolicy::Scheduled => {
                if step < 15 {
                    0.05
                } else {
                    0.15
                }
            }
            RelaxationPolicy::Fixed { alpha_p, .. } => *alpha_p,
        }
    }

    pub fn unsteady() -> Self {
        RelaxationPolicy::Fixed {
            alpha_uv: 0.7,
            alpha_p: 0.5,
        }
    }
}

/// Immutable run configuration, built once at startup and passed by
/// reference into every operation that needs it. All ranks must hold the
/// same values; [`Config::sync_and_verify`] checks that before the
/// iteration begins.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub mesh_folder: String,
    pub dx: f64,
    pub dy: f64,
    pub dt: f64,
    pub mu: f64,
    pub timesteps: usize,
    pub n_splits: usize,
    /// Domain extents, derived from spacing and interior cell counts.
    pub lx: f64,
    pub ly: f64,
    pub momentum: SolveParams,
    pub pressure: SolveParams,
    pub max_outer_iterations: usize,
    pub relax: RelaxationPolicy,
    /// Persist fields every this many time steps; 0 keeps only the final
    /// state.
    pub save_every: usize,
    /// Read the steady-state initial fields from `<mesh_folder>/steady/`.
    pub load_initial: bool,
}

impl Config {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mesh_folder: impl Into<String>,
        dx: f64,
        dy: f64,
        dt: f64,
        mu: f64,
        timesteps: usize,
        n_splits: usize,
        global_ny: usize,
        global_nx: usize,
    ) -> Result<Self, ConfigError> {
        if !(dx > 0.0) || !(dy > 0.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "grid spacing must be positive, got dx={dx}, dy={dy}"
            )));
        }
        if !(dt > 0.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "time step must be positive, got {dt}"
            )));
        }
        if !(mu > 0.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "viscosity must be positive, got {mu}"
            )));
        }
        if n_splits == 0 {
            return Err(ConfigError::InvalidParameter(
                "n_splits must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            mesh_folder: mesh_folder.into(),
            dx,
            dy,
            dt,
            mu,
            timesteps,
            n_splits,
            lx: dx * (global_nx.saturating_sub(2)) as f64,
            ly: dy * (global_ny.saturating_sub(2)) as f64,
            momentum: SolveParams {
                tol: 1e-5,
                max_iter: 25,
            },
            pressure: SolveParams {
                tol: 1e-6,
                max_iter: 150,
            },
            max_outer_iterations: 100,
            relax: RelaxationPolicy::Scheduled,
            save_every: 2,
            load_initial: true,
        })
    }

    /// Verifies that every rank entered the run with the same
    /// configuration: MAX/MIN all-reduces over the numeric values and an
    /// all-gather compare over the mesh folder. Every rank reaches the
    /// same verdict, so a mismatch takes the whole communicator down
    /// before any field work starts.
    pub fn sync_and_verify(&self, comm: &dyn Communicator) -> Result<(), ConfigError> {
        if comm.size() != self.n_splits {
            if comm.rank() == 0 {
                error!(
                    expected = self.n_splits,
                    actual = comm.size(),
                    "rank count does not match n_splits"
                );
            }
            return Err(ConfigError::RankCountMismatch {
                expected: self.n_splits,
                actual: comm.size(),
            });
        }

        let names = ["dx", "dy", "dt", "mu", "timesteps", "n_splits"];
        let vals = [
            self.dx,
            self.dy,
            self.dt,
            self.mu,
            self.timesteps as f64,
            self.n_splits as f64,
        ];
        let max = comm.allreduce(&vals, Op::Max);
        let min = comm.allreduce(&vals, Op::Min);
        let mut mismatched: Vec<&str> = names
            .iter()
            .zip(max.iter().zip(min.iter()))
            .filter(|(_, (hi, lo))| (*hi - *lo).abs() > 1e-12)
            .map(|(name, _)| *name)
            .collect();

        let folders = comm.allgather_string(&self.mesh_folder);
        if folders.iter().any(|f| f != &self.mesh_folder) {
            mismatched.push("mesh_folder");
        }

        if mismatched.is_empty() {
            Ok(())
        } else {
            let detail = mismatched.join(", ");
            if comm.rank() == 0 {
                error!(fields = %detail, "configuration differs across ranks, aborting");
            }
            Err(ConfigError::Inconsistent(detail))
        }
    }
}
