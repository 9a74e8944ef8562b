use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dns2d::config::Config;
use dns2d::error::{ConfigError, SolverError};
use dns2d::io;
use dns2d::solver::simple::run_partitioned;

/// Unsteady SIMPLE solver for 2-D incompressible flow on a column-
/// partitioned Cartesian grid. Missing positional arguments are prompted
/// for on standard input.
#[derive(Parser, Debug)]
#[command(name = "dns2d", version)]
struct Cli {
    /// Folder holding params.dat, bctype.dat, zoneid.dat, zones.dat and
    /// optionally steady/ initial fields.
    mesh_folder: Option<PathBuf>,
    /// Time step size.
    dt: Option<f64>,
    /// Number of time steps.
    timesteps: Option<usize>,
    /// Dynamic viscosity.
    mu: Option<f64>,
    /// Number of column strips / peer ranks.
    n_splits: Option<usize>,
    /// Directory for the output fields (defaults to the working directory).
    #[arg(long)]
    output: Option<PathBuf>,
}

fn prompt<T: FromStr>(label: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    print!("{label}: ");
    std::io::stdout()
        .flush()
        .map_err(|e| ConfigError::InvalidParameter(e.to_string()))?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map_err(|e| ConfigError::InvalidParameter(e.to_string()))?;
    line.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidParameter(format!("{label}: {e}")))
}

fn run(cli: Cli) -> Result<(), SolverError> {
    let mesh_folder = match cli.mesh_folder {
        Some(folder) => folder,
        None => PathBuf::from(prompt::<String>("mesh folder")?),
    };
    let dt = match cli.dt {
        Some(dt) => dt,
        None => prompt("time step size")?,
    };
    let timesteps = match cli.timesteps {
        Some(n) => n,
        None => prompt("number of time steps")?,
    };
    let mu = match cli.mu {
        Some(mu) => mu,
        None => prompt("viscosity")?,
    };
    let n_splits = match cli.n_splits {
        Some(n) => n,
        None => prompt("number of splits")?,
    };

    let (dx, dy) = io::read_params(&mesh_folder)?;
    let mesh = io::read_mesh(&mesh_folder)?;
    let cfg = Config::new(
        mesh_folder.display().to_string(),
        dx,
        dy,
        dt,
        mu,
        timesteps,
        n_splits,
        mesh.ny,
        mesh.nx,
    )?;
    info!(
        mesh_folder = %cfg.mesh_folder,
        dx, dy, dt, mu, timesteps, n_splits,
        ny = mesh.ny,
        nx = mesh.nx,
        "starting run"
    );

    let output = cli.output.unwrap_or_else(|| PathBuf::from("."));
    run_partitioned(&cfg, &mesh, Some(&output))?;
    info!("run complete");
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "run failed");
            ExitCode::from(1)
        }
    }
}
