use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Invalid grid size: {0}")]
    InvalidGridSize(String),

    #[error("Invalid block extents: {0}")]
    InvalidBlock(String),

    #[error("Cannot split {columns} interior columns across {ranks} ranks")]
    InvalidSplit { columns: usize, ranks: usize },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Rank count {actual} does not match n_splits {expected}")]
    RankCountMismatch { expected: usize, actual: usize },

    #[error("Configuration differs across ranks: {0}")]
    Inconsistent(String),
}

#[derive(Error, Debug)]
pub enum IoError {
    #[error("I/O error for {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Malformed matrix file {path}: {reason}")]
    MalformedMatrix { path: String, reason: String },

    #[error("Malformed parameter file {path}: {reason}")]
    MalformedParams { path: String, reason: String },
}

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("Non-finite residual in {system} at time step {step}, outer iteration {outer}")]
    NonFinite {
        system: &'static str,
        step: usize,
        outer: usize,
    },

    #[error("Worker rank panicked")]
    RankPanicked,
}
