use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::{CpuId, PhysAddr};

/// Faults raised by the simulation engine behind [`crate::engine::SimulationEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("guest physical access of {len} bytes at {addr} is outside guest memory")]
    OutOfRange { addr: PhysAddr, len: usize },
    #[error("cpu {cpu} does not exist (engine has {count})")]
    NoSuchCpu { cpu: CpuId, count: usize },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed {what} in {path}: {source}")]
    Format {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid engine state: {0}")]
    InvalidState(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level error for a harness run.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("trace output failed: {0}")]
    Trace(#[source] io::Error),
}

