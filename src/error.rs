use std::fmt;

use thiserror::Error;

use crate::backend::Operation;

/// Failure reported by a storage backend.
///
/// The harness never retries or suppresses these; they abort the phase that
/// issued the call.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend could not be reached when opening a session.
    #[error("connection failed: {0}")]
    Connection(String),
    /// A call on an open session failed.
    #[error("{operation} failed: {message}")]
    Operation { operation: Operation, message: String },
}

impl BackendError {
    pub fn operation(operation: Operation, message: impl Into<String>) -> Self {
        Self::Operation {
            operation,
            message: message.into(),
        }
    }
}

/// Errors raised while running one phase of a benchmark.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// A fan-out reader returned an error; its siblings were aborted.
    #[error("reader worker {worker} failed: {source}")]
    Worker {
        worker: usize,
        #[source]
        source: Box<BenchError>,
    },
    #[error("reader worker {worker} panicked")]
    WorkerPanicked { worker: usize },
    /// The consumer went away while the producer still had rows to hand over.
    #[error("write queue closed before the producer finished")]
    QueueClosed,
    #[error("background {0} task panicked")]
    TaskPanicked(&'static str),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// The stages every backend walks through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Preparing,
    Static,
    Stress,
    Parallel,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Preparing => "PREPARING",
            Phase::Static => "STATIC",
            Phase::Stress => "STRESS",
            Phase::Parallel => "PARALLEL",
        };
        f.write_str(name)
    }
}

/// A failed backend run, naming the backend and the phase that aborted it.
#[derive(Debug, Error)]
#[error("backend `{backend}` failed during {phase}: {source}")]
pub struct SuiteError {
    pub backend: String,
    pub phase: Phase,
    #[source]
    pub source: BenchError,
}

impl SuiteError {
    pub fn new(backend: impl Into<String>, phase: Phase, source: impl Into<BenchError>) -> Self {
        Self {
            backend: backend.into(),
            phase,
            source: source.into(),
        }
    }
}
