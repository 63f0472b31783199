//! Fan-out/fan-in of one measurement across independent readers.
//!
//! Every reader gets its own handle from [`Backend::clone_handle`], so no two
//! readers ever share a connection; what gets measured is per-reader latency
//! under concurrency, not contention on a client object. All readers are
//! spawned up front and released together through a start barrier.
use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::Barrier, task::JoinSet};

use crate::{backend::Backend, error::BenchError};

/// Runs `measurement` on `readers` clones of `template` concurrently and
/// returns one duration per reader, in completion order.
///
/// The first reader to fail aborts all the others; no partial results are
/// returned.
pub async fn run_in_parallel<F, Fut>(
    template: &dyn Backend,
    readers: usize,
    measurement: F,
) -> Result<Vec<Duration>, BenchError>
where
    F: Fn(Box<dyn Backend>) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Result<Duration, BenchError>> + Send + 'static,
{
    let handles: Vec<Box<dyn Backend>> = (0..readers).map(|_| template.clone_handle()).collect();
    let start = Arc::new(Barrier::new(readers));

    tracing::debug!("Spawning {readers} readers against {}", template.name());
    let mut workers = JoinSet::new();
    let mut task_ids = HashMap::with_capacity(readers);
    for (worker, handle) in handles.into_iter().enumerate() {
        let measurement = measurement.clone();
        let start = start.clone();
        let task = workers.spawn(async move {
            start.wait().await;
            (worker, measurement(handle).await)
        });
        task_ids.insert(task.id(), worker);
    }

    let mut durations = Vec::with_capacity(readers);
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((_, Ok(elapsed))) => durations.push(elapsed),
            Ok((worker, Err(source))) => {
                workers.abort_all();
                return Err(BenchError::Worker {
                    worker,
                    source: Box::new(source),
                });
            }
            Err(e) => {
                workers.abort_all();
                let worker = task_ids.get(&e.id()).copied().unwrap_or_default();
                tracing::error!("Reader {worker} panicked: {e}");
                return Err(BenchError::WorkerPanicked { worker });
            }
        }
    }
    Ok(durations)
}

/// Arithmetic mean; zero for no samples.
pub fn mean(durations: &[Duration]) -> Duration {
    if durations.is_empty() {
        return Duration::ZERO;
    }
    durations.iter().sum::<Duration>() / durations.len() as u32
}
