//! Elapsed-time measurement.
//!
//! All clocks here are `tokio::time::Instant`, so measurements follow a paused
//! runtime clock in tests.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{backend::Session, error::BackendError};

/// Awaits `fut` and returns its output together with how long it took.
pub async fn timed<F: Future>(fut: F) -> (F::Output, Duration) {
    let started = Instant::now();
    let output = fut.await;
    (output, started.elapsed())
}

/// Runs `op` `repeats` times back to back on `session` and returns the mean
/// duration of a single call.
///
/// The first failing call aborts the measurement.
pub async fn measure<S, T, F>(
    session: &mut S,
    repeats: u32,
    mut op: F,
) -> Result<Duration, BackendError>
where
    S: ?Sized + Send,
    F: for<'s> FnMut(&'s mut S) -> BoxFuture<'s, Result<T, BackendError>> + Send,
{
    let repeats = repeats.max(1);
    let started = Instant::now();
    for _ in 0..repeats {
        op(session).await?;
    }
    Ok(started.elapsed() / repeats)
}

/// A read measurement that can be replayed in every phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    LastTimecode { film_id: Uuid, user_id: Uuid },
    MostViewed,
}

impl Probe {
    /// Mean latency of this read over `repeats` calls on one session.
    pub async fn measure(
        self,
        session: &mut Box<dyn Session>,
        repeats: u32,
    ) -> Result<Duration, BackendError> {
        match self {
            Probe::LastTimecode { film_id, user_id } => {
                measure(session, repeats, move |s| s.retrieve_last_timecode(film_id, user_id)).await
            }
            Probe::MostViewed => measure(session, repeats, |s| s.retrieve_most_viewed()).await,
        }
    }
}

#[cfg(all(test, feature = "builtins"))]
mod tests {
    use super::*;
    use crate::backend::{Backend, Latency, MemoryBackend};

    #[tokio::test(start_paused = true)]
    async fn timed_reports_elapsed() {
        let (value, elapsed) = timed(async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            7
        })
        .await;
        assert_eq!(value, 7);
        assert_eq!(elapsed, Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn measure_returns_mean_per_call() {
        let backend = MemoryBackend::builder()
            .latency(Latency {
                read: Duration::from_millis(2),
                ..Latency::default()
            })
            .build();
        let mut session = backend.connect().await.unwrap();

        let mean = Probe::MostViewed.measure(&mut session, 100).await.unwrap();
        assert_eq!(mean, Duration::from_millis(2));
    }

    #[tokio::test]
    async fn measure_stops_at_first_failure() {
        let backend = MemoryBackend::builder()
            .fail_on(crate::backend::Operation::LastTimecode)
            .build();
        let mut session = backend.connect().await.unwrap();
        let probe = Probe::LastTimecode {
            film_id: Uuid::nil(),
            user_id: Uuid::nil(),
        };
        assert!(probe.measure(&mut session, 10).await.is_err());
    }
}
