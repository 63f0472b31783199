//! Background write stream used by the stress test.
//!
//! Two tasks cooperate through an unbounded queue:
//!
//! 1. The **producer** emits rows at a fixed rate. Row `i` is due at
//!    `start + i / rate`; the producer sleeps until that deadline instead of
//!    sleeping a fixed period, so scheduler jitter on one row does not shift
//!    every row after it and the long-run rate converges to the target.
//! 2. The **consumer** holds its own backend handle and forwards everything it
//!    pops from the queue into a single `insert_rows` call.
//!
//! The producer owns the only sender. When it returns (input exhausted, stop
//! requested, or an error) the sender is dropped and the queue closes exactly
//! once, which ends the consumer's row stream. There is no in-band sentinel
//! row.
//!
//! Early termination goes through a [`StopSignal`]: written once by the
//! orchestrator, raced against the producer's sleep so a stop interrupts the
//! wait for the next row, and checked again after each emit. It never resets.
use std::{sync::Arc, time::Duration};

use futures::{StreamExt, stream};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};

use crate::{
    backend::{Backend, RowStream},
    error::BenchError,
    workload::ViewEvent,
};
use internals::*;

/// Monotonic, single-writer request to stop producing.
///
/// Raising it wakes a producer that is sleeping until its next row.
#[derive(Debug, Clone)]
pub struct StopSignal(Arc<watch::Sender<bool>>);

impl Default for StopSignal {
    fn default() -> Self {
        let (tx, _) = watch::channel(false);
        Self(Arc::new(tx))
    }
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        let mut rx = self.0.subscribe();
        // The sender lives in `self`, so the channel can't close under us.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Sending half of the row queue. Not `Clone`: one producer, one close.
pub struct RowSender(mpsc::UnboundedSender<ViewEvent>);

/// Receiving half of the row queue.
pub struct RowReceiver(mpsc::UnboundedReceiver<ViewEvent>);

pub fn row_queue() -> (RowSender, RowReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RowSender(tx), RowReceiver(rx))
}

impl RowSender {
    pub fn push(&self, row: ViewEvent) -> Result<(), BenchError> {
        self.0.send(row).map_err(|_| BenchError::QueueClosed)
    }
}

impl RowReceiver {
    /// Rows in FIFO order; the stream ends once the sender is gone and the
    /// queue is drained.
    pub fn into_stream(self) -> RowStream {
        let mut rx = self.0;
        stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed()
    }
}

/// Emits `rows` into `queue` at `rate` rows per second until the input runs
/// out or `stop` is raised. Returns the number of rows emitted.
///
/// The queue is closed when this returns, on every path.
pub async fn produce<I>(
    rows: I,
    rate: f64,
    stop: StopSignal,
    queue: RowSender,
) -> Result<u64, BenchError>
where
    I: IntoIterator<Item = ViewEvent>,
{
    let start = Instant::now();
    let mut emitted = 0;
    for (index, row) in rows.into_iter().enumerate() {
        tokio::select! {
            _ = tokio::time::sleep_until(emission_deadline(start, rate, index as u64)) => {}
            _ = stop.stopped() => {
                tracing::debug!("Producer received stop signal while waiting for row {index}");
                break;
            }
        }
        if stop.is_stopped() {
            break;
        }
        queue.push(row)?;
        emitted += 1;
        if stop.is_stopped() {
            break;
        }
    }
    tracing::debug!("Producer emitted {emitted} rows, closing queue");
    Ok(emitted)
}

/// Drains `queue` into `backend` through one `insert_rows` call and returns
/// the number of rows written.
pub async fn consume(backend: Box<dyn Backend>, queue: RowReceiver) -> Result<u64, BenchError> {
    let mut session = backend.connect().await?;
    let written = session.insert_rows(queue.into_stream()).await?;
    tracing::debug!("Consumer wrote {written} rows to {}", backend.name());
    Ok(written)
}

/// Row counts of a finished [`WriteStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub produced: u64,
    pub written: u64,
}

/// A running producer/consumer pair.
///
/// Dropping an unfinished stream raises its stop signal; the producer then
/// closes the queue and the consumer drains out on its own.
pub struct WriteStream {
    stop: StopSignal,
    producer: Option<JoinHandle<Result<u64, BenchError>>>,
    consumer: Option<JoinHandle<Result<u64, BenchError>>>,
}

impl WriteStream {
    /// Spawns the producer and the consumer. `backend` should be a handle
    /// dedicated to the consumer.
    pub fn start<I>(backend: Box<dyn Backend>, rows: I, rate: f64) -> Self
    where
        I: IntoIterator<Item = ViewEvent>,
        I::IntoIter: Send + 'static,
    {
        let stop = StopSignal::new();
        let (tx, rx) = row_queue();
        tracing::debug!("Starting write stream at {rate} rows/s");
        let producer = tokio::spawn(produce(rows.into_iter(), rate, stop.clone(), tx));
        let consumer = tokio::spawn(consume(backend, rx));
        Self {
            stop,
            producer: Some(producer),
            consumer: Some(consumer),
        }
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Stops the producer and waits up to `timeout` for both tasks.
    ///
    /// A task error fails the stream. When the wait times out the tasks are
    /// left running detached and `Ok(None)` is returned.
    pub async fn finish(mut self, timeout: Duration) -> Result<Option<StreamSummary>, BenchError> {
        self.stop.stop();
        let producer = self.producer.take();
        let consumer = self.consumer.take();

        let joined = tokio::time::timeout(timeout, async move {
            let produced = join(producer, "producer").await;
            let written = join(consumer, "consumer").await;
            (produced, written)
        })
        .await;

        match joined {
            Ok((produced, written)) => {
                // The consumer's error explains a producer QueueClosed, so it goes first.
                let written = written?;
                let produced = produced?;
                Ok(Some(StreamSummary { produced, written }))
            }
            Err(_) => {
                tracing::warn!(
                    "Write stream did not drain within {timeout:?}, leaving it running detached"
                );
                Ok(None)
            }
        }
    }
}

impl Drop for WriteStream {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

async fn join(
    handle: Option<JoinHandle<Result<u64, BenchError>>>,
    role: &'static str,
) -> Result<u64, BenchError> {
    match handle {
        Some(handle) => handle.await.map_err(|_| BenchError::TaskPanicked(role))?,
        None => Ok(0),
    }
}

#[cfg(feature = "internals")]
pub use internals::*;

mod internals {
    use super::*;

    /// When row `index` is due: `start + index / rate`.
    ///
    /// Deadlines are absolute, so a late wake-up shortens the next sleep
    /// instead of pushing back the whole schedule.
    pub fn emission_deadline(start: Instant, rate: f64, index: u64) -> Instant {
        start + Duration::from_secs_f64(index as f64 / rate)
    }
}

#[cfg(all(test, feature = "builtins"))]
mod tests {
    use super::*;
    use crate::{
        backend::{MemoryBackend, Operation},
        workload::ViewGenerator,
    };

    fn rows(count: usize) -> impl Iterator<Item = ViewEvent> + Send + 'static {
        ViewGenerator::new(11).generate(count)
    }

    mod emission_deadline {
        use super::*;

        #[test]
        fn first_row_is_due_immediately() {
            let start = Instant::now();
            assert_eq!(emission_deadline(start, 50.0, 0), start);
        }

        #[test]
        fn deadlines_follow_the_ideal_schedule() {
            let start = Instant::now();
            assert_eq!(emission_deadline(start, 50.0, 1), start + Duration::from_millis(20));
            assert_eq!(emission_deadline(start, 50.0, 50), start + Duration::from_secs(1));
            assert_eq!(emission_deadline(start, 4.0, 10), start + Duration::from_millis(2_500));
        }

        #[test]
        fn deadlines_do_not_accumulate_rounding() {
            let start = Instant::now();
            let late = emission_deadline(start, 3.0, 300_000);
            assert_eq!(late, start + Duration::from_secs(100_000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn closes_queue_once_after_exhausting_input() {
        let (tx, rx) = row_queue();
        let emitted = produce(rows(25), 1_000.0, StopSignal::new(), tx)
            .await
            .unwrap();

        let mut stream = rx.into_stream();
        let mut received = 0;
        while stream.next().await.is_some() {
            received += 1;
        }
        assert_eq!(emitted, 25);
        assert_eq!(received, 25);
        // Stays closed.
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn emits_at_most_rate_times_window_plus_one() {
        let (tx, mut rx) = row_queue();
        let producer = tokio::spawn(produce(rows(1_000), 50.0, StopSignal::new(), tx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let mut in_window = 0;
        while rx.0.try_recv().is_ok() {
            in_window += 1;
        }
        assert!(in_window <= 51, "emitted {in_window} rows in 1s at 50 rows/s");
        assert!(in_window >= 49, "emitted only {in_window} rows in 1s at 50 rows/s");
        producer.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_within_one_period_and_still_closes() {
        let stop = StopSignal::new();
        let (tx, rx) = row_queue();
        let producer = tokio::spawn(produce(rows(100), 10.0, stop.clone(), tx));

        tokio::time::sleep(Duration::from_millis(350)).await;
        stop.stop();
        let emitted = producer.await.unwrap().unwrap();

        // Rows were due at 0, 100, 200 and 300ms; the 400ms slot sees the stop.
        assert!((3..=5).contains(&emitted), "emitted {emitted}");
        let received = rx.into_stream().count().await as u64;
        assert_eq!(received, emitted);
    }

    #[tokio::test]
    async fn stop_before_start_emits_nothing() {
        let stop = StopSignal::new();
        stop.stop();
        let (tx, rx) = row_queue();
        let emitted = produce(rows(10), 100.0, stop, tx).await.unwrap();
        assert_eq!(emitted, 0);
        assert_eq!(rx.into_stream().count().await, 0);
    }

    #[tokio::test]
    async fn push_fails_once_consumer_is_gone() {
        let (tx, rx) = row_queue();
        drop(rx);
        let err = produce(rows(3), 1_000.0, StopSignal::new(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::QueueClosed));
    }

    #[tokio::test]
    async fn consumer_returns_when_queue_closes() {
        let backend = MemoryBackend::builder().build();
        let (tx, rx) = row_queue();
        let consumer = tokio::spawn(consume(backend.clone_handle(), rx));

        for row in rows(3) {
            tx.push(row).unwrap();
        }
        drop(tx);

        assert_eq!(consumer.await.unwrap().unwrap(), 3);
        assert_eq!(backend.row_count().await, 3);
        assert_eq!(backend.sessions_open(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn write_stream_stops_early_and_drains() {
        let backend = MemoryBackend::builder().build();
        let stream = WriteStream::start(backend.clone_handle(), rows(1_000), 50.0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let summary = stream
            .finish(Duration::from_secs(5))
            .await
            .unwrap()
            .expect("stream drained");

        assert!(summary.produced < 1_000);
        assert!(summary.produced >= 49);
        assert_eq!(summary.written, summary.produced);
        assert_eq!(backend.row_count().await, summary.written);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_a_long_wait_for_the_next_row() {
        let backend = MemoryBackend::builder().build();
        // One row every 10s, far longer than the shutdown timeout.
        let stream = WriteStream::start(backend.clone_handle(), rows(5), 0.1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let started = Instant::now();
        let summary = stream
            .finish(Duration::from_secs(5))
            .await
            .unwrap()
            .expect("stream drained before the timeout");

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(summary.produced, 1);
        assert_eq!(summary.written, 1);
        assert_eq!(backend.sessions_open(), 0);
    }

    #[tokio::test]
    async fn stopped_resolves_after_stop() {
        let stop = StopSignal::new();
        let waiter = tokio::spawn({
            let stop = stop.clone();
            async move { stop.stopped().await }
        });
        stop.stop();
        waiter.await.unwrap();
        assert!(stop.is_stopped());
        // Already stopped: resolves immediately.
        stop.stopped().await;
    }

    #[tokio::test]
    async fn dropping_write_stream_raises_stop() {
        let backend = MemoryBackend::builder().build();
        let stream = WriteStream::start(backend.clone_handle(), rows(10), 1.0);
        let stop = stream.stop_signal().clone();
        drop(stream);
        assert!(stop.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn consumer_failure_fails_the_stream() {
        let backend = MemoryBackend::builder().fail_on(Operation::Insert).build();
        let stream = WriteStream::start(backend.clone_handle(), rows(100), 100.0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let err = stream.finish(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, BenchError::Backend(_)));
    }
}
