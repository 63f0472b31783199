//! The benchmark orchestrator.
//!
//! Every registered backend walks the same phases in order:
//!
//! ```text
//! PREPARING -> STATIC -> STRESS -> PARALLEL -> DONE
//! ```
//!
//! - **PREPARING**: open a session, `prepare()`, load the initial dataset, settle.
//! - **STATIC**: time a bulk insert of a larger dataset, settle, then time the
//!   point and aggregate reads over `repeats` calls each.
//! - **STRESS**: start a rate-limited [`WriteStream`] on a cloned handle, wait
//!   for it to warm up, repeat the reads, then stop the stream.
//! - **PARALLEL**: fan both reads out over `readers_count` cloned handles and
//!   average the results.
//!
//! The settle and warm-up pauses give the backend time to converge indices and
//! the write stream time to actually start. They are plain sleeps: a
//! probabilistic head start, not a readiness guarantee.
//!
//! A failing phase aborts that backend's run with a [`SuiteError`] naming the
//! backend and phase. No partial [`ResultRecord`] is ever produced.
use std::time::Duration;

use futures::{Stream, StreamExt, future::BoxFuture, stream};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    backend::Backend,
    error::{BenchError, Phase, SuiteError},
    fanout::{mean, run_in_parallel},
    pipeline::WriteStream,
    record::ResultRecord,
    timing::{Probe, timed},
    workload::{ViewEvent, ViewGenerator},
};

/// Parameters of one suite run. Fixed for the duration of a backend's run.
#[derive(Debug, Clone, PartialEq, TypedBuilder, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Rows loaded while preparing, before anything is timed.
    pub rows_count: usize,
    /// Target rate of the background write stream.
    pub writes_per_second: f64,
    /// Concurrent readers in the parallel phase.
    pub readers_count: usize,
    /// Rows in the timed bulk insert.
    #[builder(default = 100_000)]
    pub static_rows: usize,
    /// Calls per read measurement.
    #[builder(default = 100)]
    pub repeats: u32,
    #[builder(default = Duration::from_secs(1))]
    pub settle: Duration,
    #[builder(default = Duration::from_secs(1))]
    pub warm_up: Duration,
    /// Upper bound on the write stream's schedule; sizes the stress dataset.
    #[builder(default = Duration::from_secs(10))]
    pub max_producing_time: Duration,
    /// How long to wait for the write stream to drain after stopping it.
    #[builder(default = Duration::from_secs(5))]
    pub stream_shutdown_timeout: Duration,
    #[builder(default = 0x5eed)]
    pub seed: u64,
}

impl BenchmarkConfig {
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.rows_count == 0 {
            return Err(BenchError::Config("rows_count must be at least 1".into()));
        }
        if self.readers_count == 0 {
            return Err(BenchError::Config("readers_count must be at least 1".into()));
        }
        if self.repeats == 0 {
            return Err(BenchError::Config("repeats must be at least 1".into()));
        }
        if !self.writes_per_second.is_finite() || self.writes_per_second <= 0.0 {
            return Err(BenchError::Config(format!(
                "writes_per_second must be a positive number, got {}",
                self.writes_per_second
            )));
        }
        Ok(())
    }

    /// Rows handed to the producer: enough to keep writing for the whole
    /// `max_producing_time`.
    pub fn stress_rows(&self) -> usize {
        (self.max_producing_time.as_secs_f64() * self.writes_per_second).ceil() as usize
    }
}

/// Runs the benchmark phases over every registered backend.
pub struct Suite {
    config: BenchmarkConfig,
    backends: Vec<Box<dyn Backend>>,
}

struct StaticTimings {
    insert_rows: Duration,
    last_timecode: Duration,
    most_viewed: Duration,
}

struct ReadTimings {
    last_timecode: Duration,
    most_viewed: Duration,
}

impl Suite {
    pub fn new(config: BenchmarkConfig) -> Result<Self, BenchError> {
        config.validate()?;
        Ok(Self {
            config,
            backends: Vec::new(),
        })
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    pub fn register<B: Backend + 'static>(&mut self, backend: B) -> &mut Self {
        self.backends.push(Box::new(backend));
        self
    }

    pub fn backends(&self) -> impl Iterator<Item = &str> {
        self.backends.iter().map(|b| b.name())
    }

    /// Benchmarks every registered backend in registration order, yielding one
    /// result per backend as it completes.
    ///
    /// Each call starts from scratch: nothing from a previous run (queues,
    /// stop signals, generators) is reused. A failed backend yields an error
    /// and the stream moves on to the next one; callers that want to abort the
    /// whole suite simply stop polling.
    ///
    /// The point read targets the film and user of the first initial row, and
    /// that row is inserted like every other one: the measured
    /// `retrieve_last_timecode` is always a hit. Harnesses that read an id
    /// pair missing from the dataset time a miss instead, so their numbers are
    /// not directly comparable.
    pub fn run(&self) -> impl Stream<Item = Result<ResultRecord, SuiteError>> + '_ {
        stream::iter(self.backends.iter()).then(move |backend| self.run_backend(backend.as_ref()))
    }

    async fn run_backend(&self, backend: &dyn Backend) -> Result<ResultRecord, SuiteError> {
        let name = backend.name().to_owned();
        let fail = |phase: Phase| {
            let name = name.clone();
            move |source: BenchError| SuiteError::new(name, phase, source)
        };

        let mut generator = ViewGenerator::new(self.config.seed);
        let mut initial = generator.generate(self.config.rows_count).peekable();
        let probe_row = initial
            .peek()
            .cloned()
            .ok_or_else(|| BenchError::Config("initial dataset is empty".into()))
            .map_err(fail(Phase::Preparing))?;

        tracing::info!("[{}] {}", name, Phase::Preparing);
        self.prepare(backend, initial).await.map_err(fail(Phase::Preparing))?;

        tracing::info!("[{}] {}", name, Phase::Static);
        let static_rows: Vec<ViewEvent> = generator.generate(self.config.static_rows).collect();
        let idle = self
            .run_static(backend, static_rows, &probe_row)
            .await
            .map_err(fail(Phase::Static))?;

        tracing::info!("[{}] {}", name, Phase::Stress);
        let stress_rows = generator.generate(self.config.stress_rows());
        let loaded = self
            .run_stress(backend, stress_rows, &probe_row)
            .await
            .map_err(fail(Phase::Stress))?;

        tracing::info!("[{}] {}", name, Phase::Parallel);
        let parallel = self
            .run_parallel(backend, &probe_row)
            .await
            .map_err(fail(Phase::Parallel))?;

        tracing::info!("[{}] DONE", name);
        Ok(ResultRecord {
            backend: name,
            insert_rows: idle.insert_rows,
            retrieve_last_timecode: idle.last_timecode,
            retrieve_most_viewed: idle.most_viewed,
            retrieve_last_timecode_under_load: loaded.last_timecode,
            retrieve_most_viewed_under_load: loaded.most_viewed,
            retrieve_last_timecode_in_parallel: parallel.last_timecode,
            retrieve_most_viewed_in_parallel: parallel.most_viewed,
        })
    }

    async fn prepare<I>(&self, backend: &dyn Backend, initial: I) -> Result<(), BenchError>
    where
        I: Iterator<Item = ViewEvent> + Send + 'static,
    {
        {
            let mut session = backend.connect().await?;
            session.prepare().await?;
            let written = session.insert_rows(stream::iter(initial).boxed()).await?;
            tracing::debug!("Loaded {written} initial rows");
        }
        tokio::time::sleep(self.config.settle).await;
        Ok(())
    }

    async fn run_static(
        &self,
        backend: &dyn Backend,
        rows: Vec<ViewEvent>,
        probe_row: &ViewEvent,
    ) -> Result<StaticTimings, BenchError> {
        let mut session = backend.connect().await?;
        let (written, insert_rows) = timed(session.insert_rows(stream::iter(rows).boxed())).await;
        let written = written?;
        tracing::debug!("Inserted {written} rows in {insert_rows:?}");
        tokio::time::sleep(self.config.settle).await;

        let last_timecode = point_read(probe_row)
            .measure(&mut session, self.config.repeats)
            .await?;
        let most_viewed = Probe::MostViewed
            .measure(&mut session, self.config.repeats)
            .await?;
        Ok(StaticTimings {
            insert_rows,
            last_timecode,
            most_viewed,
        })
    }

    async fn run_stress<I>(
        &self,
        backend: &dyn Backend,
        rows: I,
        probe_row: &ViewEvent,
    ) -> Result<ReadTimings, BenchError>
    where
        I: Iterator<Item = ViewEvent> + Send + 'static,
    {
        let stream = WriteStream::start(backend.clone_handle(), rows, self.config.writes_per_second);
        tokio::time::sleep(self.config.warm_up).await;

        let timings = {
            let mut session = backend.connect().await?;
            ReadTimings {
                last_timecode: point_read(probe_row)
                    .measure(&mut session, self.config.repeats)
                    .await?,
                most_viewed: Probe::MostViewed
                    .measure(&mut session, self.config.repeats)
                    .await?,
            }
        };

        if let Some(summary) = stream.finish(self.config.stream_shutdown_timeout).await? {
            tracing::debug!(
                "Write stream produced {} rows, wrote {}",
                summary.produced,
                summary.written
            );
        }
        Ok(timings)
    }

    async fn run_parallel(
        &self,
        backend: &dyn Backend,
        probe_row: &ViewEvent,
    ) -> Result<ReadTimings, BenchError> {
        let readers = self.config.readers_count;
        let last_timecode =
            run_in_parallel(backend, readers, measure_fresh(point_read(probe_row), self.config.repeats))
                .await?;
        let most_viewed =
            run_in_parallel(backend, readers, measure_fresh(Probe::MostViewed, self.config.repeats))
                .await?;
        Ok(ReadTimings {
            last_timecode: mean(&last_timecode),
            most_viewed: mean(&most_viewed),
        })
    }
}

fn point_read(row: &ViewEvent) -> Probe {
    Probe::LastTimecode {
        film_id: row.film_id,
        user_id: row.user_id,
    }
}

/// Measurement run by each parallel reader: open its own session, then probe.
fn measure_fresh(
    probe: Probe,
    repeats: u32,
) -> impl Fn(Box<dyn Backend>) -> BoxFuture<'static, Result<Duration, BenchError>>
+ Send
+ Sync
+ Clone
+ 'static {
    move |handle: Box<dyn Backend>| -> BoxFuture<'static, Result<Duration, BenchError>> {
        Box::pin(async move {
            let mut session = handle.connect().await?;
            Ok::<_, BenchError>(probe.measure(&mut session, repeats).await?)
        })
    }
}

#[cfg(all(test, feature = "builtins"))]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Operation};

    fn config() -> BenchmarkConfig {
        BenchmarkConfig::builder()
            .rows_count(100)
            .writes_per_second(100.0)
            .readers_count(2)
            .static_rows(200)
            .repeats(5)
            .settle(Duration::from_millis(10))
            .warm_up(Duration::from_millis(50))
            .max_producing_time(Duration::from_secs(1))
            .build()
    }

    #[test]
    fn builder_defaults() {
        let config = BenchmarkConfig::builder()
            .rows_count(10)
            .writes_per_second(50.0)
            .readers_count(4)
            .build();
        assert_eq!(config.static_rows, 100_000);
        assert_eq!(config.repeats, 100);
        assert_eq!(config.settle, Duration::from_secs(1));
        assert_eq!(config.warm_up, Duration::from_secs(1));
        assert_eq!(config.stress_rows(), 500);
    }

    #[test]
    fn rejects_unusable_configs() {
        let mut bad = config();
        bad.readers_count = 0;
        assert!(matches!(bad.validate(), Err(BenchError::Config(_))));

        let mut bad = config();
        bad.writes_per_second = 0.0;
        assert!(Suite::new(bad).is_err());

        let mut bad = config();
        bad.writes_per_second = f64::NAN;
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.rows_count = 0;
        assert!(bad.validate().is_err());

        assert!(config().validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn loads_every_dataset() {
        let backend = MemoryBackend::builder().build();
        let mut suite = Suite::new(config()).unwrap();
        suite.register(backend.clone());

        let records: Vec<_> = suite.run().collect().await;
        assert_eq!(records.len(), 1);
        let record = records.into_iter().next().unwrap().unwrap();
        assert_eq!(record.backend, "memory");

        // Initial rows plus the timed insert, plus whatever the stream wrote.
        let rows = backend.row_count().await;
        assert!(rows > 300, "only {rows} rows written");
        assert!(rows <= 300 + config().stress_rows() as u64);
        assert_eq!(backend.sessions_open(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn point_read_targets_a_stored_row() {
        let backend = MemoryBackend::builder().build();
        let mut suite = Suite::new(config()).unwrap();
        suite.register(backend.clone());
        suite.run().collect::<Vec<_>>().await;

        let first = ViewGenerator::new(config().seed)
            .generate(1)
            .next()
            .unwrap();
        let mut session = backend.connect().await.unwrap();
        let timecode = session
            .retrieve_last_timecode(first.film_id, first.user_id)
            .await
            .unwrap();
        assert!(timecode.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_names_backend_and_phase() {
        let mut suite = Suite::new(config()).unwrap();
        suite
            .register(MemoryBackend::builder().name("broken").fail_on(Operation::MostViewed).build())
            .register(MemoryBackend::builder().name("healthy").build());

        let results: Vec<_> = suite.run().collect().await;
        assert_eq!(results.len(), 2);

        let err = results[0].as_ref().unwrap_err();
        assert_eq!(err.backend, "broken");
        assert_eq!(err.phase, Phase::Static);
        assert_eq!(results[1].as_ref().unwrap().backend, "healthy");
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_backend_fails_while_preparing() {
        let mut suite = Suite::new(config()).unwrap();
        suite.register(MemoryBackend::builder().unreachable(true).build());

        let results: Vec<_> = suite.run().collect().await;
        let err = results[0].as_ref().unwrap_err();
        assert_eq!(err.phase, Phase::Preparing);
        assert!(matches!(err.source, BenchError::Backend(_)));
    }

    #[test]
    fn lists_registered_backends() {
        let mut suite = Suite::new(config()).unwrap();
        suite
            .register(MemoryBackend::builder().name("a").build())
            .register(MemoryBackend::builder().name("b").build());
        assert_eq!(suite.backends().collect::<Vec<_>>(), ["a", "b"]);
    }
}
