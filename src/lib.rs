//! Viewbench: a benchmark harness for view-event storage backends.
//!
//! Viewbench compares interchangeable storage systems on the workload of a
//! film-streaming service: every row records how far a user got in a film,
//! and the service needs two reads, "where did this user stop?" and "which
//! films are watched most?". Each backend is measured three ways:
//!
//! - **idle**: bulk insert, then repeated point and aggregate reads;
//! - **under load**: the same reads while a background stream writes at a
//!   fixed rate;
//! - **in parallel**: many independently connected readers issue the same read
//!   at once, and their latencies are averaged.
//!
//! # Architecture
//!
//! - [`Backend`] / [`Session`](backend::Session): the contract a storage
//!   system implements. Handles are cloned, never shared, between workers.
//! - [`ViewGenerator`]: seeded source of synthetic [`ViewEvent`] rows.
//! - [`pipeline`]: the drift-corrected, rate-limited producer and the queue
//!   consumer behind the stress test.
//! - [`fanout`]: runs one measurement on N cloned handles concurrently.
//! - [`Suite`]: walks every registered backend through
//!   `PREPARING -> STATIC -> STRESS -> PARALLEL` and yields a [`ResultRecord`]
//!   per backend.
//! - [`Reporter`]: sends records somewhere (text or JSON on stdout built in).
//!
//! # Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "builtins")]
//! # mod example {
//! use futures::StreamExt;
//! use viewbench::{BenchmarkConfig, MemoryBackend, Reporter, Suite, TextReporter};
//!
//! #[tokio::main]
//! pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BenchmarkConfig::builder()
//!         .rows_count(10_000)
//!         .writes_per_second(200.0)
//!         .readers_count(8)
//!         .build();
//!     let reporter = TextReporter::new(config.static_rows);
//!
//!     let mut suite = Suite::new(config)?;
//!     suite.register(MemoryBackend::builder().name("memory").build());
//!
//!     let mut results = std::pin::pin!(suite.run());
//!     while let Some(result) = results.next().await {
//!         reporter.report(&result?).await?;
//!     }
//!     Ok(())
//! }
//! # }
//! # fn main() {}
//! ```
//!
//! # Feature flags
//! - `builtins`: the in-memory [`MemoryBackend`]. (Enabled by default)
//! - `internals`: access to internal (and unstable) pipeline helpers

/// Storage backend contract and built-in backends
pub mod backend;
pub mod error;
/// Parallel reads across cloned handles
pub mod fanout;
/// Rate-limited background writes
pub mod pipeline;
pub mod record;
/// Reports and Reporters
pub mod report;
/// The orchestrator that glues everything together
pub mod suite;
pub mod timing;
/// Synthetic rows
pub mod workload;

pub use backend::Backend;
#[cfg(feature = "builtins")]
pub use backend::MemoryBackend;
pub use error::{BackendError, BenchError, Phase, SuiteError};
pub use record::ResultRecord;
pub use report::{JsonReporter, Reporter, TextReporter};
pub use suite::{BenchmarkConfig, Suite};
pub use workload::{ViewEvent, ViewGenerator};
