//! The contract a storage system has to satisfy to be benchmarked.
//!
//! A [`Backend`] is a cheap handle describing how to reach a storage system. It
//! never carries connection state itself: [`Backend::connect`] opens a
//! [`Session`], and the session is the only place per-connection state lives.
//! Dropping the session releases the connection, so every exit path (normal
//! return, `?`, panic unwinding) closes it.
//!
//! Handles are never shared between concurrent workers. Whenever the harness
//! needs another worker to talk to the same backend it calls
//! [`Backend::clone_handle`], which must return a handle that can be used
//! alongside the handle it came from and all other clones.
//!
//! # Example
//! ```rust
//! use async_trait::async_trait;
//! use viewbench::backend::{Backend, FilmViews, RowStream, Session};
//! use viewbench::BackendError;
//! use futures::StreamExt;
//! use uuid::Uuid;
//!
//! #[derive(Clone)]
//! struct Blackhole;
//!
//! struct BlackholeSession;
//!
//! #[async_trait]
//! impl Backend for Blackhole {
//!     fn name(&self) -> &str {
//!         "blackhole"
//!     }
//!
//!     fn clone_handle(&self) -> Box<dyn Backend> {
//!         Box::new(self.clone())
//!     }
//!
//!     async fn connect(&self) -> Result<Box<dyn Session>, BackendError> {
//!         Ok(Box::new(BlackholeSession))
//!     }
//! }
//!
//! #[async_trait]
//! impl Session for BlackholeSession {
//!     async fn prepare(&mut self) -> Result<(), BackendError> {
//!         Ok(())
//!     }
//!
//!     async fn insert_rows(&mut self, rows: RowStream) -> Result<u64, BackendError> {
//!         Ok(rows.count().await as u64)
//!     }
//!
//!     async fn retrieve_last_timecode(
//!         &mut self,
//!         _film_id: Uuid,
//!         _user_id: Uuid,
//!     ) -> Result<Option<u32>, BackendError> {
//!         Ok(None)
//!     }
//!
//!     async fn retrieve_most_viewed(&mut self) -> Result<Vec<FilmViews>, BackendError> {
//!         Ok(vec![])
//!     }
//! }
//! ```
#[cfg(feature = "builtins")]
pub mod memory;

#[cfg(feature = "builtins")]
pub use memory::{Latency, MemoryBackend};

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::BackendError, workload::ViewEvent};

/// Lazily produced rows handed to [`Session::insert_rows`].
pub type RowStream = BoxStream<'static, ViewEvent>;

/// A pluggable storage system under benchmark.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Name used in reports.
    fn name(&self) -> &str;

    /// Independent handle to the same backend.
    fn clone_handle(&self) -> Box<dyn Backend>;

    /// Opens a connection scope. The connection is released when the returned
    /// session is dropped.
    async fn connect(&self) -> Result<Box<dyn Session>, BackendError>;
}

impl Clone for Box<dyn Backend> {
    fn clone(&self) -> Self {
        self.clone_handle()
    }
}

/// An open connection to a backend.
#[async_trait]
pub trait Session: Send {
    /// Creates tables, collections or indices. Must be idempotent.
    async fn prepare(&mut self) -> Result<(), BackendError>;

    /// Bulk-writes every row of `rows`, returning how many were written.
    ///
    /// The stream may be unbounded in time (it is fed by a rate-limited
    /// producer during stress tests); implementations should write as rows
    /// arrive rather than collecting the stream first.
    async fn insert_rows(&mut self, rows: RowStream) -> Result<u64, BackendError>;

    /// Point read: the latest timecode `user_id` reached in `film_id`.
    async fn retrieve_last_timecode(
        &mut self,
        film_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<u32>, BackendError>;

    /// Aggregate read: films ranked by number of views.
    async fn retrieve_most_viewed(&mut self) -> Result<Vec<FilmViews>, BackendError>;
}

/// One entry of the most-viewed ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilmViews {
    pub film_id: Uuid,
    pub views: u64,
}

/// Session calls, used to label backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Prepare,
    Insert,
    LastTimecode,
    MostViewed,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Prepare => "prepare",
            Operation::Insert => "insert",
            Operation::LastTimecode => "last-timecode read",
            Operation::MostViewed => "most-viewed read",
        };
        f.write_str(name)
    }
}
