//! In-process backend with configurable artificial latency.
//!
//! Useful as a baseline next to real storage systems and as a deterministic
//! stand-in in tests: every delay goes through `tokio::time`, so it honours a
//! paused test clock.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::RwLock;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::{Backend, FilmViews, Operation, RowStream, Session};
use crate::{error::BackendError, workload::ViewEvent};

/// Artificial delays applied by [`MemoryBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Latency {
    pub connect: Duration,
    /// Paid once for every row written.
    pub insert_per_row: Duration,
    /// Paid once per read call.
    pub read: Duration,
}

/// A backend that keeps everything in memory.
///
/// All handles cloned from one `MemoryBackend` share the same store and
/// counters, the same way clones of a real client reach the same server.
#[derive(Clone, TypedBuilder)]
pub struct MemoryBackend {
    #[builder(default = String::from("memory"), setter(into))]
    name: String,
    #[builder(default)]
    latency: Latency,
    /// Length of the most-viewed ranking.
    #[builder(default = 10)]
    top_films: usize,
    /// Makes every call of this operation fail.
    #[builder(default, setter(strip_option))]
    fail_on: Option<Operation>,
    /// Makes `connect` fail.
    #[builder(default)]
    unreachable: bool,
    #[builder(default, setter(skip))]
    store: Arc<RwLock<Store>>,
    #[builder(default, setter(skip))]
    stats: Arc<Stats>,
}

#[derive(Default)]
struct Stats {
    clones: AtomicUsize,
    sessions_opened: AtomicUsize,
    sessions_open: AtomicUsize,
}

#[derive(Default)]
struct Store {
    prepared: bool,
    rows: u64,
    views: HashMap<Uuid, u64>,
    progress: HashMap<(Uuid, Uuid), (DateTime<Utc>, u32)>,
}

impl Store {
    fn apply(&mut self, row: ViewEvent) {
        self.rows += 1;
        *self.views.entry(row.film_id).or_default() += 1;
        let latest = self
            .progress
            .entry((row.film_id, row.user_id))
            .or_insert((row.viewed_at, row.timecode));
        if row.viewed_at >= latest.0 {
            *latest = (row.viewed_at, row.timecode);
        }
    }
}

impl MemoryBackend {
    /// Number of `clone_handle` calls made on this backend or any of its clones.
    pub fn clone_count(&self) -> usize {
        self.stats.clones.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.stats.sessions_opened.load(Ordering::SeqCst)
    }

    /// Sessions currently alive. Drops back to zero once every scope is left.
    pub fn sessions_open(&self) -> usize {
        self.stats.sessions_open.load(Ordering::SeqCst)
    }

    /// Total rows written so far.
    pub async fn row_count(&self) -> u64 {
        self.store.read().await.rows
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn clone_handle(&self) -> Box<dyn Backend> {
        self.stats.clones.fetch_add(1, Ordering::SeqCst);
        Box::new(self.clone())
    }

    async fn connect(&self) -> Result<Box<dyn Session>, BackendError> {
        pause(self.latency.connect).await;
        if self.unreachable {
            return Err(BackendError::Connection(format!(
                "{} is not accepting connections",
                self.name
            )));
        }
        self.stats.sessions_opened.fetch_add(1, Ordering::SeqCst);
        self.stats.sessions_open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            store: self.store.clone(),
            stats: self.stats.clone(),
            latency: self.latency,
            top_films: self.top_films,
            fail_on: self.fail_on,
        }))
    }
}

struct MemorySession {
    store: Arc<RwLock<Store>>,
    stats: Arc<Stats>,
    latency: Latency,
    top_films: usize,
    fail_on: Option<Operation>,
}

impl MemorySession {
    fn check(&self, operation: Operation) -> Result<(), BackendError> {
        match self.fail_on {
            Some(failing) if failing == operation => {
                Err(BackendError::operation(operation, "injected failure"))
            }
            _ => Ok(()),
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.stats.sessions_open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn prepare(&mut self) -> Result<(), BackendError> {
        self.check(Operation::Prepare)?;
        self.store.write().await.prepared = true;
        Ok(())
    }

    async fn insert_rows(&mut self, mut rows: RowStream) -> Result<u64, BackendError> {
        self.check(Operation::Insert)?;
        let mut written = 0;
        while let Some(row) = rows.next().await {
            pause(self.latency.insert_per_row).await;
            self.store.write().await.apply(row);
            written += 1;
        }
        Ok(written)
    }

    async fn retrieve_last_timecode(
        &mut self,
        film_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<u32>, BackendError> {
        self.check(Operation::LastTimecode)?;
        pause(self.latency.read).await;
        let store = self.store.read().await;
        Ok(store.progress.get(&(film_id, user_id)).map(|(_, timecode)| *timecode))
    }

    async fn retrieve_most_viewed(&mut self) -> Result<Vec<FilmViews>, BackendError> {
        self.check(Operation::MostViewed)?;
        pause(self.latency.read).await;
        let store = self.store.read().await;
        let mut ranking: Vec<FilmViews> = store
            .views
            .iter()
            .map(|(film_id, views)| FilmViews {
                film_id: *film_id,
                views: *views,
            })
            .collect();
        ranking.sort_by(|a, b| b.views.cmp(&a.views).then(a.film_id.cmp(&b.film_id)));
        ranking.truncate(self.top_films);
        Ok(ranking)
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
