//! Synthetic view events.
//!
//! Every row is a "user watched film X up to second Y" progress event. The
//! generator is seeded so that every backend in a run is fed the exact same
//! data, and film/user identifiers come from bounded pools so aggregate reads
//! have something to rank.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use uuid::{Builder, Uuid};

const DEFAULT_FILMS: usize = 1_000;
const DEFAULT_USERS: usize = 10_000;
/// Longest film, in seconds.
const MAX_TIMECODE: u32 = 4 * 60 * 60;
/// Events are spread over the year that starts here (2024-01-01T00:00:00Z).
const EPOCH_BASE: i64 = 1_704_067_200;

/// One unit of workload: a film view progress event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewEvent {
    pub film_id: Uuid,
    pub user_id: Uuid,
    /// Position in the film, in seconds.
    pub timecode: u32,
    pub viewed_at: DateTime<Utc>,
}

/// Deterministic source of [`ViewEvent`]s.
pub struct ViewGenerator {
    rng: ChaCha8Rng,
    films: usize,
    users: usize,
}

impl ViewGenerator {
    pub fn new(seed: u64) -> Self {
        Self::with_pools(seed, DEFAULT_FILMS, DEFAULT_USERS)
    }

    /// Pool sizes are clamped to at least one id each.
    pub fn with_pools(seed: u64, films: usize, users: usize) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            films: films.max(1),
            users: users.max(1),
        }
    }

    /// Returns a fresh, finite, lazily evaluated sequence of `count` rows.
    ///
    /// Each call advances the generator, so two calls never yield the same
    /// sequence.
    pub fn generate(&mut self, count: usize) -> Rows {
        Rows {
            rng: ChaCha8Rng::seed_from_u64(self.rng.r#gen()),
            remaining: count,
            films: self.films,
            users: self.users,
        }
    }
}

/// Iterator returned by [`ViewGenerator::generate`].
pub struct Rows {
    rng: ChaCha8Rng,
    remaining: usize,
    films: usize,
    users: usize,
}

impl Iterator for Rows {
    type Item = ViewEvent;

    fn next(&mut self) -> Option<ViewEvent> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let film = self.rng.gen_range(0..self.films) as u64;
        let user = self.rng.gen_range(0..self.users) as u64;
        let offset = self.rng.gen_range(0..86_400 * 365);
        Some(ViewEvent {
            film_id: pool_id(b'f', film),
            user_id: pool_id(b'u', user),
            timecode: self.rng.gen_range(0..MAX_TIMECODE),
            viewed_at: DateTime::<Utc>::UNIX_EPOCH + ChronoDuration::seconds(EPOCH_BASE + offset),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Rows {}

/// Stable v4-shaped id for the n-th member of a pool.
fn pool_id(kind: u8, index: u64) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes[0] = kind;
    bytes[8..].copy_from_slice(&index.to_be_bytes());
    Builder::from_random_bytes(bytes).into_uuid()
}
