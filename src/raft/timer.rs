use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Generates a random election timeout within the configured range
pub fn random_election_timeout(min_ms: u64, max_ms: u64) -> Duration {
    let mut rng = rand::thread_rng();
    let timeout_ms = rng.gen_range(min_ms..=max_ms);
    Duration::from_millis(timeout_ms)
}

/// Single-shot election countdown that can be cancelled and rearmed from any task.
///
/// The driver loop sleeps until [`deadline`](Self::deadline) and wakes early
/// through [`rearmed`](Self::rearmed) whenever someone calls [`reset`](Self::reset).
#[derive(Debug)]
pub struct ElectionTimer {
    min_ms: u64,
    max_ms: u64,
    deadline: Mutex<Instant>,
    rearmed: Notify,
}

impl ElectionTimer {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms,
            max_ms,
            deadline: Mutex::new(Instant::now() + random_election_timeout(min_ms, max_ms)),
            rearmed: Notify::new(),
        }
    }

    /// Cancel the pending countdown and start a fresh randomized one.
    pub fn reset(&self) {
        let next = Instant::now() + random_election_timeout(self.min_ms, self.max_ms);
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = next;
        self.rearmed.notify_one();
    }

    pub fn deadline(&self) -> Instant {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline()
    }

    /// Resolves after the next [`reset`](Self::reset).
    pub async fn rearmed(&self) {
        self.rearmed.notified().await;
    }
}
