use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const WINDOW: Duration = Duration::from_secs(60);

/// Per-key sliding one-minute request counter.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn per_minute(limit: u32) -> Self {
        Self {
            limit: limit as usize,
            window: WINDOW,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    /// Records a hit for `key` and returns true, or returns false without
    /// recording when the key already has `limit` hits inside the window.
    pub fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        let recent = hits.entry(key.to_string()).or_default();
        while let Some(oldest) = recent.front() {
            if now.duration_since(*oldest) < self.window {
                break;
            }
            recent.pop_front();
        }

        if recent.len() >= self.limit {
            return false;
        }
        recent.push_back(now);
        true
    }

    /// Forgets keys with no hits inside the window.
    pub fn evict_idle_at(&self, now: Instant) -> usize {
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        let before = hits.len();
        hits.retain(|_, recent| {
            recent
                .back()
                .is_some_and(|last| now.duration_since(*last) < self.window)
        });
        before - hits.len()
    }
}
