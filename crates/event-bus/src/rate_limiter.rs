//! Publish throttling.
//!
//! [`RateLimiter`] is a fixed-window counter: at most `capacity` units are
//! admitted per `window`. Callers that do not fit are suspended until the
//! window rolls over; nothing is ever dropped or rejected. Waiters queue on a
//! fair async mutex, so they are admitted in arrival order.

use crate::provider::RateLimitConfig;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[cfg(test)]
#[path = "rate_limiter_tests.rs"]
mod tests;

#[derive(Debug)]
struct WindowState {
    started_at: Instant,
    consumed: u32,
}

impl WindowState {
    fn roll_if_elapsed(&mut self, window: Duration, now: Instant) {
        if now >= self.started_at + window {
            self.started_at = now;
            self.consumed = 0;
        }
    }
}

/// Thread-safe token budget shared by every publish path of one client
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    /// Create a limiter admitting `capacity` units per `window`
    ///
    /// A zero capacity or window is raised to the smallest usable value.
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            window: window.max(Duration::from_millis(1)),
            state: Mutex::new(WindowState {
                started_at: Instant::now(),
                consumed: 0,
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.units, config.window())
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit `units`, suspending until the current window has room for them
    ///
    /// Requests larger than the capacity are admitted in capacity-sized
    /// slices, one full window each.
    pub async fn add(&self, units: u32) {
        let mut remaining = units;
        let mut state = self.state.lock().await;

        while remaining > 0 {
            let slice = remaining.min(self.capacity);

            loop {
                state.roll_if_elapsed(self.window, Instant::now());
                if state
                    .consumed
                    .checked_add(slice)
                    .is_some_and(|total| total <= self.capacity)
                {
                    break;
                }

                let resume_at = state.started_at + self.window;
                debug!(
                    requested = slice,
                    consumed = state.consumed,
                    capacity = self.capacity,
                    "Rate limit reached, waiting for next window"
                );
                tokio::time::sleep_until(resume_at).await;
            }

            state.consumed += slice;
            remaining -= slice;
        }
    }

    /// Admit `units` only if that is possible without waiting
    pub fn try_add(&self, units: u32) -> bool {
        if units > self.capacity {
            return false;
        }

        let Ok(mut state) = self.state.try_lock() else {
            return false;
        };

        state.roll_if_elapsed(self.window, Instant::now());
        if state
            .consumed
            .checked_add(units)
            .is_some_and(|total| total <= self.capacity)
        {
            state.consumed += units;
            true
        } else {
            false
        }
    }
}
