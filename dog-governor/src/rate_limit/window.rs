use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

/// Bounds call starts to `max_calls` within any trailing `window`.
///
/// Unlike a fixed bucket, the allowance never resets at a boundary: a slot
/// frees up only when the oldest recorded start ages out of the window.
/// Waiters are admitted in arrival order.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_calls: usize,
    window: Duration,
    starts: Mutex<VecDeque<Instant>>,
    /// Serializes waiters (tokio's mutex is FIFO-fair)
    turnstile: tokio::sync::Mutex<()>,
}

impl SlidingWindowLimiter {
    /// Create a limiter allowing `max_calls` starts per trailing `window`
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            starts: Mutex::new(VecDeque::with_capacity(max_calls)),
            turnstile: tokio::sync::Mutex::new(()),
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until a call may start, record it, and return how long we waited.
    pub async fn acquire(&self) -> Duration {
        let started = Instant::now();
        let _turn = self.turnstile.lock().await;

        loop {
            match self.reserve(Instant::now()) {
                Ok(()) => break,
                Err(wake_at) => {
                    trace!(
                        wait_ms = wake_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                        "Rate window full, waiting for oldest call to age out"
                    );
                    sleep_until(wake_at).await;
                }
            }
        }

        started.elapsed()
    }

    /// Record a call start if the window has room, without waiting.
    /// Fails while another caller is waiting in [`acquire`](Self::acquire).
    pub fn try_acquire(&self) -> bool {
        match self.turnstile.try_lock() {
            Ok(_turn) => self.reserve(Instant::now()).is_ok(),
            Err(_) => false,
        }
    }

    /// Number of call starts inside the trailing window
    pub fn in_window(&self) -> usize {
        let mut starts = self.starts.lock();
        Self::evict(&mut starts, Instant::now(), self.window);
        starts.len()
    }

    /// True when no call started within the trailing window
    pub fn is_idle(&self) -> bool {
        self.in_window() == 0
    }

    /// When the newest recorded start leaves the window, if any are recorded
    pub fn ages_out_at(&self) -> Option<Instant> {
        let mut starts = self.starts.lock();
        Self::evict(&mut starts, Instant::now(), self.window);
        starts.back().map(|&newest| newest + self.window)
    }

    /// Check and record under one lock so concurrent callers cannot
    /// over-admit. On a full window returns when the oldest start expires.
    fn reserve(&self, now: Instant) -> Result<(), Instant> {
        let mut starts = self.starts.lock();
        Self::evict(&mut starts, now, self.window);

        if starts.len() < self.max_calls {
            starts.push_back(now);
            Ok(())
        } else {
            // Non-empty: len >= max_calls >= 1
            let oldest = starts.front().copied().unwrap_or(now);
            Err(oldest + self.window)
        }
    }

    fn evict(starts: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&oldest) = starts.front() {
            if now.saturating_duration_since(oldest) >= window {
                starts.pop_front();
            } else {
                break;
            }
        }
    }
}
