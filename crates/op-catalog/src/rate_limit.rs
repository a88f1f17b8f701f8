//! Sliding-window rate limiter for outbound catalog requests
//!
//! Each limiter owns one FIFO queue of admission tickets and at most one
//! drain task. The drain task admits tickets in order, recording the start
//! time of every admitted request in the window before the caller runs it.

use op_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

/// Shortest sleep between window rechecks
pub const MIN_SLEEP: Duration = Duration::from_millis(10);

/// Budget for one limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_ms: u64,
}

impl RateLimitConfig {
    pub fn new(max_requests: usize, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }

    /// Local sources never leave the machine and are not throttled
    pub fn unbounded() -> Self {
        Self {
            max_requests: usize::MAX,
            window_ms: 0,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_requests == usize::MAX || self.window_ms == 0
    }

    /// A zero budget over a real window could never admit anything
    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 && self.window_ms > 0 {
            return Err(Error::validation(format!(
                "Rate limit admits no requests per {}ms window",
                self.window_ms
            )));
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Default budget for the primary directory
    pub fn primary() -> Self {
        Self::new(100, 60_000)
    }

    /// Default budget for the secondary directory
    pub fn secondary() -> Self {
        Self::new(50, 60_000)
    }
}

type Ticket = oneshot::Sender<Result<()>>;

#[derive(Default)]
struct LimiterState {
    window: VecDeque<Instant>,
    queue: VecDeque<Ticket>,
    draining: bool,
}

/// Per-source-class request throttle
#[derive(Clone)]
pub struct RateLimiter {
    name: Arc<str>,
    config: RateLimitConfig,
    state: Arc<Mutex<LimiterState>>,
}

impl RateLimiter {
    pub fn new(name: &str, config: RateLimitConfig) -> Self {
        Self {
            name: Arc::from(name),
            config,
            state: Arc::new(Mutex::new(LimiterState::default())),
        }
    }

    pub fn unbounded(name: &str) -> Self {
        Self::new(name, RateLimitConfig::unbounded())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Run `task` once the window has room for it. The task's own outcome is
    /// returned unchanged.
    pub async fn execute<T, F, Fut>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.config.validate()?;
        if !self.config.is_unbounded() {
            self.admit().await?;
        }
        task().await
    }

    async fn admit(&self) -> Result<()> {
        let (ticket, admitted) = oneshot::channel();

        let spawn_drain = {
            let mut state = lock(&self.state);
            state.queue.push_back(ticket);
            !std::mem::replace(&mut state.draining, true)
        };

        if spawn_drain {
            tokio::spawn(drain(self.name.clone(), self.config, self.state.clone()));
        }

        match admitted.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Cancelled(format!(
                "{} rate limiter dropped a queued request",
                self.name
            ))),
        }
    }

    /// Reject every queued request and forget the window. Requests already
    /// running are not interrupted.
    pub fn clear(&self) {
        let rejected = {
            let mut state = lock(&self.state);
            state.window.clear();
            std::mem::take(&mut state.queue)
        };

        let count = rejected.len();
        for ticket in rejected {
            let _ = ticket.send(Err(Error::Cancelled(format!(
                "{} rate limiter was cleared",
                self.name
            ))));
        }
        info!(limiter = %self.name, rejected = count, "Rate limiter cleared");
    }

    /// Requests waiting for admission
    pub fn pending(&self) -> usize {
        lock(&self.state).queue.len()
    }

    /// Admissions still inside the current window
    pub fn in_window(&self) -> usize {
        let window = self.config.window();
        let now = Instant::now();
        lock(&self.state)
            .window
            .iter()
            .filter(|t| now.duration_since(**t) < window)
            .count()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

fn lock(state: &Mutex<LimiterState>) -> MutexGuard<'_, LimiterState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The single admission loop for one limiter. Exits when the queue is empty.
async fn drain(name: Arc<str>, config: RateLimitConfig, state: Arc<Mutex<LimiterState>>) {
    let window = config.window();

    loop {
        let wait = {
            let mut state = lock(&state);

            while state.queue.front().is_some_and(|t| t.is_closed()) {
                state.queue.pop_front();
            }
            if state.queue.is_empty() {
                state.draining = false;
                return;
            }

            let now = Instant::now();
            while state
                .window
                .front()
                .is_some_and(|t| now.duration_since(*t) >= window)
            {
                state.window.pop_front();
            }

            if state.window.len() < config.max_requests {
                state.window.push_back(now);
                if let Some(ticket) = state.queue.pop_front() {
                    let _ = ticket.send(Ok(()));
                }
                None
            } else {
                let oldest = state.window.front().copied().unwrap_or(now);
                Some((oldest + window).saturating_duration_since(now).max(MIN_SLEEP))
            }
        };

        if let Some(wait) = wait {
            debug!(limiter = %name, wait_ms = wait.as_millis() as u64, "Rate window full, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    #[tokio::test(start_paused = true)]
    async fn test_budget_is_respected() {
        let limiter = RateLimiter::new("test", RateLimitConfig::new(2, 1000));
        let starts = Arc::new(Mutex::new(Vec::new()));
        let began = Instant::now();

        let calls = (0..5).map(|_| {
            let starts = starts.clone();
            limiter.execute(move || async move {
                starts.lock().unwrap().push(Instant::now());
                Ok(())
            })
        });
        for outcome in join_all(calls).await {
            assert!(outcome.is_ok());
        }

        let starts = starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 5);
        for first in &starts {
            let in_window = starts
                .iter()
                .filter(|s| **s >= *first && s.duration_since(*first) < Duration::from_millis(1000))
                .count();
            assert!(in_window <= 2, "{} starts inside one window", in_window);
        }
        assert!(began.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_admission_order() {
        let limiter = RateLimiter::new("fifo", RateLimitConfig::new(1, 100));
        let order = Arc::new(Mutex::new(Vec::new()));

        let calls = (0..5).map(|i| {
            let order = order.clone();
            limiter.execute(move || async move {
                order.lock().unwrap().push(i);
                Ok(())
            })
        });
        join_all(calls).await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_errors_propagate_without_refund() {
        let limiter = RateLimiter::new("errors", RateLimitConfig::new(2, 1000));

        let failed: Result<()> = limiter
            .execute(|| async { Err(Error::Server("502".into())) })
            .await;
        assert!(matches!(failed, Err(Error::Server(_))));
        assert_eq!(limiter.in_window(), 1);

        let ok = limiter.execute(|| async { Ok(5) }).await;
        assert_eq!(ok.unwrap(), 5);
        assert_eq!(limiter.in_window(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_rejects_queued_requests() {
        let limiter = RateLimiter::new("clear", RateLimitConfig::new(1, 10_000));
        limiter.execute(|| async { Ok(()) }).await.unwrap();

        let queued: Vec<_> = (0..2)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.execute(|| async { Ok(()) }).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(limiter.pending(), 2);

        limiter.clear();

        for handle in queued {
            let outcome = handle.await.unwrap();
            assert!(matches!(outcome, Err(Error::Cancelled(_))));
        }
        assert_eq!(limiter.in_window(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_fails_immediately() {
        let limiter = RateLimiter::new("empty", RateLimitConfig::new(0, 1000));
        let mut ran = false;

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            limiter.execute(|| {
                ran = true;
                async { Ok(()) }
            }),
        )
        .await
        .expect("zero budget must not queue");

        assert!(matches!(outcome, Err(Error::Validation(_))));
        assert!(!ran);
        assert_eq!(limiter.pending(), 0);
        assert!(RateLimitConfig::new(0, 0).validate().is_ok());
    }

    #[tokio::test]
    async fn test_unbounded_never_waits() {
        let limiter = RateLimiter::unbounded("custom");
        let calls = (0..100).map(|i| limiter.execute(move || async move { Ok(i) }));
        let results: Vec<_> = join_all(calls).await;
        assert_eq!(results.len(), 100);
        assert_eq!(limiter.pending(), 0);
    }
}
