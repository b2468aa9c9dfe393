//! Exponential-backoff retry scheduling for channel reconnection.
//!
//! Decouples "a connection failed" from "how and when to try again". Each
//! realtime channel owns one [`RetryScheduler`]; the scheduler guarantees at
//! most one in-flight timer and a bounded number of attempts, and stays
//! exhausted until an external reset (e.g. a manual refresh).

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Retry policy parameters
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of scheduled attempts before exhaustion
    pub max_retries: u32,
    /// First retry delay; doubles per attempt
    pub base_delay: Duration,
    /// Upper bound on the computed delay before jitter
    pub max_delay: Duration,
    /// Uniform random jitter of up to this fraction of the capped delay
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.1,
        }
    }
}

/// Source of uniform randomness in `[0, 1)` for jitter.
///
/// Injectable so tests can pin delays to exact values.
pub trait JitterSource: Send {
    fn sample(&mut self) -> f64;
}

/// Production jitter source backed by the thread-local RNG
#[derive(Debug, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&mut self) -> f64 {
        rand::thread_rng().r#gen::<f64>()
    }
}

/// Fixed jitter source for deterministic tests
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&mut self) -> f64 {
        self.0
    }
}

/// Outcome of a [`RetryScheduler::schedule_retry`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A timer was scheduled for the given upcoming attempt
    Scheduled { attempt: u32 },
    /// A previously scheduled timer is still pending; nothing was scheduled
    AlreadyPending,
    /// The attempt budget is spent; nothing will be scheduled until reset
    Exhausted,
}

type RetryHook = Box<dyn Fn(u32, Duration) + Send + Sync>;
type ExhaustedHook = Box<dyn Fn() + Send + Sync>;

struct RetryState {
    attempt: u32,
    pending: Option<JoinHandle<()>>,
    exhaustion_notified: bool,
    jitter: Box<dyn JitterSource>,
}

/// Exponential-backoff retry controller with jitter.
///
/// Delay for attempt `n` (0-based) is
/// `min(base_delay * 2^n, max_delay) + uniform(0, jitter_factor) * capped`.
pub struct RetryScheduler {
    config: RetryConfig,
    state: Arc<Mutex<RetryState>>,
    on_retry: Option<RetryHook>,
    on_max_retries_reached: Option<ExhaustedHook>,
}

impl RetryScheduler {
    /// Create a scheduler with the given policy and thread-RNG jitter
    pub fn new(config: RetryConfig) -> Self {
        Self::with_jitter(config, Box::new(ThreadRngJitter))
    }

    /// Create a scheduler with an injected jitter source
    pub fn with_jitter(config: RetryConfig, jitter: Box<dyn JitterSource>) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(RetryState {
                attempt: 0,
                pending: None,
                exhaustion_notified: false,
                jitter,
            })),
            on_retry: None,
            on_max_retries_reached: None,
        }
    }

    /// Register an observability hook invoked with `(attempt, delay)` each
    /// time a retry is scheduled
    pub fn on_retry(mut self, hook: impl Fn(u32, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Box::new(hook));
        self
    }

    /// Register a hook invoked exactly once per exhaustion
    pub fn on_max_retries_reached(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_max_retries_reached = Some(Box::new(hook));
        self
    }

    /// Schedule `callback` to run after the backoff delay for the current
    /// attempt.
    ///
    /// No-ops (with the corresponding outcome) if a retry is already pending
    /// or the attempt budget is spent. Exhaustion invokes the
    /// `on_max_retries_reached` hook exactly once until [`reset`] is called.
    ///
    /// [`reset`]: RetryScheduler::reset
    pub async fn schedule_retry(&self, callback: impl FnOnce() + Send + 'static) -> ScheduleOutcome {
        let mut state = self.state.lock().await;

        if state.pending.is_some() {
            return ScheduleOutcome::AlreadyPending;
        }

        if state.attempt >= self.config.max_retries {
            if !state.exhaustion_notified {
                state.exhaustion_notified = true;
                tracing::warn!(
                    "Retry budget exhausted after {} attempts",
                    self.config.max_retries
                );
                if let Some(hook) = &self.on_max_retries_reached {
                    hook();
                }
            }
            return ScheduleOutcome::Exhausted;
        }

        let delay = self.calculate_delay(state.attempt, state.jitter.sample());
        let upcoming = state.attempt + 1;

        tracing::debug!(
            "Scheduling retry attempt {}/{} in {:?}",
            upcoming,
            self.config.max_retries,
            delay
        );
        if let Some(hook) = &self.on_retry {
            hook(upcoming, delay);
        }

        let shared = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = shared.lock().await;
                state.attempt += 1;
                state.pending = None;
            }
            callback();
        });
        state.pending = Some(handle);

        ScheduleOutcome::Scheduled { attempt: upcoming }
    }

    /// Zero the attempt counter and cancel any pending timer.
    ///
    /// Called on every confirmed successful (re)connection, or by a manual
    /// user-triggered refresh after exhaustion.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.attempt = 0;
        state.exhaustion_notified = false;
        if let Some(handle) = state.pending.take() {
            handle.abort();
        }
    }

    /// Cancel any pending timer without resetting the counter (teardown)
    pub async fn cancel(&self) {
        let mut state = self.state.lock().await;
        if let Some(handle) = state.pending.take() {
            handle.abort();
        }
    }

    /// Number of retries scheduled since the last reset
    pub async fn attempt(&self) -> u32 {
        self.state.lock().await.attempt
    }

    /// Whether a retry timer is currently outstanding
    pub async fn is_retry_pending(&self) -> bool {
        self.state.lock().await.pending.is_some()
    }

    fn calculate_delay(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let exponential = self.config.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = exponential.min(self.config.max_delay.as_secs_f64());
        let jitter = capped * self.config.jitter_factor * jitter_sample;
        Duration::from_secs_f64(capped + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30000),
            jitter_factor: 0.1,
        }
    }

    fn scheduler(max_retries: u32) -> RetryScheduler {
        RetryScheduler::with_jitter(test_config(max_retries), Box::new(FixedJitter(0.0)))
    }

    async fn settle() {
        // Let the spawned timer task register its sleep
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_runs_after_backoff_delay() {
        // given:
        let sched = scheduler(3);
        let fired = Arc::new(AtomicU32::new(0));

        // when:
        let fired_clone = Arc::clone(&fired);
        let outcome = sched
            .schedule_retry(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(outcome, ScheduleOutcome::Scheduled { attempt: 1 });
        settle().await;

        // then: not yet fired before the delay has elapsed
        tokio::time::advance(Duration::from_millis(999)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // and fired once the delay has elapsed
        tokio::time::advance(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(sched.attempt().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_timer_outstanding() {
        // given:
        let sched = scheduler(5);
        let fired = Arc::new(AtomicU32::new(0));

        // when: a second failure arrives while a retry is pending
        let f1 = Arc::clone(&fired);
        sched
            .schedule_retry(move || {
                f1.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        let f2 = Arc::clone(&fired);
        let second = sched
            .schedule_retry(move || {
                f2.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        // then:
        assert_eq!(second, ScheduleOutcome::AlreadyPending);
        settle().await;
        tokio::time::advance(Duration::from_millis(1100)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_notifies_exactly_once() {
        // given: max_retries = 3, base 1000ms, max 30000ms
        let exhausted = Arc::new(AtomicU32::new(0));
        let exhausted_clone = Arc::clone(&exhausted);
        let sched = RetryScheduler::with_jitter(test_config(3), Box::new(FixedJitter(0.0)))
            .on_max_retries_reached(move || {
                exhausted_clone.fetch_add(1, Ordering::SeqCst);
            });

        // when: three failures are retried
        for _ in 0..3 {
            let outcome = sched.schedule_retry(|| {}).await;
            assert!(matches!(outcome, ScheduleOutcome::Scheduled { .. }));
            settle().await;
            tokio::time::advance(Duration::from_millis(30100)).await;
            settle().await;
        }
        assert_eq!(sched.attempt().await, 3);

        // then: the 4th failure triggers exhaustion, schedules no timer
        assert_eq!(sched.schedule_retry(|| {}).await, ScheduleOutcome::Exhausted);
        assert!(!sched.is_retry_pending().await);
        assert_eq!(exhausted.load(Ordering::SeqCst), 1);

        // and further failures do not re-notify
        assert_eq!(sched.schedule_retry(|| {}).await, ScheduleOutcome::Exhausted);
        assert_eq!(exhausted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restores_the_attempt_budget() {
        // given: an exhausted scheduler
        let sched = scheduler(1);
        sched.schedule_retry(|| {}).await;
        settle().await;
        tokio::time::advance(Duration::from_millis(1200)).await;
        settle().await;
        assert_eq!(sched.schedule_retry(|| {}).await, ScheduleOutcome::Exhausted);

        // when:
        sched.reset().await;

        // then:
        assert_eq!(sched.attempt().await, 0);
        assert!(matches!(
            sched.schedule_retry(|| {}).await,
            ScheduleOutcome::Scheduled { attempt: 1 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_timer_but_keeps_attempt_count() {
        // given:
        let sched = scheduler(5);
        let fired = Arc::new(AtomicU32::new(0));
        let f1 = Arc::clone(&fired);
        sched
            .schedule_retry(move || {
                f1.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        settle().await;
        tokio::time::advance(Duration::from_millis(1100)).await;
        settle().await;
        assert_eq!(sched.attempt().await, 1);

        // when: a timer is cancelled mid-flight
        let f2 = Arc::clone(&fired);
        sched
            .schedule_retry(move || {
                f2.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        sched.cancel().await;
        settle().await;
        tokio::time::advance(Duration::from_millis(60000)).await;
        settle().await;

        // then: the cancelled callback never ran, the counter survives
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(sched.attempt().await, 1);
        assert!(!sched.is_retry_pending().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_doubles_and_caps() {
        // given: delays captured via the on_retry hook, zero jitter
        let delays: Arc<std::sync::Mutex<Vec<Duration>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let delays_clone = Arc::clone(&delays);
        let config = RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(4000),
            jitter_factor: 0.1,
        };
        let sched = RetryScheduler::with_jitter(config, Box::new(FixedJitter(0.0))).on_retry(
            move |_attempt, delay| {
                delays_clone.lock().unwrap().push(delay);
            },
        );

        // when:
        for _ in 0..4 {
            sched.schedule_retry(|| {}).await;
            settle().await;
            tokio::time::advance(Duration::from_millis(4100)).await;
            settle().await;
        }

        // then: 1s, 2s, 4s, then capped at 4s
        let recorded = delays.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(4000),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_adds_up_to_the_configured_fraction() {
        // given: a jitter source pinned at its maximum
        let delays: Arc<std::sync::Mutex<Vec<Duration>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let delays_clone = Arc::clone(&delays);
        let sched = RetryScheduler::with_jitter(test_config(5), Box::new(FixedJitter(1.0)))
            .on_retry(move |_attempt, delay| {
                delays_clone.lock().unwrap().push(delay);
            });

        // when:
        sched.schedule_retry(|| {}).await;

        // then: 1000ms + 10% jitter
        assert_eq!(
            delays.lock().unwrap().as_slice(),
            &[Duration::from_millis(1100)]
        );
    }
}
