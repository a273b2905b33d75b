//! Sliding-window rate limiting for external services.
//!
//! One [`RateLimiter`] instance serves the whole process: it keeps a lazily
//! populated registry of per-service windows, so different services never
//! contend with each other. The window arithmetic itself is pure and driven
//! by an explicit clock value; only the schedulers consult the real clock.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use vulcan_core::config::{RateLimitEntry, Settings};
use vulcan_core::error::AppError;

/// Admission bounds for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Steady-state admissions per period.
    pub calls: u32,
    /// Length of the trailing window.
    pub period: Duration,
    /// Extra admissions tolerated above the steady-state rate.
    pub burst: u32,
}

impl LimiterConfig {
    /// Creates a config with no burst allowance.
    ///
    /// `calls` is clamped to at least 1: a window that can never admit
    /// anything would make every caller wait forever.
    pub fn new(calls: u32, period: Duration) -> Self {
        Self {
            calls: calls.max(1),
            period,
            burst: 0,
        }
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    /// Most calls the window may hold at once.
    pub fn capacity(&self) -> usize {
        (self.calls + self.burst) as usize
    }

    fn from_entry(entry: &RateLimitEntry) -> Self {
        Self::new(entry.calls, entry.period()).with_burst(entry.burst)
    }
}

impl Default for LimiterConfig {
    /// Fallback bounds for services without explicit configuration:
    /// 10 calls per 60 seconds, no burst.
    fn default() -> Self {
        Self::new(10, Duration::from_secs(60))
    }
}

/// Pure sliding-window arithmetic over recorded call timestamps.
///
/// Every method takes `now` explicitly so tests can drive the window with a
/// synthetic clock.
#[derive(Debug)]
struct Window {
    config: LimiterConfig,
    timestamps: VecDeque<Instant>,
}

impl Window {
    fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            timestamps: VecDeque::with_capacity(config.capacity()),
        }
    }

    /// Drops timestamps that have aged out of the trailing window.
    fn prune(&mut self, now: Instant) {
        if let Some(cutoff) = now.checked_sub(self.config.period) {
            while let Some(oldest) = self.timestamps.front() {
                if *oldest <= cutoff {
                    self.timestamps.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// True when a call would be admitted at `now`. Does not record anything.
    fn admissible(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.timestamps.len() < self.config.capacity()
    }

    /// Time until the next admission at `now`. Zero when already admissible.
    fn wait_time(&mut self, now: Instant) -> Duration {
        self.prune(now);
        if self.timestamps.len() < self.config.capacity() {
            return Duration::ZERO;
        }
        match self.timestamps.front() {
            Some(oldest) => (*oldest + self.config.period).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Records an admitted call at `now`.
    fn record(&mut self, now: Instant) {
        self.prune(now);
        self.timestamps.push_back(now);
    }

    fn made(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.timestamps.len()
    }

    fn clear(&mut self) {
        self.timestamps.clear();
    }

    fn stats(&mut self, now: Instant) -> UsageStats {
        self.prune(now);
        let made = self.timestamps.len();
        let reset_in = match self.timestamps.front() {
            Some(oldest) => (*oldest + self.config.period).saturating_duration_since(now),
            None => Duration::ZERO,
        };
        UsageStats {
            made,
            remaining: self.config.capacity().saturating_sub(made),
            reset_in,
        }
    }
}

/// Read-only snapshot of one service's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageStats {
    /// Calls currently inside the window.
    pub made: usize,
    /// Admissions left before the next call would have to wait.
    pub remaining: usize,
    /// Time until the oldest recorded call leaves the window. Zero when the
    /// window is empty.
    pub reset_in: Duration,
}

/// Per-service admission state.
///
/// `admission` serializes the wait-run-record critical section so concurrent
/// callers on the same service consume distinct slots. `window` guards the
/// timestamp arithmetic and is only ever held for short, non-awaiting spans.
struct ServiceState {
    admission: AsyncMutex<()>,
    window: Mutex<Window>,
}

impl ServiceState {
    fn new(config: LimiterConfig) -> Self {
        Self {
            admission: AsyncMutex::new(()),
            window: Mutex::new(Window::new(config)),
        }
    }

    fn lock_window(&self) -> MutexGuard<'_, Window> {
        // A poisoned window only means a panic elsewhere; the timestamp
        // queue itself is always in a consistent state.
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Charges one admitted call when dropped.
///
/// Created after the wait phase, immediately before the operation starts, so
/// every exit path records exactly once: success, operation error, panic,
/// and cancellation mid-operation.
struct CallCharge<'a> {
    state: &'a ServiceState,
}

impl Drop for CallCharge<'_> {
    fn drop(&mut self) {
        self.state.lock_window().record(Instant::now());
    }
}

/// Registry of per-service sliding windows.
///
/// Services are identified by name. State is created lazily on first use;
/// services without an explicit [`LimiterConfig`] fall back to the default
/// bounds. [`run`](Self::run) is the entry point the rest of the crate uses;
/// [`try_acquire`](Self::try_acquire), [`wait_time`](Self::wait_time) and
/// [`record_call`](Self::record_call) exist for introspection and tests.
pub struct RateLimiter {
    configs: HashMap<String, LimiterConfig>,
    fallback: LimiterConfig,
    states: RwLock<HashMap<String, Arc<ServiceState>>>,
}

impl RateLimiter {
    pub fn new(configs: HashMap<String, LimiterConfig>) -> Self {
        Self {
            configs,
            fallback: LimiterConfig::default(),
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Builds a registry from the configured per-service rate limits.
    pub fn from_settings(settings: &Settings) -> Self {
        let configs = settings
            .rate_limits
            .iter()
            .map(|(service, entry)| (service.clone(), LimiterConfig::from_entry(entry)))
            .collect();
        Self::new(configs)
    }

    /// Replaces the bounds applied to services without explicit configuration.
    pub fn with_fallback(mut self, fallback: LimiterConfig) -> Self {
        self.fallback = fallback;
        self
    }

    /// The bounds that apply to `service`, configured or fallback.
    pub fn config_for(&self, service: &str) -> LimiterConfig {
        self.configs.get(service).copied().unwrap_or(self.fallback)
    }

    fn read_states(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<ServiceState>>> {
        self.states.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_states(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<ServiceState>>> {
        self.states.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the state for `service`, creating it on first access.
    fn state(&self, service: &str) -> Arc<ServiceState> {
        if let Some(state) = self.read_states().get(service) {
            return Arc::clone(state);
        }
        let mut states = self.write_states();
        if let Some(state) = states.get(service) {
            return Arc::clone(state);
        }
        let config = self.config_for(service);
        debug!(
            service,
            calls = config.calls,
            period_secs = config.period.as_secs(),
            burst = config.burst,
            "creating rate limiter window"
        );
        let state = Arc::new(ServiceState::new(config));
        states.insert(service.to_string(), Arc::clone(&state));
        state
    }

    /// True when a call on `service` would be admitted right now.
    ///
    /// Purely a probe: nothing is recorded, and a subsequent call may still
    /// wait if other callers consume the slot first.
    pub fn try_acquire(&self, service: &str) -> bool {
        self.state(service).lock_window().admissible(Instant::now())
    }

    /// Time until the next admission on `service`. Zero when a call would be
    /// admitted immediately.
    pub fn wait_time(&self, service: &str) -> Duration {
        self.state(service).lock_window().wait_time(Instant::now())
    }

    /// Records a call against `service` without any admission check.
    ///
    /// [`run`](Self::run) charges automatically; this exists so callers that
    /// acquire by other means can keep the window honest.
    pub fn record_call(&self, service: &str) {
        self.state(service).lock_window().record(Instant::now());
    }

    /// Snapshot of the current window for `service`.
    pub fn stats(&self, service: &str) -> UsageStats {
        self.state(service).lock_window().stats(Instant::now())
    }

    /// Number of calls currently inside the window for `service`.
    pub fn calls_made(&self, service: &str) -> usize {
        self.state(service).lock_window().made(Instant::now())
    }

    /// Clears recorded calls for one service, or for all of them.
    pub fn reset(&self, service: Option<&str>) {
        let states = self.read_states();
        match service {
            Some(name) => {
                if let Some(state) = states.get(name) {
                    state.lock_window().clear();
                }
            }
            None => {
                for state in states.values() {
                    state.lock_window().clear();
                }
            }
        }
    }

    /// Admits and runs one external call against `service`.
    ///
    /// Waits out the window if it is full, runs `operation`, and charges the
    /// call on every exit path: success, an operation error, and cancellation
    /// mid-operation all record exactly one timestamp. Cancellation during
    /// the wait charges nothing, because the call never started.
    ///
    /// Concurrent callers on the same service are admitted one at a time and
    /// each consumes its own slot. Callers on different services do not
    /// contend.
    pub async fn run<F, Fut, T>(&self, service: &str, operation: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let state = self.state(service);
        let _admission = state.admission.lock().await;

        let wait = state.lock_window().wait_time(Instant::now());
        if !wait.is_zero() {
            debug!(
                service,
                wait_ms = wait.as_millis() as u64,
                "rate limit reached, waiting for window"
            );
            tokio::time::sleep(wait).await;
        }

        let charge = CallCharge { state: &state };
        let result = operation().await;
        drop(charge);
        result
    }

    /// Blocking variant of [`run`](Self::run) for callers that are not inside
    /// an async runtime.
    ///
    /// Parks the current thread for both the admission gate and the window
    /// wait, so it must never be called from async code.
    pub fn run_blocking<F, T>(&self, service: &str, operation: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Result<T, AppError>,
    {
        let state = self.state(service);
        let _admission = state.admission.blocking_lock();

        let wait = state.lock_window().wait_time(Instant::now());
        if !wait.is_zero() {
            debug!(
                service,
                wait_ms = wait.as_millis() as u64,
                "rate limit reached, waiting for window"
            );
            std::thread::sleep(wait);
        }

        let charge = CallCharge { state: &state };
        let result = operation();
        drop(charge);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn window(calls: u32, period_secs: u64) -> Window {
        Window::new(LimiterConfig::new(calls, Duration::from_secs(period_secs)))
    }

    #[test]
    fn test_window_admits_up_to_capacity() {
        let mut w = window(2, 10);
        let base = Instant::now();

        assert!(w.admissible(base));
        w.record(base);
        assert!(w.admissible(base));
        w.record(base + Duration::from_secs(1));
        assert!(!w.admissible(base + Duration::from_secs(2)));
    }

    #[test]
    fn test_window_wait_time_targets_oldest_expiry() {
        let mut w = window(2, 10);
        let base = Instant::now();

        w.record(base);
        w.record(base + Duration::from_secs(1));

        // Full at t=2; the slot opens when the t=0 stamp leaves at t=10.
        let wait = w.wait_time(base + Duration::from_secs(2));
        assert_eq!(wait, Duration::from_secs(8));
    }

    #[test]
    fn test_window_wait_time_zero_when_admissible() {
        let mut w = window(3, 10);
        let base = Instant::now();

        assert_eq!(w.wait_time(base), Duration::ZERO);
        w.record(base);
        assert_eq!(w.wait_time(base + Duration::from_secs(1)), Duration::ZERO);
    }

    #[test]
    fn test_window_slides_one_slot_at_a_time() {
        let mut w = window(2, 10);
        let base = Instant::now();

        w.record(base);
        w.record(base + Duration::from_secs(1));

        // Exactly one period after the first call, exactly one slot opens.
        let t = base + Duration::from_secs(10);
        assert!(w.admissible(t));
        w.record(t);
        assert!(!w.admissible(t));

        // One second later the t=1 stamp leaves too.
        assert!(w.admissible(base + Duration::from_secs(11)));
    }

    #[test]
    fn test_window_burst_extends_capacity() {
        let mut w = Window::new(
            LimiterConfig::new(2, Duration::from_secs(10)).with_burst(1),
        );
        let base = Instant::now();

        w.record(base);
        w.record(base);
        assert!(w.admissible(base));
        w.record(base);
        assert!(!w.admissible(base));

        let wait = w.wait_time(base + Duration::from_secs(3));
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(10));
    }

    #[test]
    fn test_window_prunes_expired_stamps() {
        let mut w = window(2, 10);
        let base = Instant::now();

        w.record(base);
        w.record(base + Duration::from_secs(1));
        assert_eq!(w.made(base + Duration::from_secs(2)), 2);
        assert_eq!(w.made(base + Duration::from_secs(20)), 0);
    }

    #[test]
    fn test_window_never_exceeds_capacity_after_admitted_calls() {
        let mut w = window(3, 10);
        let mut now = Instant::now();

        for _ in 0..20 {
            if !w.admissible(now) {
                now += w.wait_time(now);
            }
            w.record(now);
            assert!(w.made(now) <= w.config.capacity());
            now += Duration::from_millis(100);
        }
    }

    #[test]
    fn test_config_clamps_zero_calls() {
        let config = LimiterConfig::new(0, Duration::from_secs(60));
        assert_eq!(config.calls, 1);
        assert_eq!(config.capacity(), 1);
    }

    #[test]
    fn test_registry_fallback_for_unknown_service() {
        let limiter = RateLimiter::new(HashMap::new());
        let config = limiter.config_for("mystery-service");
        assert_eq!(config.calls, 10);
        assert_eq!(config.period, Duration::from_secs(60));
        assert_eq!(config.burst, 0);
    }

    #[test]
    fn test_registry_uses_configured_entry() {
        let limiter = RateLimiter::from_settings(&Settings::default());
        assert_eq!(limiter.config_for("source-host").calls, 30);
        assert_eq!(limiter.config_for("page-fetch").calls, 10);
    }

    #[test]
    fn test_registry_state_is_reused_across_calls() {
        let limiter = RateLimiter::new(HashMap::new());
        limiter.record_call("svc");
        limiter.record_call("svc");
        assert_eq!(limiter.calls_made("svc"), 2);
    }

    #[test]
    fn test_services_are_independent() {
        let limiter = RateLimiter::new(HashMap::new());
        limiter.record_call("alpha");
        assert_eq!(limiter.calls_made("alpha"), 1);
        assert_eq!(limiter.calls_made("beta"), 0);
    }

    #[test]
    fn test_try_acquire_does_not_record() {
        let limiter = RateLimiter::new(HashMap::new());
        assert!(limiter.try_acquire("svc"));
        assert!(limiter.try_acquire("svc"));
        assert_eq!(limiter.calls_made("svc"), 0);
    }

    #[test]
    fn test_stats_snapshot() {
        let mut configs = HashMap::new();
        configs.insert(
            "svc".to_string(),
            LimiterConfig::new(5, Duration::from_secs(60)),
        );
        let limiter = RateLimiter::new(configs);

        let empty = limiter.stats("svc");
        assert_eq!(empty.made, 0);
        assert_eq!(empty.remaining, 5);
        assert_eq!(empty.reset_in, Duration::ZERO);

        limiter.record_call("svc");
        let stats = limiter.stats("svc");
        assert_eq!(stats.made, 1);
        assert_eq!(stats.remaining, 4);
        assert!(stats.reset_in > Duration::ZERO);
        assert!(stats.reset_in <= Duration::from_secs(60));
    }

    #[test]
    fn test_reset_single_service() {
        let limiter = RateLimiter::new(HashMap::new());
        limiter.record_call("alpha");
        limiter.record_call("beta");

        limiter.reset(Some("alpha"));
        assert_eq!(limiter.calls_made("alpha"), 0);
        assert_eq!(limiter.calls_made("beta"), 1);
    }

    #[test]
    fn test_reset_all_services() {
        let limiter = RateLimiter::new(HashMap::new());
        limiter.record_call("alpha");
        limiter.record_call("beta");

        limiter.reset(None);
        assert_eq!(limiter.calls_made("alpha"), 0);
        assert_eq!(limiter.calls_made("beta"), 0);
    }

    fn tight_limiter(calls: u32, period: Duration) -> Arc<RateLimiter> {
        let mut configs = HashMap::new();
        configs.insert("svc".to_string(), LimiterConfig::new(calls, period));
        Arc::new(RateLimiter::new(configs))
    }

    #[tokio::test]
    async fn test_run_charges_on_success() {
        let limiter = tight_limiter(5, Duration::from_secs(60));
        let result = limiter.run("svc", || async { Ok::<_, AppError>(42) }).await;
        assert_eq!(result.ok(), Some(42));
        assert_eq!(limiter.calls_made("svc"), 1);
    }

    #[tokio::test]
    async fn test_run_charges_on_operation_error() {
        let limiter = tight_limiter(5, Duration::from_secs(60));
        let result = limiter
            .run("svc", || async {
                Err::<(), _>(AppError::Network("connection refused".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(limiter.calls_made("svc"), 1);
    }

    #[tokio::test]
    async fn test_run_charges_on_cancellation_mid_operation() {
        let limiter = tight_limiter(5, Duration::from_secs(60));
        let task = tokio::spawn({
            let limiter = Arc::clone(&limiter);
            async move {
                limiter
                    .run("svc", || async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok::<_, AppError>(())
                    })
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();
        assert!(task.await.is_err());
        assert_eq!(limiter.calls_made("svc"), 1);
    }

    #[tokio::test]
    async fn test_run_does_not_charge_on_cancellation_during_wait() {
        let limiter = tight_limiter(1, Duration::from_secs(60));
        limiter
            .run("svc", || async { Ok::<_, AppError>(()) })
            .await
            .ok();
        assert_eq!(limiter.calls_made("svc"), 1);

        // The window is full for the next minute; this caller parks in the
        // wait phase and gets cancelled there.
        let task = tokio::spawn({
            let limiter = Arc::clone(&limiter);
            async move {
                limiter
                    .run("svc", || async { Ok::<_, AppError>(()) })
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();
        assert!(task.await.is_err());
        assert_eq!(limiter.calls_made("svc"), 1);
    }

    #[tokio::test]
    async fn test_run_waits_for_slot_when_window_full() {
        let limiter = tight_limiter(2, Duration::from_millis(300));
        let start = Instant::now();

        for _ in 0..3 {
            limiter
                .run("svc", || async { Ok::<_, AppError>(()) })
                .await
                .ok();
        }

        // The third call has to wait out most of the period.
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(limiter.calls_made("svc"), 3);
    }

    #[tokio::test]
    async fn test_same_service_calls_are_serialized() {
        let limiter = tight_limiter(10, Duration::from_secs(60));
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            tasks.push(tokio::spawn(async move {
                limiter
                    .run("svc", || async {
                        let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(current, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, AppError>(())
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.expect("task panicked").ok();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(limiter.calls_made("svc"), 4);
    }

    #[tokio::test]
    async fn test_different_services_run_concurrently() {
        let limiter = Arc::new(RateLimiter::new(HashMap::new()));
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let op = |limiter: Arc<RateLimiter>, service: &'static str| {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            async move {
                limiter
                    .run(service, || async {
                        let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(current, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, AppError>(())
                    })
                    .await
            }
        };

        let (a, b) = tokio::join!(
            op(Arc::clone(&limiter), "alpha"),
            op(Arc::clone(&limiter), "beta")
        );
        a.ok();
        b.ok();

        assert_eq!(max_seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_run_blocking_waits_and_charges() {
        let limiter = tight_limiter(1, Duration::from_millis(100));
        let start = Instant::now();

        limiter.run_blocking("svc", || Ok::<_, AppError>(())).ok();
        limiter.run_blocking("svc", || Ok::<_, AppError>(())).ok();

        assert!(start.elapsed() >= Duration::from_millis(80));
        assert_eq!(limiter.calls_made("svc"), 2);
    }

    #[test]
    fn test_run_blocking_charges_on_error() {
        let limiter = tight_limiter(5, Duration::from_secs(60));
        let result = limiter.run_blocking("svc", || {
            Err::<(), _>(AppError::Timeout(30))
        });
        assert!(result.is_err());
        assert_eq!(limiter.calls_made("svc"), 1);
    }
}
