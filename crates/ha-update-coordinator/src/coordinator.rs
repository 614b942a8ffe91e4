//! Data update coordinator
//!
//! Polls a [`Fetcher`] on an interval and on debounced request, keeps the last
//! good snapshot and fans it out to listeners.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use crate::debounce::Debouncer;
use crate::error::{CoordinatorError, UpdateFailed};
use crate::listener::{ListenerHandle, ListenerSet};
use crate::state::CoordinatorState;

/// Performs one retrieval of remote state.
///
/// Implementations own the transport and are expected to bound each call
/// with their own timeout, reporting it as [`crate::FailureKind::Timeout`].
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    type Data: Send + Sync + 'static;

    async fn fetch(&self) -> Result<Self::Data, UpdateFailed>;
}

/// Consecutive failures since the last successful fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureState {
    pub consecutive_failures: u32,
    pub last_error: Option<UpdateFailed>,
}

impl FailureState {
    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures == 0
    }
}

/// Called after every failed fetch with the updated failure state
pub type FailureObserver = Arc<dyn Fn(&FailureState) + Send + Sync>;

/// What caused a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    FirstRefresh,
    Interval,
    Requested,
    Manual,
}

/// Result of a single refresh attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Fetch succeeded and listeners were notified
    Updated,
    /// Fetch failed; snapshot untouched
    Failed(UpdateFailed),
    /// Another fetch was already running
    Coalesced,
    /// Coordinator stopped before or during the fetch
    Stopped,
}

/// Running interval task and the channel that retunes it
struct PollTimer {
    task: JoinHandle<()>,
    interval: watch::Sender<Duration>,
}

fn ticker(interval: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

struct Inner<F: Fetcher> {
    name: String,
    fetcher: F,
    state: Mutex<CoordinatorState>,
    data: Mutex<Option<Arc<F::Data>>>,
    failures: Mutex<FailureState>,
    last_update_success_time: Mutex<Option<DateTime<Utc>>>,
    listeners: ListenerSet<F::Data>,
    in_flight: AtomicBool,
    flight_done: Notify,
    update_interval: Mutex<Option<Duration>>,
    timer: Mutex<Option<PollTimer>>,
    debouncer: Debouncer,
    failure_observer: Mutex<Option<FailureObserver>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the in-flight flag even if the fetching task is cancelled
struct FlightGuard<'a, F: Fetcher> {
    inner: &'a Inner<F>,
}

impl<F: Fetcher> Drop for FlightGuard<'_, F> {
    fn drop(&mut self) {
        self.inner.in_flight.store(false, Ordering::SeqCst);
        self.inner.flight_done.notify_waiters();
    }
}

impl<F: Fetcher> Inner<F> {
    fn is_stopped(&self) -> bool {
        lock(&self.state).is_stopped()
    }

    async fn refresh(&self, trigger: RefreshTrigger, wait_for_in_flight: bool) -> RefreshOutcome {
        if self.is_stopped() {
            return RefreshOutcome::Stopped;
        }

        let finished = self.flight_done.notified();
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(coordinator = %self.name, ?trigger, "Fetch already in flight");
            if wait_for_in_flight {
                finished.await;
            }
            return RefreshOutcome::Coalesced;
        }
        let _flight = FlightGuard { inner: self };

        let started = Instant::now();
        let result = self.fetcher.fetch().await;

        if self.is_stopped() {
            debug!(coordinator = %self.name, "Discarding fetch result after stop");
            return RefreshOutcome::Stopped;
        }

        match result {
            Ok(data) => {
                let snapshot = Arc::new(data);
                *lock(&self.data) = Some(snapshot.clone());
                *lock(&self.last_update_success_time) = Some(Utc::now());

                let previous = std::mem::take(&mut *lock(&self.failures));
                if previous.consecutive_failures > 0 {
                    info!(
                        coordinator = %self.name,
                        failures = previous.consecutive_failures,
                        "Fetching data recovered"
                    );
                }

                debug!(
                    coordinator = %self.name,
                    ?trigger,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Finished fetching data"
                );
                if self.is_stopped() {
                    return RefreshOutcome::Stopped;
                }
                self.listeners.notify(&snapshot);
                RefreshOutcome::Updated
            }
            Err(failure) => {
                let state = {
                    let mut failures = lock(&self.failures);
                    failures.consecutive_failures = failures.consecutive_failures.saturating_add(1);
                    failures.last_error = Some(failure.clone());
                    failures.clone()
                };

                // Log loudly once per outage
                if state.consecutive_failures == 1 {
                    error!(
                        coordinator = %self.name,
                        ?trigger,
                        error = %failure,
                        "Error fetching data"
                    );
                } else {
                    debug!(
                        coordinator = %self.name,
                        failures = state.consecutive_failures,
                        error = %failure,
                        "Error fetching data"
                    );
                }

                let observer = lock(&self.failure_observer).clone();
                if let Some(observer) = observer {
                    observer(&state);
                }
                RefreshOutcome::Failed(failure)
            }
        }
    }
}

/// Coordinates polling of one remote endpoint.
///
/// Cloning is cheap; clones share the same state.
pub struct DataUpdateCoordinator<F: Fetcher> {
    inner: Arc<Inner<F>>,
}

impl<F: Fetcher> Clone for DataUpdateCoordinator<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: Fetcher> DataUpdateCoordinator<F> {
    /// Create a coordinator. `cooldown` is the quiet period applied to
    /// [`refresh_now`](Self::refresh_now).
    pub fn new(name: impl Into<String>, fetcher: F, cooldown: Duration) -> Self {
        let name = name.into();
        let inner = Arc::new_cyclic(|weak: &Weak<Inner<F>>| {
            let weak = weak.clone();
            let debouncer = Debouncer::new(format!("{name} refresh"), cooldown, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.refresh(RefreshTrigger::Requested, false).await;
                    }
                }
            });

            Inner {
                listeners: ListenerSet::new(name.clone()),
                name,
                fetcher,
                state: Mutex::new(CoordinatorState::Uninitialized),
                data: Mutex::new(None),
                failures: Mutex::new(FailureState::default()),
                last_update_success_time: Mutex::new(None),
                in_flight: AtomicBool::new(false),
                flight_done: Notify::new(),
                update_interval: Mutex::new(None),
                timer: Mutex::new(None),
                debouncer,
                failure_observer: Mutex::new(None),
            }
        });

        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn fetcher(&self) -> &F {
        &self.inner.fetcher
    }

    pub fn state(&self) -> CoordinatorState {
        *lock(&self.inner.state)
    }

    pub fn cooldown(&self) -> Duration {
        self.inner.debouncer.cooldown()
    }

    /// Register the host's failure tracker
    pub fn set_failure_observer<O>(&self, observer: O)
    where
        O: Fn(&FailureState) + Send + Sync + 'static,
    {
        *lock(&self.inner.failure_observer) = Some(Arc::new(observer));
    }

    /// Perform the mandatory first fetch.
    ///
    /// Unlike every other refresh path, a failure is returned to the caller so
    /// setup can decide between retrying and giving up.
    #[instrument(skip(self), fields(coordinator = %self.inner.name))]
    pub async fn request_first_refresh(&self) -> Result<(), CoordinatorError> {
        let outcome = self.inner.refresh(RefreshTrigger::FirstRefresh, true).await;

        {
            let mut state = lock(&self.inner.state);
            if let Ok(next) = state.try_transition(CoordinatorState::Ready) {
                *state = next;
            }
        }

        match outcome {
            RefreshOutcome::Updated => Ok(()),
            RefreshOutcome::Failed(failure) => Err(CoordinatorError::UpdateFailed(failure)),
            RefreshOutcome::Stopped => Err(CoordinatorError::Stopped(self.inner.name.clone())),
            RefreshOutcome::Coalesced => {
                if lock(&self.inner.data).is_some() {
                    Ok(())
                } else {
                    let last_error = lock(&self.inner.failures).last_error.clone();
                    Err(CoordinatorError::UpdateFailed(last_error.unwrap_or_else(|| {
                        UpdateFailed::connectivity("first refresh produced no data")
                    })))
                }
            }
        }
    }

    /// Arm the recurring timer. The first tick fires one interval from now.
    ///
    /// Calling it again while the timer runs only changes the interval.
    pub fn start(&self, interval: Duration) -> Result<(), CoordinatorError> {
        if interval.is_zero() {
            return Err(CoordinatorError::InvalidInterval(interval));
        }
        if self.inner.is_stopped() {
            return Err(CoordinatorError::Stopped(self.inner.name.clone()));
        }

        *lock(&self.inner.update_interval) = Some(interval);
        if !self.retune_timer(interval) {
            self.schedule_timer(interval);
        }
        info!(coordinator = %self.inner.name, ?interval, "Polling started");
        Ok(())
    }

    /// Change the polling interval, rearming the timer if it is running.
    ///
    /// A tick fetch already in flight is left to finish; the next tick comes
    /// one new interval after it does.
    pub fn set_update_interval(&self, interval: Duration) -> Result<(), CoordinatorError> {
        if interval.is_zero() {
            return Err(CoordinatorError::InvalidInterval(interval));
        }
        if self.inner.is_stopped() {
            return Err(CoordinatorError::Stopped(self.inner.name.clone()));
        }

        *lock(&self.inner.update_interval) = Some(interval);
        if self.retune_timer(interval) {
            info!(coordinator = %self.inner.name, ?interval, "Polling interval changed");
        }
        Ok(())
    }

    /// Disarm the timer without stopping the coordinator.
    ///
    /// Requested refreshes and listeners keep working, and `start` arms the
    /// timer again. A tick fetch already in flight is left to finish.
    pub fn pause_polling(&self) {
        if let Some(timer) = lock(&self.inner.timer).take() {
            // Dropping the sender ends the loop at its next wait
            drop(timer.interval);
            info!(coordinator = %self.inner.name, "Polling paused");
        }
    }

    pub fn update_interval(&self) -> Option<Duration> {
        *lock(&self.inner.update_interval)
    }

    pub fn is_timer_armed(&self) -> bool {
        lock(&self.inner.timer)
            .as_ref()
            .is_some_and(|timer| !timer.task.is_finished())
    }

    /// Send a new interval to a running timer; false when none is running
    fn retune_timer(&self, interval: Duration) -> bool {
        let timer = lock(&self.inner.timer);
        match timer.as_ref() {
            Some(timer) if !timer.task.is_finished() => timer.interval.send(interval).is_ok(),
            _ => false,
        }
    }

    fn schedule_timer(&self, interval: Duration) {
        let (interval_tx, mut interval_rx) = watch::channel(interval);
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticks = ticker(interval);
            loop {
                tokio::select! {
                    _ = ticks.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        if inner.is_stopped() {
                            break;
                        }
                        inner.refresh(RefreshTrigger::Interval, false).await;
                    }
                    changed = interval_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        ticks = ticker(*interval_rx.borrow_and_update());
                    }
                }
            }
        });

        let previous = lock(&self.inner.timer).replace(PollTimer {
            task,
            interval: interval_tx,
        });
        if let Some(previous) = previous {
            previous.task.abort();
        }
    }

    /// Request a debounced out-of-cycle refresh.
    pub fn refresh_now(&self) {
        if self.inner.is_stopped() {
            debug!(coordinator = %self.inner.name, "Ignoring refresh request after stop");
            return;
        }
        self.inner.debouncer.call();
    }

    /// Refresh immediately and wait for the result, bypassing the debouncer.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.inner.refresh(RefreshTrigger::Manual, true).await
    }

    pub fn get_snapshot(&self) -> Option<Arc<F::Data>> {
        lock(&self.inner.data).clone()
    }

    pub fn failure_state(&self) -> FailureState {
        lock(&self.inner.failures).clone()
    }

    /// True once data exists and the most recent fetch succeeded
    pub fn last_update_success(&self) -> bool {
        lock(&self.inner.data).is_some() && lock(&self.inner.failures).is_healthy()
    }

    pub fn last_update_success_time(&self) -> Option<DateTime<Utc>> {
        *lock(&self.inner.last_update_success_time)
    }

    pub fn add_listener<L>(&self, listener: L) -> ListenerHandle
    where
        L: Fn(&Arc<F::Data>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Cancel the timer and any pending refresh, and drop all listeners.
    ///
    /// No listener call begins after this returns. A call already running on
    /// another thread may still finish.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.inner.state);
            match state.try_transition(CoordinatorState::Stopped) {
                Ok(next) => *state = next,
                Err(_) => return,
            }
        }

        if let Some(timer) = lock(&self.inner.timer).take() {
            timer.task.abort();
        }
        self.inner.debouncer.shutdown();
        self.inner.listeners.clear();
        lock(&self.inner.failure_observer).take();
        info!(coordinator = %self.inner.name, "Coordinator stopped");
    }
}

impl<F: Fetcher> std::fmt::Debug for DataUpdateCoordinator<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataUpdateCoordinator")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("update_interval", &self.update_interval())
            .field("failures", &self.failure_state().consecutive_failures)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use tokio_test::assert_ok;

    struct Counter(u32);

    #[async_trait]
    impl Fetcher for Mutex<Counter> {
        type Data = u32;

        async fn fetch(&self) -> Result<u32, UpdateFailed> {
            let mut counter = self.lock().unwrap();
            counter.0 += 1;
            Ok(counter.0)
        }
    }

    fn coordinator() -> DataUpdateCoordinator<Mutex<Counter>> {
        DataUpdateCoordinator::new("counter", Mutex::new(Counter(0)), Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejects_zero_interval() {
        let coordinator = coordinator();
        assert_eq!(
            coordinator.start(Duration::ZERO),
            Err(CoordinatorError::InvalidInterval(Duration::ZERO))
        );
        assert!(!coordinator.is_timer_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_does_not_fetch_immediately() {
        let coordinator = coordinator();
        coordinator.start(Duration::from_secs(5)).unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(coordinator.get_snapshot().is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(coordinator.get_snapshot().as_deref(), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_refresh_moves_to_ready() {
        let coordinator = coordinator();
        assert_eq!(coordinator.state(), CoordinatorState::Uninitialized);

        assert_ok!(coordinator.request_first_refresh().await);

        assert_eq!(coordinator.state(), CoordinatorState::Ready);
        assert!(coordinator.last_update_success());
        assert!(coordinator.last_update_success_time().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_terminal() {
        let coordinator = coordinator();
        coordinator.start(Duration::from_secs(1)).unwrap();

        coordinator.stop();
        coordinator.stop();

        assert_eq!(coordinator.state(), CoordinatorState::Stopped);
        assert!(!coordinator.is_timer_armed());
        assert!(matches!(
            coordinator.start(Duration::from_secs(1)),
            Err(CoordinatorError::Stopped(_))
        ));
        assert_eq!(coordinator.refresh().await, RefreshOutcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_update_interval_rearms_timer() {
        let coordinator = coordinator();
        assert_ok!(coordinator.start(Duration::from_secs(60)));
        assert_ok!(coordinator.set_update_interval(Duration::from_secs(10)));

        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(coordinator.update_interval(), Some(Duration::from_secs(10)));
        assert_eq!(coordinator.get_snapshot().as_deref(), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_observer_sees_count() {
        struct Failing;

        #[async_trait]
        impl Fetcher for Failing {
            type Data = ();

            async fn fetch(&self) -> Result<(), UpdateFailed> {
                Err(UpdateFailed::protocol("garbled"))
            }
        }

        let coordinator = DataUpdateCoordinator::new("failing", Failing, Duration::from_millis(10));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        coordinator.set_failure_observer(move |state| {
            s.lock().unwrap().push(state.consecutive_failures);
        });

        coordinator.refresh().await;
        coordinator.refresh().await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(
            coordinator.failure_state().last_error.map(|e| e.kind),
            Some(FailureKind::Protocol)
        );
    }
}
