//! Trailing-edge debouncer
//!
//! Every [`Debouncer::call`] restarts the cooldown. The wrapped function runs
//! once, after a full cooldown has passed with no further calls.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Function executed when the cooldown expires
pub type DebouncedFunction = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct Pending {
    /// Bumped on every call; a timer only fires if it still holds the latest value
    generation: u64,
    timer: Option<JoinHandle<()>>,
    shut_down: bool,
}

/// Collapses bursts of calls into a single execution after a quiet period.
///
/// Must be used from within a tokio runtime.
pub struct Debouncer {
    name: String,
    cooldown: Duration,
    function: DebouncedFunction,
    pending: Arc<Mutex<Pending>>,
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Debouncer {
    pub fn new<F, Fut>(name: impl Into<String>, cooldown: Duration, function: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let function: DebouncedFunction = Arc::new(move || Box::pin(function()));
        Self {
            name: name.into(),
            cooldown,
            function,
            pending: Arc::new(Mutex::new(Pending::default())),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Request an execution, restarting the quiet period.
    pub fn call(&self) {
        let mut pending = lock(&self.pending);
        if pending.shut_down {
            debug!(debouncer = %self.name, "Ignoring call on shut down debouncer");
            return;
        }

        pending.generation = pending.generation.wrapping_add(1);
        let generation = pending.generation;

        if let Some(timer) = pending.timer.take() {
            trace!(debouncer = %self.name, "Restarting cooldown");
            timer.abort();
        }

        let cooldown = self.cooldown;
        let function = Arc::clone(&self.function);
        let slot = Arc::clone(&self.pending);
        let name = self.name.clone();

        pending.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            {
                let mut pending = lock(&slot);
                if pending.shut_down || pending.generation != generation {
                    return;
                }
                // Detach so a call arriving mid-execution cannot abort us
                pending.timer = None;
            }
            debug!(debouncer = %name, "Cooldown expired, executing");
            function().await;
        }));
    }

    /// Whether a call is waiting for its cooldown to expire
    pub fn has_pending(&self) -> bool {
        lock(&self.pending)
            .timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Drop a pending call without executing it
    pub fn cancel(&self) {
        if let Some(timer) = lock(&self.pending).timer.take() {
            timer.abort();
        }
    }

    /// Cancel any pending call and ignore all future calls
    pub fn shutdown(&self) {
        let mut pending = lock(&self.pending);
        pending.shut_down = true;
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.pending).shut_down
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("name", &self.name)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}
