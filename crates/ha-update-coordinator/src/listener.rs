//! Listener registry with removable handles

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use indexmap::IndexMap;
use tracing::{error, trace};

/// A unique identifier for a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callback invoked with the new snapshot after each successful refresh
pub type ListenerCallback<T> = Arc<dyn Fn(&Arc<T>) -> anyhow::Result<()> + Send + Sync>;

struct Registration<T> {
    active: AtomicBool,
    callback: ListenerCallback<T>,
}

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: ListenerId);
}

struct Registry<T> {
    name: String,
    next_id: AtomicU64,
    listeners: Mutex<IndexMap<ListenerId, Arc<Registration<T>>>>,
}

impl<T> Registry<T> {
    fn listeners(&self) -> MutexGuard<'_, IndexMap<ListenerId, Arc<Registration<T>>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Send + Sync + 'static> Unsubscribe for Registry<T> {
    fn unsubscribe(&self, id: ListenerId) {
        if let Some(registration) = self.listeners().shift_remove(&id) {
            registration.active.store(false, Ordering::SeqCst);
            trace!(coordinator = %self.name, listener = ?id, "Listener removed");
        }
    }
}

/// Handle returned by [`ListenerSet::add`].
///
/// Holds the registry weakly. `remove()` may be called any number of times,
/// including from inside a notification.
pub struct ListenerHandle {
    id: ListenerId,
    registry: Weak<dyn Unsubscribe>,
    removed: AtomicBool,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn remove(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("removed", &self.is_removed())
            .finish()
    }
}

/// Ordered set of listeners sharing one snapshot type
pub struct ListenerSet<T> {
    registry: Arc<Registry<T>>,
}

impl<T: Send + Sync + 'static> ListenerSet<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            registry: Arc::new(Registry {
                name: name.into(),
                next_id: AtomicU64::new(1),
                listeners: Mutex::new(IndexMap::new()),
            }),
        }
    }

    pub fn add<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&Arc<T>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));
        let registration = Arc::new(Registration {
            active: AtomicBool::new(true),
            callback: Arc::new(callback) as ListenerCallback<T>,
        });
        self.registry.listeners().insert(id, registration);
        trace!(coordinator = %self.registry.name, listener = ?id, "Listener added");

        let registry: Arc<dyn Unsubscribe> = self.registry.clone();
        ListenerHandle {
            id,
            registry: Arc::downgrade(&registry),
            removed: AtomicBool::new(false),
        }
    }

    /// Notify every active listener in registration order.
    ///
    /// Errors and panics raised by a listener are logged and do not stop the
    /// remaining listeners. Returns the number of listeners invoked.
    pub fn notify(&self, snapshot: &Arc<T>) -> usize {
        // Copy out so callbacks can add or remove listeners without deadlocking
        let registrations: Vec<(ListenerId, Arc<Registration<T>>)> = self
            .registry
            .listeners()
            .iter()
            .map(|(id, registration)| (*id, registration.clone()))
            .collect();

        let mut invoked = 0;
        for (id, registration) in registrations {
            if !registration.active.load(Ordering::SeqCst) {
                continue;
            }
            invoked += 1;
            match catch_unwind(AssertUnwindSafe(|| (registration.callback)(snapshot))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(
                        coordinator = %self.registry.name,
                        listener = ?id,
                        error = %err,
                        "Error in listener"
                    );
                }
                Err(_) => {
                    error!(coordinator = %self.registry.name, listener = ?id, "Listener panicked");
                }
            }
        }
        invoked
    }

    /// Deactivate and drop every listener.
    ///
    /// A listener is checked right before it is called, so once this returns
    /// no new call starts. One already running elsewhere is not waited for.
    pub fn clear(&self) {
        let drained: Vec<_> = self.registry.listeners().drain(..).collect();
        for (_, registration) in drained {
            registration.active.store(false, Ordering::SeqCst);
        }
    }

    pub fn len(&self) -> usize {
        self.registry.listeners().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
