//! Config Entries Manager
//!
//! Manages the lifecycle of configuration entries.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
use crate::handler::{ConfigEntryHandler, SetupError, UnloadError};
use crate::hass::Hass;
use crate::state_machine::{calculate_retry_delay, InvalidTransition};
use crate::store::{EntryStore, StorageError};

/// Config entries errors
#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("Cannot unload entry in state {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Unload failed: {0}")]
    UnloadFailed(#[from] UnloadError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Called with the updated entry when its options change while loaded
pub type UpdateListener =
    Arc<dyn Fn(ConfigEntry) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Handle returned by [`ConfigEntries::add_update_listener`]
pub struct UpdateListenerHandle {
    entry_id: String,
    id: u64,
    manager: Weak<ConfigEntries>,
    removed: AtomicBool,
}

impl UpdateListenerHandle {
    /// Detach the listener; safe to call more than once
    pub fn remove(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(manager) = self.manager.upgrade() {
            if let Some(mut listeners) = manager.update_listeners.get_mut(&self.entry_id) {
                listeners.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

impl std::fmt::Debug for UpdateListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateListenerHandle")
            .field("entry_id", &self.entry_id)
            .field("id", &self.id)
            .finish()
    }
}

/// Config Entries Manager
///
/// Manages the lifecycle of configuration entries including:
/// - Loading/saving from storage
/// - Entry creation and removal
/// - Setup, unload and scheduled setup retries through domain handlers
/// - Options update listeners
pub struct ConfigEntries {
    /// Storage backend (None keeps entries in memory only)
    store: Option<EntryStore>,

    /// Primary index: entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// Index: domain -> set of entry_ids
    by_domain: DashMap<String, HashSet<String>>,

    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    /// Per-entry lock serialising setup and unload
    entry_locks: DashMap<String, Arc<Mutex<()>>>,

    /// Lifecycle handlers by domain
    handlers: DashMap<String, Arc<dyn ConfigEntryHandler>>,

    update_listeners: DashMap<String, Vec<(u64, UpdateListener)>>,
    next_listener_id: AtomicU64,

    /// Sleeping setup retries by entry_id
    retry_tasks: DashMap<String, JoinHandle<()>>,
}

impl ConfigEntries {
    /// Create a manager persisting to the given store
    pub fn new(store: EntryStore) -> Self {
        Self::with_store(Some(store))
    }

    /// Create a manager that never touches disk
    pub fn in_memory() -> Self {
        Self::with_store(None)
    }

    fn with_store(store: Option<EntryStore>) -> Self {
        Self {
            store,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            entry_locks: DashMap::new(),
            handlers: DashMap::new(),
            update_listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
            retry_tasks: DashMap::new(),
        }
    }

    /// Load entries from storage
    pub async fn load(&self) -> ConfigEntriesResult<()> {
        if let Some(store) = &self.store {
            let entries = store.load().await?;
            info!("Loading {} config entries from storage", entries.len());
            for entry in entries {
                self.index_entry(&entry);
            }
        }
        Ok(())
    }

    /// Save entries to storage
    pub async fn save(&self) -> ConfigEntriesResult<()> {
        if let Some(store) = &self.store {
            store.save_with(|| self.iter().collect()).await?;
        }
        Ok(())
    }

    fn index_entry(&self, entry: &ConfigEntry) {
        let entry_id = entry.entry_id.clone();

        self.entries.insert(entry_id.clone(), entry.clone());

        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry_id.clone());

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert((entry.domain.clone(), unique_id.clone()), entry_id);
        }
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }

        self.entries.remove(&entry.entry_id);
    }

    /// Get an entry by ID
    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    /// Get all entries for a domain
    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.by_domain
            .get(domain)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Get loaded entries for a domain
    pub fn get_loaded_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.get_by_domain(domain)
            .into_iter()
            .filter(|e| e.is_loaded())
            .collect()
    }

    /// Get entry by unique_id
    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        self.by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .and_then(|entry_id| self.get(&entry_id))
    }

    /// Add a new config entry
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(&entry);
        self.save().await?;

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );

        Ok(entry)
    }

    /// Update an existing entry.
    ///
    /// Update listeners run (and are awaited) when the entry is loaded and
    /// its options or preferences changed.
    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        let notify = entry.is_loaded() && update.changes_options_of(&entry);

        self.unindex_entry(&entry);

        let mut updated = entry;
        if let Some(title) = update.title {
            updated.title = title;
        }
        if let Some(data) = update.data {
            updated.data = data;
        }
        if let Some(options) = update.options {
            updated.options = options;
        }
        if let Some(unique_id) = update.unique_id {
            updated.unique_id = unique_id;
        }
        if let Some(pref) = update.pref_disable_new_entities {
            updated.pref_disable_new_entities = pref;
        }
        if let Some(pref) = update.pref_disable_polling {
            updated.pref_disable_polling = pref;
        }
        updated.modified_at = Utc::now();

        self.index_entry(&updated);
        self.save().await?;
        debug!("Updated config entry: {}", entry_id);

        if notify {
            self.notify_update_listeners(&updated).await;
        }
        Ok(updated)
    }

    async fn notify_update_listeners(&self, entry: &ConfigEntry) {
        let listeners: Vec<UpdateListener> = self
            .update_listeners
            .get(&entry.entry_id)
            .map(|l| l.iter().map(|(_, listener)| listener.clone()).collect())
            .unwrap_or_default();

        for listener in listeners {
            if let Err(err) = listener(entry.clone()).await {
                error!(
                    entry_id = %entry.entry_id,
                    error = %err,
                    "Error in config entry update listener"
                );
            }
        }
    }

    /// Register a listener for options changes of an entry
    pub fn add_update_listener<F, Fut>(
        self: &Arc<Self>,
        entry_id: &str,
        listener: F,
    ) -> UpdateListenerHandle
    where
        F: Fn(ConfigEntry) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let listener: UpdateListener = Arc::new(move |entry| Box::pin(listener(entry)));
        self.update_listeners
            .entry(entry_id.to_string())
            .or_default()
            .push((id, listener));

        UpdateListenerHandle {
            entry_id: entry_id.to_string(),
            id,
            manager: Arc::downgrade(self),
            removed: AtomicBool::new(false),
        }
    }

    /// Unload (if needed) and remove an entry
    pub async fn remove(&self, hass: &Hass, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.state.is_recoverable() {
            self.unload(hass, entry_id).await?;
        }

        self.unindex_entry(&entry);
        self.update_listeners.remove(entry_id);
        self.entry_locks.remove(entry_id);
        self.save().await?;

        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry_id
        );

        Ok(entry)
    }

    /// Apply a validated state transition
    fn transition(
        &self,
        entry_id: &str,
        to: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        entry.state = entry.state.try_transition(to)?;
        entry.reason = reason;
        if !matches!(to, ConfigEntryState::SetupRetry | ConfigEntryState::SetupInProgress) {
            entry.tries = 0;
        }
        debug!("Entry {} state changed to {:?}", entry_id, to);
        Ok(())
    }

    fn entry_lock(&self, entry_id: &str) -> Arc<Mutex<()>> {
        self.entry_locks.entry(entry_id.to_string()).or_default().clone()
    }

    /// Register the lifecycle handler for a domain
    pub fn register_handler(&self, domain: &str, handler: Arc<dyn ConfigEntryHandler>) {
        self.handlers.insert(domain.to_string(), handler);
        debug!("Registered config entry handler for domain: {}", domain);
    }

    /// Set up an entry through its domain handler.
    ///
    /// Returns whether the entry ended up loaded. A not-ready failure leaves
    /// the entry in `SetupRetry` with a retry scheduled.
    pub async fn setup(&self, hass: &Hass, entry_id: &str) -> ConfigEntriesResult<bool> {
        self.run_setup(hass, entry_id, false).await
    }

    #[instrument(skip(self, hass))]
    async fn run_setup(
        &self,
        hass: &Hass,
        entry_id: &str,
        is_retry: bool,
    ) -> ConfigEntriesResult<bool> {
        let lock = self.entry_lock(entry_id);
        let _guard = lock.lock().await;

        let mut entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if is_retry && entry.state != ConfigEntryState::SetupRetry {
            debug!("Dropping stale setup retry for entry {}", entry_id);
            return Ok(entry.is_loaded());
        }
        if !is_retry {
            self.cancel_retry(entry_id);
        }

        if entry.is_disabled() {
            debug!("Skipping setup for disabled entry: {}", entry_id);
            return Ok(false);
        }

        let tries = entry.tries;
        self.transition(entry_id, ConfigEntryState::SetupInProgress, None)?;
        entry.state = ConfigEntryState::SetupInProgress;

        let handler = self.handlers.get(&entry.domain).map(|h| h.value().clone());
        let result = match handler {
            Some(handler) => handler.setup_entry(hass, &entry).await,
            None => Err(SetupError::failed(format!(
                "Integration {} not found",
                entry.domain
            ))),
        };

        match (ConfigEntryState::after_setup(&result), result) {
            (_, Ok(())) => {
                self.transition(entry_id, ConfigEntryState::Loaded, None)?;
                info!("Setup completed for entry: {} ({})", entry.title, entry_id);
                Ok(true)
            }
            (ConfigEntryState::SetupRetry, Err(err)) => {
                let delay = calculate_retry_delay(tries);
                self.transition(entry_id, ConfigEntryState::SetupRetry, Some(err.to_string()))?;
                if let Some(mut stored) = self.entries.get_mut(entry_id) {
                    stored.tries = tries + 1;
                }
                warn!(
                    "Config entry '{}' for {} not ready yet: {}; retrying in {:?}",
                    entry.title, entry.domain, err, delay
                );
                self.schedule_retry(hass, entry_id, delay);
                Ok(false)
            }
            (next, Err(err)) => {
                error!(
                    "Setup failed for entry '{}' ({}): {}",
                    entry.title, entry.domain, err
                );
                self.transition(entry_id, next, Some(err.to_string()))?;
                Ok(false)
            }
        }
    }

    fn schedule_retry(&self, hass: &Hass, entry_id: &str, delay: Duration) {
        let task = tokio::spawn(retry_setup(hass.clone(), entry_id.to_string(), delay));
        if let Some(previous) = self.retry_tasks.insert(entry_id.to_string(), task) {
            previous.abort();
        }
    }

    fn cancel_retry(&self, entry_id: &str) {
        if let Some((_, task)) = self.retry_tasks.remove(entry_id) {
            debug!("Cancelled pending setup retry for entry {}", entry_id);
            task.abort();
        }
    }

    /// Whether a setup retry is waiting to run for an entry
    pub fn has_pending_retry(&self, entry_id: &str) -> bool {
        self.retry_tasks
            .get(entry_id)
            .is_some_and(|task| !task.is_finished())
    }

    /// Unload an entry through its domain handler
    #[instrument(skip(self, hass))]
    pub async fn unload(&self, hass: &Hass, entry_id: &str) -> ConfigEntriesResult<()> {
        let lock = self.entry_lock(entry_id);
        let _guard = lock.lock().await;

        self.cancel_retry(entry_id);

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.state == ConfigEntryState::NotLoaded {
            return Ok(());
        }
        if !entry.state.is_recoverable() {
            return Err(ConfigEntriesError::CannotUnload(entry.state));
        }

        self.transition(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        // Only a loaded entry has anything to tear down
        let result = if entry.state == ConfigEntryState::Loaded {
            let handler = self.handlers.get(&entry.domain).map(|h| h.value().clone());
            match handler {
                Some(handler) => handler.unload_entry(hass, &entry).await,
                None => Ok(()),
            }
        } else {
            Ok(())
        };

        match result {
            Ok(()) => {
                self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
                info!("Unloaded entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            Err(err) => {
                error!("Unload failed for entry {}: {}", entry_id, err);
                self.transition(entry_id, ConfigEntryState::FailedUnload, Some(err.to_string()))?;
                Err(ConfigEntriesError::UnloadFailed(err))
            }
        }
    }

    /// Reload an entry (unload + setup)
    pub async fn reload(&self, hass: &Hass, entry_id: &str) -> ConfigEntriesResult<bool> {
        self.unload(hass, entry_id).await?;
        self.setup(hass, entry_id).await
    }

    /// Get all entry IDs
    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    /// Get all domains with entries
    pub fn domains(&self) -> Vec<String> {
        self.by_domain.iter().map(|r| r.key().clone()).collect()
    }

    /// Get count of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = ConfigEntry> + '_ {
        self.entries.iter().map(|r| r.value().clone())
    }

    /// Setup all entries
    pub async fn setup_all(&self, hass: &Hass) -> Vec<ConfigEntriesResult<bool>> {
        let mut results = Vec::new();
        for entry_id in self.entry_ids() {
            results.push(self.setup(hass, &entry_id).await);
        }
        results
    }
}

fn retry_setup(hass: Hass, entry_id: String, delay: Duration) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        tokio::time::sleep(delay).await;
        // Detach before setting up so our own setup cannot abort us
        hass.config_entries.retry_tasks.remove(&entry_id);
        if let Err(err) = hass.config_entries.run_setup(&hass, &entry_id, true).await {
            warn!("Setup retry for entry {} failed: {}", entry_id, err);
        }
    })
}
